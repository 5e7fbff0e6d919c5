//! Shared harness for Kiln's end-to-end tests.
//!
//! [`TestServer`] runs the real server on `127.0.0.1:0` with a temporary
//! artifact root. [`PostgresContext`] adds a migrated PostgreSQL container
//! for the tests behind the `integration` feature.

pub mod containers;
pub mod context;
pub mod helpers;

pub use context::PostgresContext;
pub use helpers::{ApiTestClient, TestServer, wait_for};

/// Install a test-writer subscriber. Safe to call from every test.
pub fn init_test_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,kiln_tests=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
