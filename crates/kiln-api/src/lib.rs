//! HTTP API for the Kiln job dispatch service.
//!
//! Thin axum adapter over the lease manager, artifact store and status
//! aggregator. Every handler maps [`kiln_core::Error`] through [`ApiError`].

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
