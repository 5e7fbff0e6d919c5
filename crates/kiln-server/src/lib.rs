//! Kiln server assembly: configuration, logging and process lifecycle.

pub mod config;
pub mod logging;
pub mod server;

pub use config::{LogConfig, LogFormat, ServerConfig};
pub use server::Server;
