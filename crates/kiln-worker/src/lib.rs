//! Build worker for Kiln.
//!
//! Polls the server for leases matching its capabilities, keeps the lease
//! alive while a [`BuildExecutor`] runs, uploads artifacts and reports the
//! result. Any sign that the lease was lost abandons the attempt.

pub mod backoff;
pub mod client;
pub mod config;
pub mod executor;
pub mod manifest;
pub mod worker;

pub use backoff::PollBackoff;
pub use client::{ClientError, WorkerClient};
pub use config::{ExecutorConfig, PollConfig, WorkerConfig};
pub use executor::{BuildExecutor, CommandExecutor, ExecutionOutcome, OutputArtifact};
pub use worker::{AttemptOutcome, BuildWorker};
