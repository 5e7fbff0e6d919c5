//! Kiln Core
//!
//! Domain types, the job store port and error handling for Kiln.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the store, lease manager, artifact store and transport crates.

pub mod clock;
pub mod error;
pub mod ids;
pub mod job;
pub mod ports;
pub mod status;
pub mod wire;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use ids::*;
pub use job::{CapabilityFilter, Job, JobStatus, JobTransition, NewJob, TerminalStatus};
pub use status::{JobCounts, QueueStatus};
