//! Job leasing and queue state for Kiln.
//!
//! [`LeaseManager`] hands pending jobs to polling workers, validates their
//! tokens and reclaims abandoned leases. [`LeaseSweeper`] drives the
//! reclamation on a timer and [`StatusAggregator`] summarizes the queue.

pub mod lease;
pub mod status;
pub mod sweeper;

pub use lease::{LeaseConfig, LeaseGrant, LeaseManager, LeaseUpdate, SweepReport};
pub use status::StatusAggregator;
pub use sweeper::LeaseSweeper;
