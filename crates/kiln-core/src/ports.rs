//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the dispatch core and its
//! storage adapters.

use crate::ids::{JobId, LeaseToken};
use crate::job::{CapabilityFilter, Job, JobTransition, NewJob};
use crate::status::JobCounts;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Authoritative record of every job.
///
/// `compare_and_swap` is the only way to change a job after creation.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job as `Pending` with `attempt = 1`.
    async fn create(&self, job: NewJob) -> Result<Job>;

    /// Get a job snapshot. Unknown ids yield `Error::JobNotFound`.
    async fn get(&self, id: JobId) -> Result<Job>;

    /// Find the job currently holding `token`, if any.
    async fn get_by_token(&self, token: LeaseToken) -> Result<Option<Job>>;

    /// Apply `transition` if the job's `(status, token)` still matches the
    /// expected pair. A mismatch yields `Error::Conflict`.
    async fn compare_and_swap(&self, id: JobId, transition: JobTransition) -> Result<Job>;

    /// Pending jobs matching `filter`, oldest first.
    async fn list_pending(&self, filter: &CapabilityFilter, limit: usize) -> Result<Vec<Job>>;

    /// Running jobs whose lease deadline is before `now`.
    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>>;

    /// Per-status counts and failure indicators.
    async fn counts(&self, max_attempts: u32) -> Result<JobCounts>;

    /// Check that the backing storage is reachable.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
