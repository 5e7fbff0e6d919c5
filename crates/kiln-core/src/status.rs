//! Queue summary types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Raw aggregate read from a job store in a single pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub pending: u64,
    pub running: u64,
    pub finished: u64,
    pub failed: u64,
    pub oldest_pending_created_at: Option<DateTime<Utc>>,
    /// Jobs whose attempt counter reached the configured maximum.
    pub exhausted: u64,
}

/// Operational view of the queue served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QueueStatus {
    pub pending: u64,
    pub running: u64,
    pub finished: u64,
    pub failed: u64,
    pub oldest_pending_age_secs: Option<u64>,
    pub exhausted: u64,
    pub max_attempts: u32,
    pub generated_at: DateTime<Utc>,
}

impl QueueStatus {
    pub fn from_counts(counts: JobCounts, max_attempts: u32, now: DateTime<Utc>) -> Self {
        let oldest_pending_age_secs = counts
            .oldest_pending_created_at
            .map(|created| (now - created).num_seconds().max(0) as u64);

        Self {
            pending: counts.pending,
            running: counts.running,
            finished: counts.finished,
            failed: counts.failed,
            oldest_pending_age_secs,
            exhausted: counts.exhausted,
            max_attempts,
            generated_at: now,
        }
    }
}
