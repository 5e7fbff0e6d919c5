//! Read-only queue summary.

use kiln_core::ports::JobStore;
use kiln_core::{Clock, QueueStatus, Result, SystemClock};
use std::sync::Arc;

/// Builds [`QueueStatus`] snapshots. Holds no mutation capability.
pub struct StatusAggregator {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl StatusAggregator {
    pub fn new(store: Arc<dyn JobStore>, max_attempts: u32) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), max_attempts)
    }

    pub fn with_clock(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, max_attempts: u32) -> Self {
        Self {
            store,
            clock,
            max_attempts,
        }
    }

    pub async fn snapshot(&self) -> Result<QueueStatus> {
        let counts = self.store.counts(self.max_attempts).await?;
        Ok(QueueStatus::from_counts(
            counts,
            self.max_attempts,
            self.clock.now(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::{LeaseConfig, LeaseManager};
    use kiln_core::ManualClock;
    use kiln_core::job::CapabilityFilter;
    use kiln_db::MemoryJobStore;

    #[tokio::test]
    async fn test_snapshot_reports_age_and_exhaustion() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let clock = Arc::new(ManualClock::default());
        let config = LeaseConfig {
            max_attempts: 1,
            ..Default::default()
        };
        let leases = LeaseManager::with_clock(store.clone(), clock.clone(), config);
        let status = StatusAggregator::with_clock(store, clock.clone(), 1);

        leases.submit("qemu", "x86_64", vec![]).await.unwrap();
        leases.submit("ami", "x86_64", vec![]).await.unwrap();
        leases
            .request_job(&CapabilityFilter::new("qemu", "x86_64"))
            .await
            .unwrap()
            .unwrap();

        clock.advance(chrono::Duration::seconds(20));
        let snapshot = status.snapshot().await.unwrap();
        assert_eq!(snapshot.pending, 1);
        assert_eq!(snapshot.running, 1);
        assert_eq!(snapshot.oldest_pending_age_secs, Some(20));
        // With a single allowed attempt every job is already at the limit.
        assert_eq!(snapshot.exhausted, 2);

        leases.sweep().await.unwrap();
        let snapshot = status.snapshot().await.unwrap();
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.running, 0);
    }
}
