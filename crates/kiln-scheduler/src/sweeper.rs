//! Background loop that reclaims expired leases.

use crate::lease::LeaseManager;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info};

/// Periodically runs [`LeaseManager::sweep`].
pub struct LeaseSweeper {
    leases: Arc<LeaseManager>,
    interval: Duration,
}

impl LeaseSweeper {
    pub fn new(leases: Arc<LeaseManager>) -> Self {
        let interval = leases.config().sweep_interval();
        Self { leases, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the sweep loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting lease sweeper"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Lease sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn the loop onto the runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn sweep_once(&self) {
        match self.leases.sweep().await {
            Ok(report) if report.is_empty() => debug!("Sweep found no expired leases"),
            Ok(report) => info!(
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "Sweep reclaimed expired leases"
            ),
            // Store faults are reported, the next tick tries again.
            Err(e) => error!(error = %e, "Lease sweep failed"),
        }
    }
}
