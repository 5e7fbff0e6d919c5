//! Application state shared across handlers.

use kiln_artifacts::ArtifactStore;
use kiln_core::ports::JobStore;
use kiln_scheduler::{LeaseManager, StatusAggregator};
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub leases: Arc<LeaseManager>,
    pub artifacts: Arc<ArtifactStore>,
    pub status: Arc<StatusAggregator>,
    pub store: Arc<dyn JobStore>,
}

impl AppState {
    pub fn new(
        leases: Arc<LeaseManager>,
        artifacts: Arc<ArtifactStore>,
        status: Arc<StatusAggregator>,
    ) -> Self {
        let store = leases.store().clone();
        Self {
            leases,
            artifacts,
            status,
            store,
        }
    }
}
