//! Lease-gated artifact store.

use crate::backend::ArtifactBackend;
use crate::keys::validate_name;
use crate::types::{ArtifactConfig, ArtifactInfo, ArtifactKey};
use kiln_core::ids::{JobId, LeaseToken};
use kiln_core::{Error, Result};
use kiln_scheduler::LeaseManager;
use std::sync::Arc;
use tracing::{info, warn};

/// Accepts uploads from lease holders and serves finished jobs' artifacts.
pub struct ArtifactStore {
    backend: Arc<dyn ArtifactBackend>,
    leases: Arc<LeaseManager>,
    max_artifact_bytes: u64,
}

impl ArtifactStore {
    pub fn new(
        backend: Arc<dyn ArtifactBackend>,
        leases: Arc<LeaseManager>,
        config: &ArtifactConfig,
    ) -> Self {
        Self {
            backend,
            leases,
            max_artifact_bytes: config.max_artifact_bytes,
        }
    }

    pub fn max_artifact_bytes(&self) -> u64 {
        self.max_artifact_bytes
    }

    /// Store `content` as artifact `name` of the job leased under `token`.
    ///
    /// The lease is checked before writing and again before the content is
    /// published; a lease lost in between leaves the previous content alone.
    pub async fn put(&self, token: LeaseToken, name: &str, content: &[u8]) -> Result<ArtifactInfo> {
        validate_name(name)?;
        if content.len() as u64 > self.max_artifact_bytes {
            return Err(Error::CapacityExceeded {
                what: "artifact",
                size: content.len() as u64,
                limit: self.max_artifact_bytes,
            });
        }

        let job = self.leases.authorize(token).await?;
        let key = ArtifactKey::new(job.id, job.attempt, name);
        let staged = self.backend.stage(&key, content).await?;

        let still_held = match self.leases.authorize(token).await {
            Ok(current) if current.id == job.id && current.attempt == job.attempt => Ok(()),
            Ok(_) => Err(Error::InvalidToken),
            Err(e) => Err(e),
        };

        if let Err(e) = still_held {
            warn!(job_id = %job.id, artifact = %name, error = %e, "Lease lost during upload, discarding");
            self.backend.discard(staged).await?;
            return Err(e);
        }

        let stored = self.backend.commit(staged).await?;
        info!(
            job_id = %job.id,
            attempt = job.attempt,
            artifact = %stored.name,
            size_bytes = stored.size_bytes,
            "Artifact stored"
        );
        Ok(stored)
    }

    /// Content of artifact `name` from the job's final attempt.
    ///
    /// Only terminal jobs expose artifacts.
    pub async fn get(&self, job_id: JobId, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;
        let job = self.leases.store().get(job_id).await?;
        let not_found = || Error::ArtifactNotFound {
            job_id,
            name: name.to_string(),
        };

        if !job.status.is_terminal() {
            return Err(not_found());
        }

        self.backend
            .read(&ArtifactKey::new(job.id, job.attempt, name))
            .await?
            .ok_or_else(not_found)
    }

    /// Artifacts of a terminal job's final attempt. Empty for jobs in flight.
    pub async fn list(&self, job_id: JobId) -> Result<Vec<ArtifactInfo>> {
        let job = self.leases.store().get(job_id).await?;
        if !job.status.is_terminal() {
            return Ok(vec![]);
        }
        self.backend.list(job.id, job.attempt).await
    }
}
