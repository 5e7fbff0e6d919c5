//! Lease manager: claiming, renewal, completion and expiry of job leases.

use chrono::{DateTime, Utc};
use kiln_core::ids::{JobId, LeaseToken};
use kiln_core::job::{CapabilityFilter, Job, JobStatus, JobTransition, NewJob, TerminalStatus};
use kiln_core::ports::JobStore;
use kiln_core::{Clock, Error, Result, SystemClock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result recorded on jobs failed by the sweep.
pub const RETRIES_EXHAUSTED: &str = "lease expired, retries exhausted";

/// Lease tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// How long a claim or heartbeat keeps the lease alive.
    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: u64,
    /// Leases a job may receive before it is failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// How often the sweeper looks for expired leases.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Upper bound on submitted manifest payloads.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,
    /// Page size when scanning pending or expired jobs.
    #[serde(default = "default_scan_batch")]
    pub scan_batch: usize,
}

fn default_lease_duration() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_max_payload_bytes() -> u64 {
    4 * 1024 * 1024
}

fn default_scan_batch() -> usize {
    64
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: default_lease_duration(),
            max_attempts: default_max_attempts(),
            sweep_interval_secs: default_sweep_interval(),
            max_payload_bytes: default_max_payload_bytes(),
            scan_batch: default_scan_batch(),
        }
    }
}

impl LeaseConfig {
    pub fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_duration_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// A successful claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseGrant {
    pub token: LeaseToken,
    pub job: Job,
}

/// What a lease holder reports.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseUpdate {
    /// Still working; extend the deadline.
    Heartbeat,
    /// Done; record the result and release the lease.
    Complete { status: TerminalStatus, result: Value },
}

/// Jobs touched by one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: Vec<JobId>,
    pub failed: Vec<JobId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

/// Owns every job lease.
///
/// All state changes go through [`JobStore::compare_and_swap`]; races with
/// other workers or the sweep surface as `Conflict` and are resolved here.
pub struct LeaseManager {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    config: LeaseConfig,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn JobStore>, config: LeaseConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    pub fn with_clock(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, config: LeaseConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Enqueue a new job.
    pub async fn submit(
        &self,
        job_type: impl Into<String>,
        arch: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<Job> {
        let job_type = job_type.into();
        let arch = arch.into();

        if job_type.trim().is_empty() || arch.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "job type and arch must not be empty".to_string(),
            ));
        }
        if payload.len() as u64 > self.config.max_payload_bytes {
            return Err(Error::CapacityExceeded {
                what: "payload",
                size: payload.len() as u64,
                limit: self.config.max_payload_bytes,
            });
        }

        let job = self
            .store
            .create(NewJob {
                id: JobId::new(),
                job_type,
                arch,
                payload,
                created_at: self.clock.now(),
            })
            .await?;

        info!(job_id = %job.id, job_type = %job.job_type, arch = %job.arch, "Job submitted");
        Ok(job)
    }

    /// Claim the oldest pending job matching `filter`.
    ///
    /// `Ok(None)` means there is nothing to do right now.
    pub async fn request_job(&self, filter: &CapabilityFilter) -> Result<Option<LeaseGrant>> {
        if filter.types.is_empty() || filter.arch.is_empty() {
            return Err(Error::InvalidRequest(
                "capability filter needs at least one type and an arch".to_string(),
            ));
        }

        let mut lost: HashSet<JobId> = HashSet::new();

        loop {
            let candidates = self
                .store
                .list_pending(filter, self.config.scan_batch)
                .await?;

            let fresh: Vec<Job> = candidates
                .into_iter()
                .filter(|j| !lost.contains(&j.id))
                .collect();
            if fresh.is_empty() {
                return Ok(None);
            }

            for job in fresh {
                let now = self.clock.now();
                let token = LeaseToken::generate();
                let expires_at = now + self.config.lease_duration();
                let claim = JobTransition::claim(&job, token, expires_at, now);

                match self.store.compare_and_swap(job.id, claim).await {
                    Ok(job) => {
                        info!(
                            job_id = %job.id,
                            attempt = job.attempt,
                            expires_at = %expires_at,
                            "Job leased"
                        );
                        return Ok(Some(LeaseGrant { token, job }));
                    }
                    Err(Error::Conflict(id)) => {
                        debug!(job_id = %id, "Lost claim race, trying next candidate");
                        lost.insert(id);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Heartbeat or finish the job held under `token`.
    pub async fn renew_or_update(&self, token: LeaseToken, update: LeaseUpdate) -> Result<Job> {
        let now = self.clock.now();
        let job = self.live_lease(token, now).await?;

        let transition = match &update {
            LeaseUpdate::Heartbeat => {
                JobTransition::renew(&job, token, now + self.config.lease_duration())
            }
            LeaseUpdate::Complete { status, result } => {
                JobTransition::complete(&job, token, *status, result.clone(), now)
            }
        };

        match self.store.compare_and_swap(job.id, transition).await {
            Ok(job) => {
                match update {
                    LeaseUpdate::Heartbeat => {
                        debug!(job_id = %job.id, expires_at = ?job.lease_expires_at, "Lease renewed")
                    }
                    LeaseUpdate::Complete { status, .. } => {
                        info!(job_id = %job.id, attempt = job.attempt, status = ?status, "Job completed")
                    }
                }
                Ok(job)
            }
            // Swept or re-leased between our read and our write.
            Err(Error::Conflict(id)) => {
                warn!(job_id = %id, "Lease superseded during update");
                Err(Error::InvalidToken)
            }
            Err(e) => Err(e),
        }
    }

    /// The running job held under `token`, if its lease is still live.
    pub async fn authorize(&self, token: LeaseToken) -> Result<Job> {
        self.live_lease(token, self.clock.now()).await
    }

    async fn live_lease(&self, token: LeaseToken, now: DateTime<Utc>) -> Result<Job> {
        let job = match self.store.get_by_token(token).await? {
            Some(job) if job.status == JobStatus::Running && job.token == Some(token) => job,
            _ => {
                warn!(token = ?token, "Rejected unknown or superseded lease token");
                return Err(Error::InvalidToken);
            }
        };

        if let Some(expired_at) = job.lease_expires_at.filter(|_| job.lease_expired(now)) {
            warn!(job_id = %job.id, expired_at = %expired_at, "Rejected expired lease");
            return Err(Error::LeaseExpired { expired_at });
        }

        Ok(job)
    }

    /// Reclaim every lease whose deadline has passed.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        loop {
            let now = self.clock.now();
            let expired = self
                .store
                .list_expired(now, self.config.scan_batch)
                .await?;
            let page_len = expired.len();

            for job in expired {
                let exhausted = job.attempt >= self.config.max_attempts;
                let transition = if exhausted {
                    JobTransition::exhaust(
                        &job,
                        json!({ "error": RETRIES_EXHAUSTED, "attempts": job.attempt }),
                        now,
                    )
                } else {
                    JobTransition::requeue(&job)
                };

                match self.store.compare_and_swap(job.id, transition).await {
                    Ok(updated) if exhausted => {
                        warn!(job_id = %updated.id, attempts = updated.attempt, "Lease expired on final attempt, job failed");
                        report.failed.push(updated.id);
                    }
                    Ok(updated) => {
                        info!(job_id = %updated.id, attempt = updated.attempt, "Lease expired, job requeued");
                        report.requeued.push(updated.id);
                    }
                    Err(Error::Conflict(id)) => {
                        debug!(job_id = %id, "Expired job changed before sweep could reclaim it");
                    }
                    Err(e) => return Err(e),
                }
            }

            if page_len < self.config.scan_batch {
                break;
            }
        }

        Ok(report)
    }
}
