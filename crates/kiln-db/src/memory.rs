//! In-process job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::ids::{JobId, LeaseToken};
use kiln_core::job::{CapabilityFilter, Job, JobStatus, JobTransition, NewJob};
use kiln_core::ports::JobStore;
use kiln_core::status::JobCounts;
use kiln_core::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

type Slot = Arc<Mutex<Job>>;

/// Job store kept in memory.
///
/// The map lock is taken for writing only when a job is inserted; every
/// transition locks just the one job it touches. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Slot>>,
    sequence: AtomicI64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: JobId) -> Result<Slot> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        jobs.get(&id).cloned().ok_or(Error::JobNotFound(id))
    }

    fn slots(&self) -> Result<Vec<Slot>> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        Ok(jobs.values().cloned().collect())
    }

    /// Snapshot of every job matching `keep`, sorted by `key`.
    fn collect<F, K>(&self, keep: F, key: K) -> Result<Vec<Job>>
    where
        F: Fn(&Job) -> bool,
        K: Fn(&Job) -> i64,
    {
        let mut out = Vec::new();
        for slot in self.slots()? {
            let job = slot.lock().map_err(poisoned)?;
            if keep(&job) {
                out.push(job.clone());
            }
        }
        out.sort_by_key(|j| key(j));
        Ok(out)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::Internal("job store lock poisoned".to_string())
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new: NewJob) -> Result<Job> {
        let job = Job {
            id: new.id,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            job_type: new.job_type,
            arch: new.arch,
            payload: new.payload,
            status: JobStatus::Pending,
            token: None,
            lease_expires_at: None,
            attempt: 1,
            result: None,
            created_at: new.created_at,
            started_at: None,
            finished_at: None,
        };

        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(Error::InvalidRequest(format!("duplicate job id {}", job.id)));
        }
        jobs.insert(job.id, Arc::new(Mutex::new(job.clone())));
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job> {
        let slot = self.slot(id)?;
        let job = slot.lock().map_err(poisoned)?;
        Ok(job.clone())
    }

    async fn get_by_token(&self, token: LeaseToken) -> Result<Option<Job>> {
        for slot in self.slots()? {
            let job = slot.lock().map_err(poisoned)?;
            if job.token == Some(token) {
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    async fn compare_and_swap(&self, id: JobId, transition: JobTransition) -> Result<Job> {
        let slot = self.slot(id)?;
        let mut job = slot.lock().map_err(poisoned)?;

        if !transition.matches(&job) {
            debug!(job_id = %id, expected = %transition.expected_status, actual = %job.status, "Compare-and-swap conflict");
            return Err(Error::Conflict(id));
        }

        transition.apply_to(&mut job);
        Ok(job.clone())
    }

    async fn list_pending(&self, filter: &CapabilityFilter, limit: usize) -> Result<Vec<Job>> {
        let mut jobs = self.collect(
            |j| j.status == JobStatus::Pending && filter.matches(j),
            |j| j.sequence,
        )?;
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>> {
        let mut jobs = self.collect(
            |j| j.status == JobStatus::Running && j.lease_expires_at.is_some_and(|t| t < now),
            |j| j.lease_expires_at.map(|t| t.timestamp_millis()).unwrap_or(0),
        )?;
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Counts over one consistent view of the queue.
    ///
    /// Every job is locked, in id order, before any is read. Transitions
    /// touch a single job, so none can land halfway through the tally.
    async fn counts(&self, max_attempts: u32) -> Result<JobCounts> {
        let mut slots = {
            let jobs = self.jobs.read().map_err(poisoned)?;
            jobs.iter()
                .map(|(id, slot)| (*id.as_uuid(), slot.clone()))
                .collect::<Vec<_>>()
        };
        slots.sort_by_key(|(id, _)| *id);

        let guards = slots
            .iter()
            .map(|(_, slot)| slot.lock().map_err(poisoned))
            .collect::<Result<Vec<_>>>()?;

        let mut counts = JobCounts::default();
        for job in &guards {
            match job.status {
                JobStatus::Pending => {
                    counts.pending += 1;
                    counts.oldest_pending_created_at = Some(
                        counts
                            .oldest_pending_created_at
                            .map_or(job.created_at, |t| t.min(job.created_at)),
                    );
                }
                JobStatus::Running => counts.running += 1,
                JobStatus::Finished => counts.finished += 1,
                JobStatus::Failed => counts.failed += 1,
            }
            if job.attempt >= max_attempts {
                counts.exhausted += 1;
            }
        }
        Ok(counts)
    }
}
