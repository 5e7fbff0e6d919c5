//! Job records, lease fields and the transitions between job states.

use crate::ids::{JobId, LeaseToken};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of build work with an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,
    /// Monotonic creation order assigned by the store. FIFO tie-breaker.
    pub sequence: i64,
    pub job_type: String,
    pub arch: String,
    #[serde(with = "payload_base64")]
    #[schemars(with = "String")]
    pub payload: Vec<u8>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<LeaseToken>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A token exists if and only if the job is running.
    pub fn lease_fields_consistent(&self) -> bool {
        match self.status {
            JobStatus::Running => self.token.is_some() && self.lease_expires_at.is_some(),
            _ => self.token.is_none() && self.lease_expires_at.is_none(),
        }
    }

    /// True when the lease deadline has passed at `now`.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at.is_some_and(|deadline| deadline <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Finished,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "finished" => Ok(JobStatus::Finished),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Statuses a lease holder may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Finished,
    Failed,
}

impl From<TerminalStatus> for JobStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Finished => JobStatus::Finished,
            TerminalStatus::Failed => JobStatus::Failed,
        }
    }
}

/// The `(types, arch)` a worker advertises when polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CapabilityFilter {
    pub types: Vec<String>,
    pub arch: String,
}

impl CapabilityFilter {
    pub fn new(job_type: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            types: vec![job_type.into()],
            arch: arch.into(),
        }
    }

    pub fn with_types<I, S>(types: I, arch: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            arch: arch.into(),
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        job.arch == self.arch && self.types.iter().any(|t| *t == job.job_type)
    }
}

/// Input to `JobStore::create`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub job_type: String,
    pub arch: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// A compare-and-swap request against a single job.
///
/// The store applies the new fields only if the job's current
/// `(status, token)` equals `(expected_status, expected_token)` and, when
/// `expected_lease_expires_at` is set, the deadline is still the one observed.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTransition {
    pub expected_status: JobStatus,
    pub expected_token: Option<LeaseToken>,
    /// Deadline the caller acted on. `None` skips the check.
    pub expected_lease_expires_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub token: Option<LeaseToken>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    pub result: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobTransition {
    /// `Pending -> Running` under a freshly minted token.
    pub fn claim(
        job: &Job,
        token: LeaseToken,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            expected_status: JobStatus::Pending,
            expected_token: None,
            expected_lease_expires_at: None,
            status: JobStatus::Running,
            token: Some(token),
            lease_expires_at: Some(expires_at),
            attempt: job.attempt,
            result: None,
            started_at: Some(now),
            finished_at: None,
        }
    }

    /// Heartbeat: same token, later deadline.
    pub fn renew(job: &Job, token: LeaseToken, expires_at: DateTime<Utc>) -> Self {
        Self {
            expected_status: JobStatus::Running,
            expected_token: Some(token),
            expected_lease_expires_at: None,
            status: JobStatus::Running,
            token: Some(token),
            lease_expires_at: Some(expires_at),
            attempt: job.attempt,
            result: None,
            started_at: job.started_at,
            finished_at: None,
        }
    }

    /// Terminal update by the lease holder.
    pub fn complete(
        job: &Job,
        token: LeaseToken,
        status: TerminalStatus,
        result: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            expected_status: JobStatus::Running,
            expected_token: Some(token),
            expected_lease_expires_at: None,
            status: status.into(),
            token: None,
            lease_expires_at: None,
            attempt: job.attempt,
            result: Some(result),
            started_at: job.started_at,
            finished_at: Some(now),
        }
    }

    /// Sweep: expired lease goes back to the queue as the next attempt.
    ///
    /// Pinned to the deadline in `job`, so a heartbeat that lands first wins.
    pub fn requeue(job: &Job) -> Self {
        Self {
            expected_status: JobStatus::Running,
            expected_token: job.token,
            expected_lease_expires_at: job.lease_expires_at,
            status: JobStatus::Pending,
            token: None,
            lease_expires_at: None,
            attempt: job.attempt + 1,
            result: None,
            started_at: job.started_at,
            finished_at: None,
        }
    }

    /// Sweep: expired lease on the last allowed attempt.
    pub fn exhaust(job: &Job, result: Value, now: DateTime<Utc>) -> Self {
        Self {
            expected_status: JobStatus::Running,
            expected_token: job.token,
            expected_lease_expires_at: job.lease_expires_at,
            status: JobStatus::Failed,
            token: None,
            lease_expires_at: None,
            attempt: job.attempt,
            result: Some(result),
            started_at: job.started_at,
            finished_at: Some(now),
        }
    }

    /// Whether `job` is in the state this transition expects.
    pub fn matches(&self, job: &Job) -> bool {
        job.status == self.expected_status
            && job.token == self.expected_token
            && self
                .expected_lease_expires_at
                .is_none_or(|deadline| job.lease_expires_at == Some(deadline))
    }

    /// Write the new fields into `job`. Callers check `matches` first.
    pub fn apply_to(&self, job: &mut Job) {
        job.status = self.status;
        job.token = self.token;
        job.lease_expires_at = self.lease_expires_at;
        job.attempt = self.attempt;
        if self.result.is_some() {
            job.result = self.result.clone();
        }
        job.started_at = self.started_at;
        job.finished_at = self.finished_at;
    }
}

/// Serde adapter carrying payload bytes as standard base64 strings.
pub mod payload_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
