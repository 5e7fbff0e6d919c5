//! PostgreSQL implementation of JobStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_core::ids::{JobId, LeaseToken};
use kiln_core::job::{CapabilityFilter, Job, JobStatus, JobTransition, NewJob};
use kiln_core::ports::JobStore;
use kiln_core::status::JobCounts;
use kiln_core::{Error, Result};
use sqlx::{PgPool, Row};
use tracing::debug;

const JOB_COLUMNS: &str = "id, sequence, job_type, arch, payload, status, token, lease_expires_at, attempt, result, created_at, started_at, finished_at";

/// PostgreSQL implementation of JobStore.
///
/// Every mutation is a single conditional `UPDATE`, so the row-level lock
/// PostgreSQL takes for the update is the only lock involved.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Create a new PgJobStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(r: &sqlx::postgres::PgRow) -> Result<Job> {
        let status_str: String = r.get("status");
        let status = status_str.parse::<JobStatus>().map_err(Error::Database)?;

        Ok(Job {
            id: JobId::from_uuid(r.get::<uuid::Uuid, _>("id")),
            sequence: r.get("sequence"),
            job_type: r.get("job_type"),
            arch: r.get("arch"),
            payload: r.get("payload"),
            status,
            token: r
                .get::<Option<uuid::Uuid>, _>("token")
                .map(LeaseToken::from_uuid),
            lease_expires_at: r.get("lease_expires_at"),
            attempt: r.get::<i32, _>("attempt") as u32,
            result: r.get("result"),
            created_at: r.get("created_at"),
            started_at: r.get("started_at"),
            finished_at: r.get("finished_at"),
        })
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> Result<Job> {
        let row = sqlx::query(&format!(
            r#"INSERT INTO jobs (id, job_type, arch, payload, status, attempt, created_at)
               VALUES ($1, $2, $3, $4, 'pending', 1, $5)
               RETURNING {JOB_COLUMNS}"#
        ))
        .bind(job.id.as_uuid())
        .bind(&job.job_type)
        .bind(&job.arch)
        .bind(&job.payload)
        .bind(job.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Self::row_to_job(&row)
    }

    async fn get(&self, id: JobId) -> Result<Job> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(r) => Self::row_to_job(&r),
            None => Err(Error::JobNotFound(id)),
        }
    }

    async fn get_by_token(&self, token: LeaseToken) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE token = $1"))
            .bind(token.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn compare_and_swap(&self, id: JobId, transition: JobTransition) -> Result<Job> {
        let row = sqlx::query(&format!(
            r#"UPDATE jobs
               SET status = $4,
                   token = $5,
                   lease_expires_at = $6,
                   attempt = $7,
                   result = COALESCE($8, result),
                   started_at = $9,
                   finished_at = $10,
                   updated_at = NOW()
               WHERE id = $1 AND status = $2 AND token IS NOT DISTINCT FROM $3
                 AND ($11::timestamptz IS NULL OR lease_expires_at = $11)
               RETURNING {JOB_COLUMNS}"#
        ))
        .bind(id.as_uuid())
        .bind(transition.expected_status.as_str())
        .bind(transition.expected_token.map(|t| *t.as_uuid()))
        .bind(transition.status.as_str())
        .bind(transition.token.map(|t| *t.as_uuid()))
        .bind(transition.lease_expires_at)
        .bind(transition.attempt as i32)
        .bind(&transition.result)
        .bind(transition.started_at)
        .bind(transition.finished_at)
        .bind(transition.expected_lease_expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(r) = row {
            return Self::row_to_job(&r);
        }

        // No row updated: either the job is gone or someone else moved it.
        let exists = sqlx::query("SELECT 1 FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match exists {
            Some(_) => {
                debug!(job_id = %id, expected = %transition.expected_status, "Compare-and-swap conflict");
                Err(Error::Conflict(id))
            }
            None => Err(Error::JobNotFound(id)),
        }
    }

    async fn list_pending(&self, filter: &CapabilityFilter, limit: usize) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"SELECT {JOB_COLUMNS} FROM jobs
               WHERE status = 'pending' AND arch = $1 AND job_type = ANY($2)
               ORDER BY sequence ASC
               LIMIT $3"#
        ))
        .bind(&filter.arch)
        .bind(&filter.types)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            r#"SELECT {JOB_COLUMNS} FROM jobs
               WHERE status = 'running' AND lease_expires_at < $1
               ORDER BY lease_expires_at ASC
               LIMIT $2"#
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn counts(&self, max_attempts: u32) -> Result<JobCounts> {
        let row = sqlx::query(
            r#"SELECT
                 COUNT(*) FILTER (WHERE status = 'pending')  AS pending,
                 COUNT(*) FILTER (WHERE status = 'running')  AS running,
                 COUNT(*) FILTER (WHERE status = 'finished') AS finished,
                 COUNT(*) FILTER (WHERE status = 'failed')   AS failed,
                 MIN(created_at) FILTER (WHERE status = 'pending') AS oldest_pending,
                 COUNT(*) FILTER (WHERE attempt >= $1)       AS exhausted
               FROM jobs"#,
        )
        .bind(max_attempts as i32)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(JobCounts {
            pending: row.get::<i64, _>("pending") as u64,
            running: row.get::<i64, _>("running") as u64,
            finished: row.get::<i64, _>("finished") as u64,
            failed: row.get::<i64, _>("failed") as u64,
            oldest_pending_created_at: row.get("oldest_pending"),
            exhausted: row.get::<i64, _>("exhausted") as u64,
        })
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
