//! Poll, lease, build, report.

use kiln_core::ids::JobId;
use kiln_core::job::TerminalStatus;
use kiln_core::wire::LeaseResponse;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, sleep};
use tracing::{debug, error, info, warn};

use crate::backoff::PollBackoff;
use crate::client::{ClientError, ClientResult, WorkerClient};
use crate::config::WorkerConfig;
use crate::executor::{BuildExecutor, ExecutionOutcome};

const COMPLETE_ATTEMPTS: u32 = 3;

/// How one leased attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The server accepted the final status.
    Completed { job_id: JobId, status: TerminalStatus },
    /// The attempt was dropped; the job is someone else's now or will be
    /// requeued when the lease runs out.
    Abandoned { job_id: JobId, reason: String },
}

/// The build worker.
pub struct BuildWorker {
    config: WorkerConfig,
    client: WorkerClient,
    executor: Arc<dyn BuildExecutor>,
}

impl BuildWorker {
    pub fn new(config: WorkerConfig, client: WorkerClient, executor: Arc<dyn BuildExecutor>) -> Self {
        Self {
            config,
            client,
            executor,
        }
    }

    /// Poll for work until shutdown is signalled.
    ///
    /// A job in progress is finished before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = PollBackoff::from_config(&self.config.poll);

        info!(
            arch = %self.config.arch,
            types = ?self.config.types,
            server = %self.config.server_url,
            "Worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_once().await {
                Ok(Some(outcome)) => {
                    debug!(?outcome, "Attempt done");
                    backoff.reset();
                    continue;
                }
                Ok(None) => backoff.next_delay(),
                Err(e) => {
                    warn!(error = %e, "Polling for work failed");
                    backoff.next_delay()
                }
            };

            tokio::select! {
                _ = sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Worker shutting down");
    }

    /// Ask for one job and, if one is granted, run it to the end.
    pub async fn run_once(&self) -> ClientResult<Option<AttemptOutcome>> {
        let Some(lease) = self
            .client
            .request_job(&self.config.arch, &self.config.types)
            .await?
        else {
            return Ok(None);
        };

        Ok(Some(self.run_attempt(lease).await))
    }

    async fn run_attempt(&self, lease: LeaseResponse) -> AttemptOutcome {
        let job_id = lease.job_id;
        info!(job_id = %job_id, attempt = lease.attempt, job_type = %lease.job_type, "Lease acquired");

        let (lost_tx, mut lost_rx) = watch::channel(false);
        let heartbeat = self.spawn_heartbeat(&lease, lost_tx);

        let outcome = tokio::select! {
            outcome = self.executor.execute(&lease) => outcome,
            Ok(()) = async { lost_rx.wait_for(|lost| *lost).await.map(|_| ()) } => {
                heartbeat.abort();
                return abandoned(job_id, "lease lost during build");
            }
        };

        let outcome = match self.upload_artifacts(&lease, outcome).await {
            Ok(outcome) => outcome,
            Err(e) => {
                heartbeat.abort();
                return abandoned(job_id, e.to_string());
            }
        };

        heartbeat.abort();
        self.report(&lease, outcome).await
    }

    fn spawn_heartbeat(&self, lease: &LeaseResponse, lost: watch::Sender<bool>) -> JoinHandle<()> {
        let client = self.client.clone();
        let token = lease.token;
        let job_id = lease.job_id;
        let period = self.config.heartbeat_interval();

        tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match client.heartbeat(token).await {
                    Ok(_) => debug!(job_id = %job_id, "Lease renewed"),
                    Err(e) if e.is_lease_lost() => {
                        warn!(job_id = %job_id, error = %e, "Lease lost, abandoning attempt");
                        let _ = lost.send(true);
                        break;
                    }
                    Err(e) => warn!(job_id = %job_id, error = %e, "Heartbeat failed, will retry"),
                }
            }
        })
    }

    /// Upload everything the build produced.
    ///
    /// A lost lease aborts the attempt. Any other upload failure turns the
    /// outcome into a failure so the job does not finish without its output.
    async fn upload_artifacts(
        &self,
        lease: &LeaseResponse,
        outcome: ExecutionOutcome,
    ) -> ClientResult<ExecutionOutcome> {
        for artifact in &outcome.artifacts {
            match self
                .client
                .upload_artifact(lease.token, &artifact.name, artifact.content.clone())
                .await
            {
                Ok(info) => {
                    info!(job_id = %lease.job_id, artifact = %info.name, size_bytes = info.size_bytes, "Artifact uploaded");
                }
                Err(e) if e.is_lease_lost() => return Err(e),
                Err(e) => {
                    error!(job_id = %lease.job_id, artifact = %artifact.name, error = %e, "Artifact upload failed");
                    return Ok(ExecutionOutcome::failed(format!(
                        "upload of {} failed: {e}",
                        artifact.name
                    )));
                }
            }
        }
        Ok(outcome)
    }

    async fn report(&self, lease: &LeaseResponse, outcome: ExecutionOutcome) -> AttemptOutcome {
        let mut last_error: Option<ClientError> = None;

        for attempt in 1..=COMPLETE_ATTEMPTS {
            match self
                .client
                .complete(lease.token, outcome.status, outcome.result.clone())
                .await
            {
                Ok(job) => {
                    info!(job_id = %job.id, status = %job.status, "Job reported");
                    return AttemptOutcome::Completed {
                        job_id: lease.job_id,
                        status: outcome.status,
                    };
                }
                Err(e) if e.is_lease_lost() => {
                    warn!(job_id = %lease.job_id, error = %e, "Result rejected, lease lost");
                    return abandoned(lease.job_id, e.to_string());
                }
                Err(e) => {
                    warn!(job_id = %lease.job_id, attempt, error = %e, "Reporting result failed");
                    last_error = Some(e);
                    sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "result not reported".to_string());
        abandoned(lease.job_id, reason)
    }
}

fn abandoned(job_id: JobId, reason: impl Into<String>) -> AttemptOutcome {
    AttemptOutcome::Abandoned {
        job_id,
        reason: reason.into(),
    }
}
