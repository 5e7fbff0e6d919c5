//! Worker client and loop against a mocked server.

use async_trait::async_trait;
use chrono::Utc;
use kiln_core::ids::{JobId, LeaseToken};
use kiln_core::job::{JobStatus, TerminalStatus};
use kiln_core::wire::{ArtifactInfo, JobResponse, LeaseResponse};
use kiln_worker::{
    AttemptOutcome, BuildExecutor, BuildWorker, ClientError, ExecutionOutcome, WorkerClient,
    WorkerConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn lease_for(job_id: JobId, token: LeaseToken) -> LeaseResponse {
    LeaseResponse {
        token,
        job_id,
        job_type: "qemu".into(),
        arch: "x86_64".into(),
        attempt: 1,
        payload: b"M1".to_vec(),
        lease_expires_at: Utc::now(),
    }
}

fn job_response(job_id: JobId, status: JobStatus) -> JobResponse {
    JobResponse {
        id: job_id,
        job_type: "qemu".into(),
        arch: "x86_64".into(),
        status,
        attempt: 1,
        result: None,
        lease_expires_at: None,
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
    }
}

fn config(server: &MockServer) -> WorkerConfig {
    WorkerConfig {
        server_url: server.uri(),
        arch: "x86_64".into(),
        types: vec!["qemu".into()],
        heartbeat_interval_secs: 1,
        ..Default::default()
    }
}

struct StaticExecutor {
    delay: Duration,
    outcome: ExecutionOutcome,
    runs: AtomicUsize,
}

#[async_trait]
impl BuildExecutor for StaticExecutor {
    async fn execute(&self, _lease: &LeaseResponse) -> ExecutionOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.outcome.clone()
    }
}

#[tokio::test]
async fn test_request_job_no_content_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/leases"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = WorkerClient::from_config(&config(&server)).unwrap();
    let lease = client.request_job("x86_64", &["qemu".into()]).await.unwrap();
    assert!(lease.is_none());
}

#[tokio::test]
async fn test_lease_errors_are_typed() {
    let server = MockServer::start().await;
    let conflict = LeaseToken::generate();
    let gone = LeaseToken::generate();

    Mock::given(method("PATCH"))
        .and(path(format!("/api/v1/leases/{conflict}")))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "Invalid lease token"})))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("/api/v1/leases/{gone}")))
        .respond_with(ResponseTemplate::new(410).set_body_json(json!({"message": "Lease expired"})))
        .mount(&server)
        .await;

    let client = WorkerClient::from_config(&config(&server)).unwrap();

    let err = client.heartbeat(conflict).await.unwrap_err();
    assert!(matches!(&err, ClientError::InvalidToken(m) if m == "Invalid lease token"));
    assert!(err.is_lease_lost());

    let err = client.heartbeat(gone).await.unwrap_err();
    assert!(matches!(err, ClientError::LeaseExpired(_)));
}

#[tokio::test]
async fn test_server_error_is_not_lease_loss() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/status"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = WorkerClient::from_config(&config(&server)).unwrap();
    let err = client.queue_status().await.unwrap_err();
    assert!(matches!(err, ClientError::Server { status: 500, .. }));
    assert!(!err.is_lease_lost());
}

#[tokio::test]
async fn test_attempt_uploads_then_completes() {
    let server = MockServer::start().await;
    let job_id = JobId::new();
    let token = LeaseToken::generate();

    Mock::given(method("POST"))
        .and(path("/api/v1/leases"))
        .respond_with(ResponseTemplate::new(201).set_body_json(lease_for(job_id, token)))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/api/v1/leases/{token}/artifacts/disk.img")))
        .respond_with(ResponseTemplate::new(201).set_body_json(ArtifactInfo {
            name: "disk.img".into(),
            size_bytes: 1,
            sha256: "00".into(),
            stored_at: Utc::now(),
        }))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("/api/v1/leases/{token}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(job_response(job_id, JobStatus::Finished)),
        )
        .mount(&server)
        .await;

    let executor = Arc::new(StaticExecutor {
        delay: Duration::ZERO,
        outcome: ExecutionOutcome::finished(json!("R1")).with_artifact("disk.img", b"B".to_vec()),
        runs: AtomicUsize::new(0),
    });
    let cfg = config(&server);
    let worker = BuildWorker::new(cfg.clone(), WorkerClient::from_config(&cfg).unwrap(), executor.clone());

    let outcome = worker.run_once().await.unwrap().unwrap();
    assert_eq!(
        outcome,
        AttemptOutcome::Completed {
            job_id,
            status: TerminalStatus::Finished
        }
    );
    assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_attempt_abandoned_when_heartbeat_rejected() {
    let server = MockServer::start().await;
    let job_id = JobId::new();
    let token = LeaseToken::generate();

    Mock::given(method("POST"))
        .and(path("/api/v1/leases"))
        .respond_with(ResponseTemplate::new(201).set_body_json(lease_for(job_id, token)))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path_regex(r"^/api/v1/leases/[0-9a-f]+$"))
        .respond_with(ResponseTemplate::new(410).set_body_json(json!({"message": "Lease expired"})))
        .mount(&server)
        .await;
    // Nothing may be uploaded once the lease is gone.
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let executor = Arc::new(StaticExecutor {
        delay: Duration::from_secs(30),
        outcome: ExecutionOutcome::finished(json!("late")).with_artifact("disk.img", b"B".to_vec()),
        runs: AtomicUsize::new(0),
    });
    let cfg = config(&server);
    let worker = BuildWorker::new(cfg.clone(), WorkerClient::from_config(&cfg).unwrap(), executor);

    let outcome = tokio::time::timeout(Duration::from_secs(10), worker.run_once())
        .await
        .expect("attempt should be abandoned promptly")
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, AttemptOutcome::Abandoned { job_id: id, .. } if id == job_id));
}

#[tokio::test]
async fn test_failed_upload_reports_failure() {
    let server = MockServer::start().await;
    let job_id = JobId::new();
    let token = LeaseToken::generate();

    Mock::given(method("POST"))
        .and(path("/api/v1/leases"))
        .respond_with(ResponseTemplate::new(201).set_body_json(lease_for(job_id, token)))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(413).set_body_json(json!({"message": "too large"})))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("/api/v1/leases/{token}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(job_response(job_id, JobStatus::Failed)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let executor = Arc::new(StaticExecutor {
        delay: Duration::ZERO,
        outcome: ExecutionOutcome::finished(json!("R1")).with_artifact("huge.img", vec![0; 8]),
        runs: AtomicUsize::new(0),
    });
    let cfg = config(&server);
    let worker = BuildWorker::new(cfg.clone(), WorkerClient::from_config(&cfg).unwrap(), executor);

    let outcome = worker.run_once().await.unwrap().unwrap();
    assert_eq!(
        outcome,
        AttemptOutcome::Completed {
            job_id,
            status: TerminalStatus::Failed
        }
    );
}
