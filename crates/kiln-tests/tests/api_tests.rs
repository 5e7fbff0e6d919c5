//! End-to-end tests over real HTTP against the in-memory store.
//!
//! Run with: `cargo test -p kiln-tests --test api_tests`

use async_trait::async_trait;
use futures::future::join_all;
use kiln_core::job::{JobStatus, TerminalStatus};
use kiln_core::wire::LeaseResponse;
use kiln_scheduler::LeaseConfig;
use kiln_server::ServerConfig;
use kiln_tests::{TestServer, wait_for};
use kiln_worker::{
    AttemptOutcome, BuildExecutor, BuildWorker, ClientError, ExecutionOutcome, WorkerClient,
    WorkerConfig,
};
use reqwest::StatusCode;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn qemu() -> Vec<String> {
    vec!["qemu".to_string()]
}

fn short_leases() -> ServerConfig {
    ServerConfig {
        lease: LeaseConfig {
            lease_duration_secs: 1,
            sweep_interval_secs: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

struct ImageExecutor;

#[async_trait]
impl BuildExecutor for ImageExecutor {
    async fn execute(&self, lease: &LeaseResponse) -> ExecutionOutcome {
        ExecutionOutcome::finished(json!({"built": lease.job_type}))
            .with_artifact("disk.img", lease.payload.clone())
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::start().await.expect("Failed to start server");
    assert!(server.api().health().await.unwrap());

    let ready = server.api().get("/ready").await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_claim_and_finish() {
    let server = TestServer::start().await.unwrap();
    let client = server.worker_client();

    let job = client.submit_job("qemu", "x86_64", b"M1".to_vec()).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let lease = client.request_job("x86_64", &qemu()).await.unwrap().unwrap();
    assert_eq!(lease.job_id, job.id);
    assert_eq!(lease.payload, b"M1".to_vec());
    assert!(client.request_job("x86_64", &qemu()).await.unwrap().is_none());

    client
        .complete(lease.token, TerminalStatus::Finished, json!("R1"))
        .await
        .unwrap();
    assert!(client.request_job("x86_64", &qemu()).await.unwrap().is_none());

    let done = client.get_job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Finished);
    assert_eq!(done.result, Some(json!("R1")));

    // A finished lease cannot be reused.
    let err = client.heartbeat(lease.token).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidToken(_)));
}

#[tokio::test]
async fn test_capability_filter_over_http() {
    let server = TestServer::start().await.unwrap();
    let client = server.worker_client();

    client.submit_job("ami", "aarch64", vec![]).await.unwrap();
    assert!(client.request_job("x86_64", &qemu()).await.unwrap().is_none());
    assert!(client.request_job("aarch64", &qemu()).await.unwrap().is_none());

    let types = vec!["qemu".to_string(), "ami".to_string()];
    assert!(client.request_job("aarch64", &types).await.unwrap().is_some());
}

#[tokio::test]
async fn test_worker_builds_and_uploads() {
    let server = TestServer::start().await.unwrap();
    let client = server.worker_client();
    let job = client.submit_job("qemu", "x86_64", b"IMAGE".to_vec()).await.unwrap();

    let config = WorkerConfig {
        server_url: server.base_url(),
        arch: "x86_64".into(),
        types: qemu(),
        ..Default::default()
    };
    let worker = BuildWorker::new(
        config.clone(),
        WorkerClient::from_config(&config).unwrap(),
        Arc::new(ImageExecutor),
    );

    let outcome = worker.run_once().await.unwrap().unwrap();
    assert_eq!(
        outcome,
        AttemptOutcome::Completed {
            job_id: job.id,
            status: TerminalStatus::Finished
        }
    );

    let artifacts = client.list_artifacts(job.id).await.unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].name, "disk.img");
    assert_eq!(artifacts[0].size_bytes, 5);

    let content = client.download_artifact(job.id, "disk.img").await.unwrap();
    assert_eq!(content, b"IMAGE".to_vec());
}

#[tokio::test]
async fn test_artifacts_hidden_until_job_finishes() {
    let server = TestServer::start().await.unwrap();
    let client = server.worker_client();
    let job = client.submit_job("qemu", "x86_64", vec![]).await.unwrap();
    let lease = client.request_job("x86_64", &qemu()).await.unwrap().unwrap();

    client
        .upload_artifact(lease.token, "log.txt", b"partial".to_vec())
        .await
        .unwrap();
    let err = client.download_artifact(job.id, "log.txt").await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));

    client
        .upload_artifact(lease.token, "log.txt", b"complete".to_vec())
        .await
        .unwrap();
    client
        .complete(lease.token, TerminalStatus::Failed, json!({"error": "boom"}))
        .await
        .unwrap();

    let content = client.download_artifact(job.id, "log.txt").await.unwrap();
    assert_eq!(content, b"complete".to_vec());
}

#[tokio::test]
async fn test_expired_lease_is_requeued() {
    let server = TestServer::start_with(short_leases()).await.unwrap();
    let client = server.worker_client();
    let job = client.submit_job("qemu", "x86_64", vec![]).await.unwrap();
    let first = client.request_job("x86_64", &qemu()).await.unwrap().unwrap();

    let requeued = wait_for(Duration::from_secs(10), Duration::from_millis(200), || {
        let client = client.clone();
        async move {
            client
                .get_job(job.id)
                .await
                .map(|j| j.status == JobStatus::Pending && j.attempt == 2)
                .unwrap_or(false)
        }
    })
    .await;
    assert!(requeued, "job was not requeued after its lease expired");

    let err = client.heartbeat(first.token).await.unwrap_err();
    assert!(err.is_lease_lost());

    let second = client.request_job("x86_64", &qemu()).await.unwrap().unwrap();
    assert_ne!(second.token, first.token);
    assert_eq!(second.attempt, 2);
}

#[tokio::test]
async fn test_heartbeats_keep_lease_alive() {
    let server = TestServer::start_with(short_leases()).await.unwrap();
    let client = server.worker_client();
    let job = client.submit_job("qemu", "x86_64", vec![]).await.unwrap();
    let lease = client.request_job("x86_64", &qemu()).await.unwrap().unwrap();

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(400)).await;
        client.heartbeat(lease.token).await.unwrap();
    }

    let current = client.get_job(job.id).await.unwrap();
    assert_eq!(current.status, JobStatus::Running);
    assert_eq!(current.attempt, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_get_distinct_jobs() {
    let server = TestServer::start().await.unwrap();
    let client = server.worker_client();
    for i in 0..10u8 {
        client.submit_job("qemu", "x86_64", vec![i]).await.unwrap();
    }

    let claims = (0..16).map(|_| {
        let client = client.clone();
        async move { client.request_job("x86_64", &qemu()).await }
    });
    let leases: Vec<_> = join_all(claims)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap())
        .collect();

    assert_eq!(leases.len(), 10);
    let ids: HashSet<_> = leases.iter().map(|l| l.job_id).collect();
    assert_eq!(ids.len(), 10);
}

#[tokio::test]
async fn test_queue_status() {
    let server = TestServer::start().await.unwrap();
    let client = server.worker_client();
    client.submit_job("qemu", "x86_64", vec![]).await.unwrap();
    client.submit_job("qemu", "x86_64", vec![]).await.unwrap();
    client.request_job("x86_64", &qemu()).await.unwrap().unwrap();

    let status = client.queue_status().await.unwrap();
    assert_eq!(status.pending, 1);
    assert_eq!(status.running, 1);
    assert_eq!(status.max_attempts, 3);
    assert!(status.oldest_pending_age_secs.is_some());
}

#[tokio::test]
async fn test_rejects_oversized_payload() {
    let mut config = ServerConfig::default();
    config.lease.max_payload_bytes = 8;
    let server = TestServer::start_with(config).await.unwrap();

    let err = server
        .worker_client()
        .submit_job("qemu", "x86_64", vec![0; 9])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rejected { status: 413, .. }));
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let server = TestServer::start().await.unwrap();
    let resp = server
        .api()
        .get("/api/v1/jobs/00000000-0000-0000-0000-000000000000")
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["message"].is_string());
}
