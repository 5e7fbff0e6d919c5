//! Job store and lease protocol against a real PostgreSQL.
//!
//! Run with: `cargo test -p kiln-tests --test postgres_tests --features integration`

#![cfg(feature = "integration")]

use chrono::Utc;
use futures::future::join_all;
use kiln_core::Error;
use kiln_core::ids::{JobId, LeaseToken};
use kiln_core::job::{CapabilityFilter, JobStatus, JobTransition, NewJob, TerminalStatus};
use kiln_scheduler::{LeaseConfig, LeaseManager, LeaseUpdate, StatusAggregator};
use kiln_server::ServerConfig;
use kiln_tests::{PostgresContext, TestServer};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

fn new_job(job_type: &str, arch: &str) -> NewJob {
    NewJob {
        id: JobId::new(),
        job_type: job_type.to_string(),
        arch: arch.to_string(),
        payload: b"manifest".to_vec(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_create_get_and_fifo() {
    let ctx = PostgresContext::start().await.expect("Failed to create context");
    let store = ctx.store();

    let first = store.create(new_job("qemu", "x86_64")).await.unwrap();
    store.create(new_job("ami", "x86_64")).await.unwrap();
    let third = store.create(new_job("qemu", "x86_64")).await.unwrap();
    assert!(first.sequence < third.sequence);

    let fetched = store.get(first.id).await.unwrap();
    assert_eq!(fetched.payload, b"manifest".to_vec());
    assert_eq!(fetched.attempt, 1);

    let pending = store
        .list_pending(&CapabilityFilter::new("qemu", "x86_64"), 10)
        .await
        .unwrap();
    let ids: Vec<_> = pending.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![first.id, third.id]);

    let err = store.get(JobId::new()).await.unwrap_err();
    assert!(matches!(err, Error::JobNotFound(_)));
}

#[tokio::test]
async fn test_compare_and_swap_checks_status_and_token() {
    let ctx = PostgresContext::start().await.unwrap();
    let store = ctx.store();
    let job = store.create(new_job("qemu", "x86_64")).await.unwrap();
    let now = Utc::now();

    let token = LeaseToken::generate();
    let claim = JobTransition::claim(&job, token, now, now);
    let running = store.compare_and_swap(job.id, claim.clone()).await.unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.token, Some(token));

    let err = store.compare_and_swap(job.id, claim).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    // A renewal carrying someone else's token does not match.
    let mut forged = running.clone();
    forged.token = Some(LeaseToken::generate());
    let err = store
        .compare_and_swap(job.id, JobTransition::renew(&forged, LeaseToken::generate(), now))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let found = store.get_by_token(token).await.unwrap().unwrap();
    assert_eq!(found.id, job.id);
}

#[tokio::test]
async fn test_lease_scenarios_on_postgres() {
    let ctx = PostgresContext::start().await.unwrap();
    let leases = LeaseManager::new(ctx.store(), LeaseConfig::default());
    let filter = CapabilityFilter::new("qemu", "x86_64");

    let job = leases.submit("qemu", "x86_64", b"M1".to_vec()).await.unwrap();
    let grant = leases.request_job(&filter).await.unwrap().unwrap();
    assert_eq!(grant.job.id, job.id);
    assert!(leases.request_job(&filter).await.unwrap().is_none());

    leases
        .renew_or_update(grant.token, LeaseUpdate::Heartbeat)
        .await
        .unwrap();
    let done = leases
        .renew_or_update(
            grant.token,
            LeaseUpdate::Complete {
                status: TerminalStatus::Finished,
                result: json!("R1"),
            },
        )
        .await
        .unwrap();
    assert_eq!(done.status, JobStatus::Finished);
    assert_eq!(done.result, Some(json!("R1")));
    assert!(done.lease_fields_consistent());

    let err = leases
        .renew_or_update(grant.token, LeaseUpdate::Heartbeat)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidToken));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_claims_have_one_winner_per_job() {
    let ctx = PostgresContext::start().await.unwrap();
    let leases = Arc::new(LeaseManager::new(ctx.store(), LeaseConfig::default()));
    for _ in 0..5 {
        leases.submit("qemu", "x86_64", vec![]).await.unwrap();
    }

    let claims = (0..24).map(|_| {
        let leases = leases.clone();
        tokio::spawn(async move {
            leases
                .request_job(&CapabilityFilter::new("qemu", "x86_64"))
                .await
        })
    });
    let grants: Vec<_> = join_all(claims)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(grants.len(), 5);
    let ids: HashSet<_> = grants.iter().map(|g| g.job.id).collect();
    assert_eq!(ids.len(), 5);
}

#[tokio::test]
async fn test_counts_on_postgres() {
    let ctx = PostgresContext::start().await.unwrap();
    let store = ctx.store();
    let leases = LeaseManager::new(store.clone(), LeaseConfig::default());
    leases.submit("qemu", "x86_64", vec![]).await.unwrap();
    leases.submit("qemu", "x86_64", vec![]).await.unwrap();
    leases
        .request_job(&CapabilityFilter::new("qemu", "x86_64"))
        .await
        .unwrap()
        .unwrap();

    let status = StatusAggregator::new(store, 3).snapshot().await.unwrap();
    assert_eq!(status.pending, 1);
    assert_eq!(status.running, 1);
    assert_eq!(status.exhausted, 0);
    assert!(status.oldest_pending_age_secs.is_some());
}

#[tokio::test]
async fn test_restart_keeps_jobs_and_lease_deadlines() {
    let ctx = PostgresContext::start().await.unwrap();
    let config = ServerConfig {
        database_url: Some(ctx.db_url().to_string()),
        ..Default::default()
    };

    let server = TestServer::start_with(config.clone()).await.unwrap();
    let client = server.worker_client();
    let pending = client.submit_job("qemu", "x86_64", b"P".to_vec()).await.unwrap();
    let running = client.submit_job("ami", "x86_64", b"R".to_vec()).await.unwrap();
    let lease = client
        .request_job("x86_64", &["ami".to_string()])
        .await
        .unwrap()
        .unwrap();
    let before = client.get_job(running.id).await.unwrap();
    let artifacts = server.stop().await.unwrap();

    let server = TestServer::start_in(config, artifacts).await.unwrap();
    let client = server.worker_client();

    let after = client.get_job(running.id).await.unwrap();
    assert_eq!(after.status, JobStatus::Running);
    assert_eq!(after.lease_expires_at, before.lease_expires_at);
    assert_eq!(client.get_job(pending.id).await.unwrap().status, JobStatus::Pending);

    // The lease issued before the restart is still the valid one.
    client
        .complete(lease.token, TerminalStatus::Finished, json!("ok"))
        .await
        .unwrap();
    assert_eq!(
        client.get_job(running.id).await.unwrap().status,
        JobStatus::Finished
    );
}
