//! End-to-end tests of the worker agent against a real hub.

mod test_harness;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use forge_fleet::agent::{sha256_hex, HubClient, WorkerAgent};
use forge_fleet::config::WorkerConfig;
use forge_fleet::store::{JobStatus, NewJob};
use test_harness::{assert_eventually, TestHub};

fn fast_worker_config(hub_url: &str, cache_dir: &std::path::Path) -> WorkerConfig {
    let mut config = WorkerConfig::new(hub_url.to_string(), "agent-1".to_string());
    config.poll_interval_ms = 25;
    config.heartbeat_interval_ms = 25;
    config.shutdown_grace_ms = 2_000;
    config.solver_cache_dir = cache_dir.to_path_buf();
    config
}

#[tokio::test]
async fn agent_completes_a_job_without_a_solver() {
    let hub = TestHub::spawn().await;
    let cache = tempfile::tempdir().unwrap();
    let job = hub.jobs.create(NewJob::new("solve")).unwrap();

    let shutdown = CancellationToken::new();
    let agent = WorkerAgent::new(fast_worker_config(&hub.base_url, cache.path()));
    let handle = tokio::spawn(agent.run(shutdown.clone()));

    assert_eventually(
        || async {
            hub.jobs.get(&job.id).unwrap().unwrap().status == JobStatus::Completed
        },
        Duration::from_secs(5),
        "agent should complete the job",
    )
    .await;

    let done = hub.jobs.get(&job.id).unwrap().unwrap();
    assert_eq!(done.worker_id.as_deref(), Some("agent-1"));
    let result = done.result.expect("result recorded");
    assert!(result.contains("no solver configured"));
    assert_eq!(done.result_hash.as_deref(), Some(sha256_hex(result.as_bytes()).as_str()));

    // Registration happened as a side effect of startup
    let worker = hub.workers.get("agent-1").unwrap();
    assert!(worker.is_some());

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn agent_runs_a_cached_solver_and_heartbeats_while_executing() {
    let hub = TestHub::spawn().await;
    let cache = tempfile::tempdir().unwrap();

    // Seed the solver cache so resolution is a pure cache hit
    let checksum = seed_solver(&cache, b"#!/bin/sh\nsleep 0.3\nprintf 'slow-done'\n");

    let job = hub
        .jobs
        .create(NewJob::new("solve").solver("http://127.0.0.1:1/solver", Some(checksum)))
        .unwrap();

    let shutdown = CancellationToken::new();
    let agent = WorkerAgent::new(fast_worker_config(&hub.base_url, cache.path()));
    let handle = tokio::spawn(agent.run(shutdown.clone()));

    // The first heartbeat fires immediately and drives assigned -> running
    assert_eventually(
        || async { hub.jobs.get(&job.id).unwrap().unwrap().status == JobStatus::Running },
        Duration::from_secs(5),
        "job should be running while the solver sleeps",
    )
    .await;

    assert_eventually(
        || async { hub.jobs.get(&job.id).unwrap().unwrap().status == JobStatus::Completed },
        Duration::from_secs(5),
        "job should complete when the solver exits",
    )
    .await;

    let done = hub.jobs.get(&job.id).unwrap().unwrap();
    assert_eq!(done.result.as_deref(), Some("slow-done"));
    assert_eq!(done.result_hash.as_deref(), Some(sha256_hex(b"slow-done").as_str()));

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn failed_solver_resolution_is_reported_as_failure() {
    let hub = TestHub::spawn().await;
    let cache = tempfile::tempdir().unwrap();

    // Unreachable solver URL and an empty cache: resolution must fail
    let job = hub
        .jobs
        .create(
            NewJob::new("solve")
                .max_attempts(1)
                .solver("http://127.0.0.1:1/solver".to_string(), None),
        )
        .unwrap();

    let shutdown = CancellationToken::new();
    let agent = WorkerAgent::new(fast_worker_config(&hub.base_url, cache.path()));
    let handle = tokio::spawn(agent.run(shutdown.clone()));

    assert_eventually(
        || async { hub.jobs.get(&job.id).unwrap().unwrap().status == JobStatus::Quarantined },
        Duration::from_secs(5),
        "resolution failure should exhaust the single attempt",
    )
    .await;

    let failed = hub.jobs.get(&job.id).unwrap().unwrap();
    assert!(failed.fail_history.contains("download failed"));

    shutdown.cancel();
    handle.await.unwrap();
}

fn seed_solver(cache: &tempfile::TempDir, script: &[u8]) -> String {
    let checksum = sha256_hex(script);
    let path = cache.path().join(&checksum);
    std::fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    checksum
}

#[tokio::test]
async fn shutdown_drains_the_in_flight_job_within_the_grace_window() {
    let hub = TestHub::spawn().await;
    let cache = tempfile::tempdir().unwrap();
    let checksum = seed_solver(&cache, b"#!/bin/sh\nsleep 0.5\nprintf 'drained'\n");

    let job = hub
        .jobs
        .create(NewJob::new("solve").solver("http://127.0.0.1:1/solver", Some(checksum)))
        .unwrap();

    let shutdown = CancellationToken::new();
    let agent = WorkerAgent::new(fast_worker_config(&hub.base_url, cache.path()));
    let handle = tokio::spawn(agent.run(shutdown.clone()));

    assert_eventually(
        || async { hub.jobs.get(&job.id).unwrap().unwrap().status == JobStatus::Running },
        Duration::from_secs(5),
        "job should be running before the shutdown signal",
    )
    .await;

    // Cancel mid-execution: the loop must finish the attempt before exiting
    shutdown.cancel();
    handle.await.unwrap();

    let done = hub.jobs.get(&job.id).unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result.as_deref(), Some("drained"));
}

#[tokio::test]
async fn shutdown_abandons_a_job_that_overruns_the_grace_window() {
    let hub = TestHub::spawn().await;
    let cache = tempfile::tempdir().unwrap();
    let checksum = seed_solver(&cache, b"#!/bin/sh\nsleep 30\n");

    let job = hub
        .jobs
        .create(NewJob::new("solve").solver("http://127.0.0.1:1/solver", Some(checksum)))
        .unwrap();

    let mut config = fast_worker_config(&hub.base_url, cache.path());
    config.shutdown_grace_ms = 200;

    let shutdown = CancellationToken::new();
    let agent = WorkerAgent::new(config);
    let handle = tokio::spawn(agent.run(shutdown.clone()));

    assert_eventually(
        || async { hub.jobs.get(&job.id).unwrap().unwrap().status == JobStatus::Running },
        Duration::from_secs(5),
        "job should be running before the shutdown signal",
    )
    .await;

    shutdown.cancel();
    // The grace window is 200ms; the loop must give up long before the
    // solver's 30s sleep would end
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("agent exits once the grace window elapses")
        .unwrap();

    // The abandoned job is left for the reaper, not completed
    let left = hub.jobs.get(&job.id).unwrap().unwrap();
    assert_ne!(left.status, JobStatus::Completed);
    assert_eq!(left.worker_id.as_deref(), Some("agent-1"));
}

#[tokio::test]
async fn agent_survives_an_unreachable_hub() {
    let cache = tempfile::tempdir().unwrap();
    // Nothing is listening here
    let config = fast_worker_config("http://127.0.0.1:1", cache.path());

    let shutdown = CancellationToken::new();
    let agent = WorkerAgent::new(config);
    let handle = tokio::spawn(agent.run(shutdown.clone()));

    // A few poll cycles against the dead hub must not crash the loop
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn client_claim_against_dead_hub_is_a_clean_miss() {
    let client = HubClient::new("http://127.0.0.1:1", None);
    assert!(client.claim("w1", &[]).await.is_none());
}
