//! Test harness for hub integration tests.
//!
//! Spawns a real hub (router over an in-memory store) on an ephemeral port
//! and hands out both the HTTP base URL and direct store handles, so tests
//! can drive the wire API and then inspect state underneath it.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use forge_fleet::events::EventBroadcaster;
use forge_fleet::hub::{router, HubState};
use forge_fleet::store::{Db, JobStore, StorePolicy, WorkerRegistry};

/// Handle to a running test hub. Dropping it tears the server down.
pub struct TestHub {
    pub base_url: String,
    pub jobs: JobStore,
    pub workers: WorkerRegistry,
    pub events: EventBroadcaster,
    server_handle: JoinHandle<()>,
}

impl TestHub {
    pub async fn spawn() -> Self {
        Self::spawn_with_auth(None).await
    }

    pub async fn spawn_with_auth(auth_token: Option<String>) -> Self {
        let db = Db::open_in_memory().expect("in-memory db opens");
        let jobs = JobStore::new(db.clone(), StorePolicy::default());
        let workers = WorkerRegistry::new(db);
        let events = EventBroadcaster::default();

        let state = HubState {
            jobs: jobs.clone(),
            workers: workers.clone(),
            events: events.clone(),
            auth_token,
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("ephemeral port binds");
        let addr = listener.local_addr().expect("local addr");

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router(state)).await {
                tracing::error!("test hub server error: {}", e);
            }
        });

        TestHub {
            base_url: format!("http://{}", addr),
            jobs,
            workers,
            events,
            server_handle,
        }
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
#[allow(dead_code)]
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(50)).await;
    assert!(result, "{}", message);
}
