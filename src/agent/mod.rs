//! The worker agent: claims jobs from the hub, executes them, and reports
//! outcomes. The agent is deliberately stateless; everything it knows about
//! a job comes from the claim response, and every hub call is safe to lose.

pub mod client;
pub mod executor;
pub mod solver;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

pub use client::HubClient;
pub use executor::{run_job, sha256_hex, ExecutionOutcome};
pub use solver::{CachedSolverSource, SolverSource};

const SUBMIT_ATTEMPTS: u32 = 3;
const SUBMIT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Long-running claim/execute/report loop for one worker process.
pub struct WorkerAgent<S: SolverSource> {
    config: WorkerConfig,
    client: HubClient,
    solver: S,
}

impl WorkerAgent<CachedSolverSource> {
    pub fn new(config: WorkerConfig) -> Self {
        let client = HubClient::new(config.hub_url.clone(), config.auth_token.clone());
        let solver = CachedSolverSource::new(config.solver_cache_dir.clone());
        Self {
            config,
            client,
            solver,
        }
    }
}

impl<S: SolverSource> WorkerAgent<S> {
    pub fn with_solver_source(config: WorkerConfig, solver: S) -> Self {
        let client = HubClient::new(config.hub_url.clone(), config.auth_token.clone());
        Self {
            config,
            client,
            solver,
        }
    }

    /// Run until the shutdown token fires. An in-flight job is drained for
    /// up to the configured grace window before the loop exits.
    pub async fn run(self, shutdown: CancellationToken) {
        if self
            .client
            .register(
                &self.config.worker_id,
                self.config.name.as_deref(),
                self.config.cores,
                self.config.ram_gb,
                &self.config.tags,
            )
            .await
        {
            tracing::info!(
                worker_id = %self.config.worker_id,
                cores = self.config.cores,
                ram_gb = self.config.ram_gb,
                "Registered capabilities with hub"
            );
        } else {
            tracing::warn!(
                worker_id = %self.config.worker_id,
                "Registration failed, continuing anyway"
            );
        }

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self
                .client
                .claim(&self.config.worker_id, &self.config.types)
                .await
            {
                Some(job) => {
                    tracing::info!(job_id = %job.id, job_type = %job.job_type, "Claimed job");
                    self.execute_job(&job, &shutdown).await;
                }
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll_interval) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.config.worker_id, "Worker agent stopped");
    }

    /// Drive one claimed job to a reported outcome, with heartbeats running
    /// alongside. A shutdown during execution drains the attempt for up to
    /// the grace window, then abandons it for the reaper to reclaim.
    async fn execute_job(&self, job: &crate::store::Job, shutdown: &CancellationToken) {
        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.client.clone(),
            job.id.clone(),
            self.config.worker_id.clone(),
            Duration::from_millis(self.config.heartbeat_interval_ms),
            heartbeat_stop.clone(),
        ));

        let mut attempt = std::pin::pin!(self.run_attempt(job));
        tokio::select! {
            _ = &mut attempt => {}
            _ = shutdown.cancelled() => {
                let grace = Duration::from_millis(self.config.shutdown_grace_ms);
                tracing::info!(job_id = %job.id, grace_ms = self.config.shutdown_grace_ms, "Draining in-flight job");
                if tokio::time::timeout(grace, &mut attempt).await.is_err() {
                    tracing::warn!(job_id = %job.id, "Grace window elapsed, abandoning job to the reaper");
                }
            }
        }

        heartbeat_stop.cancel();
        let _ = heartbeat.await;
    }

    async fn run_attempt(&self, job: &crate::store::Job) {
        let solver_path = match &job.solver_url {
            None => None,
            Some(url) => {
                match self.solver.resolve(url, job.solver_checksum.as_deref()).await {
                    Ok(path) => Some(path),
                    Err(reason) => {
                        tracing::warn!(job_id = %job.id, %reason, "Solver resolution failed");
                        self.client
                            .report_failure(&job.id, &self.config.worker_id, &reason)
                            .await;
                        return;
                    }
                }
            }
        };

        match run_job(job, solver_path.as_deref()).await {
            ExecutionOutcome::Completed {
                result,
                result_hash,
            } => {
                self.submit_with_retry(&job.id, &result, &result_hash).await;
            }
            ExecutionOutcome::Failed { reason } => {
                tracing::warn!(job_id = %job.id, %reason, "Job execution failed");
                self.client
                    .report_failure(&job.id, &self.config.worker_id, &reason)
                    .await;
            }
        }
    }

    /// Result submission is idempotent on the hub side, so blind retries
    /// after transport failures cannot double-complete a job.
    async fn submit_with_retry(&self, job_id: &str, result: &str, result_hash: &str) {
        for attempt in 1..=SUBMIT_ATTEMPTS {
            if self
                .client
                .submit_result(job_id, &self.config.worker_id, result, result_hash)
                .await
            {
                tracing::info!(job_id, "Result submitted");
                return;
            }
            tracing::warn!(job_id, attempt, "Result submission failed");
            if attempt < SUBMIT_ATTEMPTS {
                tokio::time::sleep(SUBMIT_RETRY_DELAY).await;
            }
        }
        tracing::error!(job_id, "Result lost after {SUBMIT_ATTEMPTS} submission attempts");
    }
}

/// Periodic keep-alive for one in-flight job. The first beat fires
/// immediately, which is what moves the job from `assigned` to `running`
/// on the hub. A `conflict` response means the job was reassigned; the
/// loop keeps going and lets the final submit/fail call surface it.
async fn heartbeat_loop(
    client: HubClient,
    job_id: String,
    worker_id: String,
    interval: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !client.heartbeat(&job_id, &worker_id).await {
                    tracing::warn!(job_id = %job_id, "Heartbeat rejected or lost");
                }
            }
            _ = stop.cancelled() => break,
        }
    }
}
