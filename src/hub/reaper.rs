use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::store::JobStore;

/// Background sweep that reconciles state left behind by crashed workers
/// and runaway executions.
///
/// The reaper never coordinates with any worker; it only inspects
/// timestamps. Workers that were reaped discover it through `conflict`
/// responses on their next heartbeat or result submission.
pub struct Reaper {
    store: JobStore,
    interval: Duration,
}

impl Reaper {
    pub fn new(store: JobStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Sweep on a fixed period until the shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.store.reap(Utc::now().timestamp_millis());
                    if report.total() > 0 {
                        tracing::info!(
                            reclaimed = report.reclaimed,
                            quarantined = report.quarantined,
                            timed_out = report.timed_out,
                            "Reaper sweep"
                        );
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Reaper stopping");
                    break;
                }
            }
        }
    }
}
