use tokio::sync::broadcast;

use crate::store::Job;

/// Lifecycle transition kinds published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEventKind {
    Created,
    Assigned,
    Completed,
    Failed,
    Quarantined,
}

impl JobEventKind {
    /// Wire name of the event, as emitted on the SSE stream.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventKind::Created => "job:created",
            JobEventKind::Assigned => "job:assigned",
            JobEventKind::Completed => "job:completed",
            JobEventKind::Failed => "job:failed",
            JobEventKind::Quarantined => "job:quarantined",
        }
    }
}

/// A lifecycle transition together with the job's state after it.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: Job,
}

/// Best-effort fan-out of job lifecycle transitions.
///
/// Purely observational: delivery is unacknowledged, publishing to zero
/// subscribers is a no-op, and a lagging subscriber silently loses events
/// (it recovers via its own periodic full re-fetch). Nothing here
/// participates in correctness.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, kind: JobEventKind, job: Job) {
        // A send error only means there are no subscribers right now
        let _ = self.tx.send(JobEvent { kind, job });
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
