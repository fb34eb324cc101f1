use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Quarantined,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Assigned => "assigned",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Quarantined => "quarantined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "assigned" => Some(JobStatus::Assigned),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "quarantined" => Some(JobStatus::Quarantined),
            _ => None,
        }
    }

    /// Terminal states never leave on their own; quarantined additionally
    /// requires operator intervention.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Quarantined
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted unit of dispatchable work.
///
/// `params`, `result` and `fail_history` are opaque serialized payloads; the
/// store passes them through unexamined. All timestamps are epoch
/// milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub params: String,
    pub status: JobStatus,
    pub priority: i64,
    pub worker_id: Option<String>,
    pub result: Option<String>,
    pub result_hash: Option<String>,
    pub created_at: i64,
    pub claimed_at: Option<i64>,
    pub heartbeat_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub attempts: i64,
    pub max_attempts: i64,
    pub max_runtime_ms: i64,
    pub fail_reason: Option<String>,
    pub fail_history: String,
    pub solver_url: Option<String>,
    pub solver_checksum: Option<String>,
}

/// One entry of the append-only failure log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailEntry {
    pub reason: String,
    pub worker_id: String,
    pub ts: i64,
}

/// Creation parameters for a new job. Everything except the type has a
/// serviceable default.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: String,
    pub params: String,
    pub priority: i64,
    pub max_attempts: i64,
    pub max_runtime_ms: i64,
    pub solver_url: Option<String>,
    pub solver_checksum: Option<String>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            params: "{}".to_string(),
            priority: 0,
            max_attempts: 3,
            max_runtime_ms: 300_000,
            solver_url: None,
            solver_checksum: None,
        }
    }

    pub fn params(mut self, params: impl Into<String>) -> Self {
        self.params = params.into();
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_attempts(mut self, max_attempts: i64) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn max_runtime_ms(mut self, max_runtime_ms: i64) -> Self {
        self.max_runtime_ms = max_runtime_ms;
        self
    }

    pub fn solver(mut self, url: impl Into<String>, checksum: Option<String>) -> Self {
        self.solver_url = Some(url.into());
        self.solver_checksum = checksum;
        self
    }
}

/// Generate an opaque job identifier.
pub(crate) fn new_job_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Current wall clock in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Outcome of a heartbeat call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Ok,
    NotFound,
    /// The job is held by a different worker; the caller lost ownership.
    Conflict,
}

/// Outcome of a result submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Ok {
        /// True when the job was already completed with a matching
        /// idempotency key; a safe replay, not an error.
        duplicate: bool,
    },
    NotFound,
    Conflict,
}

/// Outcome of a failure report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Ok { new_status: JobStatus },
    NotFound,
    Conflict,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Assigned,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Quarantined,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Assigned.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Quarantined.is_terminal());
    }

    #[test]
    fn new_job_defaults() {
        let new = NewJob::new("optimize");
        assert_eq!(new.params, "{}");
        assert_eq!(new.priority, 0);
        assert_eq!(new.max_attempts, 3);
        assert_eq!(new.max_runtime_ms, 300_000);
        assert!(new.solver_url.is_none());
    }

    #[test]
    fn job_serializes_type_field() {
        let new = NewJob::new("optimize");
        let job = Job {
            id: new_job_id(),
            job_type: new.job_type,
            params: new.params,
            status: JobStatus::Pending,
            priority: 0,
            worker_id: None,
            result: None,
            result_hash: None,
            created_at: now_ms(),
            claimed_at: None,
            heartbeat_at: None,
            completed_at: None,
            attempts: 0,
            max_attempts: 3,
            max_runtime_ms: 300_000,
            fail_reason: None,
            fail_history: "[]".to_string(),
            solver_url: None,
            solver_checksum: None,
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "optimize");
        assert_eq!(json["status"], "pending");
    }
}
