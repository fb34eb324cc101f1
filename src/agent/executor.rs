use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::time::timeout;

use crate::store::Job;

/// How much of the captured error output makes it into a failure report.
const FAIL_REASON_LIMIT: usize = 500;

/// Result of one execution attempt.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed { result: String, result_hash: String },
    Failed { reason: String },
}

/// Execute a job's payload under its wall-clock budget.
///
/// With a solver the job runs as a subprocess that receives the opaque
/// params on the command line and in its environment; exceeding
/// `max_runtime_ms` forcibly terminates it. Without a solver the job is
/// informational and completes with a canned result.
pub async fn run_job(job: &Job, solver_path: Option<&Path>) -> ExecutionOutcome {
    let Some(solver_path) = solver_path else {
        let result = r#"{"status":"completed","message":"no solver configured"}"#.to_string();
        let result_hash = sha256_hex(result.as_bytes());
        return ExecutionOutcome::Completed {
            result,
            result_hash,
        };
    };

    let child = Command::new(solver_path)
        .arg("--params")
        .arg(&job.params)
        .env("JOB_ID", &job.id)
        .env("JOB_TYPE", &job.job_type)
        .env("JOB_PARAMS", &job.params)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            return ExecutionOutcome::Failed {
                reason: format!("failed to spawn solver: {e}"),
            }
        }
    };

    let budget = Duration::from_millis(job.max_runtime_ms.max(0) as u64);
    let output = match timeout(budget, child.wait_with_output()).await {
        // Dropping the future on timeout kills the child (kill_on_drop)
        Err(_) => {
            return ExecutionOutcome::Failed {
                reason: format!("execution timed out after {}ms", job.max_runtime_ms),
            }
        }
        Ok(Err(e)) => {
            return ExecutionOutcome::Failed {
                reason: format!("failed to collect solver output: {e}"),
            }
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return ExecutionOutcome::Failed {
            reason: format!(
                "exit code {:?}: {}",
                output.status.code(),
                truncate(&stderr, FAIL_REASON_LIMIT)
            ),
        };
    }

    let result = String::from_utf8_lossy(&output.stdout).to_string();
    let result_hash = sha256_hex(result.as_bytes());
    ExecutionOutcome::Completed {
        result,
        result_hash,
    }
}

/// Hex-encoded SHA-256 content hash.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn truncate(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}
