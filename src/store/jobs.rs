use std::collections::HashMap;

use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use crate::error::Result;
use crate::store::db::Db;
use crate::store::job::{
    new_job_id, now_ms, FailEntry, FailOutcome, HeartbeatOutcome, Job, JobStatus, NewJob,
    SubmitOutcome,
};

/// Policy constants the store consults but never derives.
#[derive(Debug, Clone, Copy)]
pub struct StorePolicy {
    /// An assigned/running job whose heartbeat is older than this is
    /// presumed abandoned and eligible for reclaim.
    pub liveness_timeout_ms: i64,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            liveness_timeout_ms: 60_000,
        }
    }
}

/// Counts of the reaper's three sweeps, for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Jobs returned to pending after their worker went silent
    pub reclaimed: usize,
    /// Pending jobs quarantined for exhausting their attempts
    pub quarantined: usize,
    /// Assigned/running jobs quarantined for exceeding max_runtime_ms
    pub timed_out: usize,
}

impl ReapReport {
    pub fn total(&self) -> usize {
        self.reclaimed + self.quarantined + self.timed_out
    }
}

/// Persisted job table and its state machine.
///
/// Every operation acquires the connection mutex for its full duration, so
/// concurrent callers observe each transition as a single atomic step. The
/// claim path additionally wraps its read-then-update in a SQLite
/// transaction: two concurrent claims can never both see the same pending
/// row.
#[derive(Clone)]
pub struct JobStore {
    db: Db,
    policy: StorePolicy,
}

const JOB_COLUMNS: &str = "id, type, params, status, priority, worker_id, result, result_hash, \
     created_at, claimed_at, heartbeat_at, completed_at, attempts, max_attempts, \
     max_runtime_ms, fail_reason, fail_history, solver_url, solver_checksum";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status_str: String = row.get("status")?;
    let status = JobStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown job status: {status_str}").into(),
        )
    })?;
    Ok(Job {
        id: row.get("id")?,
        job_type: row.get("type")?,
        params: row.get("params")?,
        status,
        priority: row.get("priority")?,
        worker_id: row.get("worker_id")?,
        result: row.get("result")?,
        result_hash: row.get("result_hash")?,
        created_at: row.get("created_at")?,
        claimed_at: row.get("claimed_at")?,
        heartbeat_at: row.get("heartbeat_at")?,
        completed_at: row.get("completed_at")?,
        attempts: row.get("attempts")?,
        max_attempts: row.get("max_attempts")?,
        max_runtime_ms: row.get("max_runtime_ms")?,
        fail_reason: row.get("fail_reason")?,
        fail_history: row.get("fail_history")?,
        solver_url: row.get("solver_url")?,
        solver_checksum: row.get("solver_checksum")?,
    })
}

impl JobStore {
    pub fn new(db: Db, policy: StorePolicy) -> Self {
        Self { db, policy }
    }

    /// Insert a new pending job and return it.
    pub fn create(&self, new: NewJob) -> Result<Job> {
        let job = Job {
            id: new_job_id(),
            job_type: new.job_type,
            params: new.params,
            status: JobStatus::Pending,
            priority: new.priority,
            worker_id: None,
            result: None,
            result_hash: None,
            created_at: now_ms(),
            claimed_at: None,
            heartbeat_at: None,
            completed_at: None,
            attempts: 0,
            max_attempts: new.max_attempts,
            max_runtime_ms: new.max_runtime_ms,
            fail_reason: None,
            fail_history: "[]".to_string(),
            solver_url: new.solver_url,
            solver_checksum: new.solver_checksum,
        };
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO jobs (id, type, params, priority, created_at, max_attempts, \
             max_runtime_ms, solver_url, solver_checksum) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.job_type,
                job.params,
                job.priority,
                job.created_at,
                job.max_attempts,
                job.max_runtime_ms,
                job.solver_url,
                job.solver_checksum,
            ],
        )?;
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.db.lock();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// List jobs, newest first within a priority band, optionally filtered
    /// by status. `limit` is capped at 200; zero means zero rows.
    pub fn list(&self, status: Option<JobStatus>, limit: i64, offset: i64) -> Result<Vec<Job>> {
        let limit = limit.min(200).max(0);
        let offset = offset.max(0);
        let conn = self.db.lock();
        let mut jobs = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 \
                     ORDER BY priority DESC, created_at DESC LIMIT ?2 OFFSET ?3"
                ))?;
                let rows = stmt.query_map(params![status.as_str(), limit, offset], job_from_row)?;
                for row in rows {
                    jobs.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs \
                     ORDER BY priority DESC, created_at DESC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt.query_map(params![limit, offset], job_from_row)?;
                for row in rows {
                    jobs.push(row?);
                }
            }
        }
        Ok(jobs)
    }

    /// Atomically claim the highest-priority, oldest pending job.
    ///
    /// The selected row is transitioned to `assigned` and stamped with the
    /// caller's worker id before the transaction commits; `attempts` is
    /// incremented here and nowhere else. Returns `None` when no eligible
    /// job exists.
    pub fn claim(&self, worker_id: &str, types: &[String]) -> Result<Option<Job>> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let selected = if types.is_empty() {
            tx.query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' \
                     ORDER BY priority DESC, created_at ASC LIMIT 1"
                ),
                [],
                job_from_row,
            )
            .optional()?
        } else {
            let placeholders = vec!["?"; types.len()].join(",");
            tx.query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs \
                     WHERE status = 'pending' AND type IN ({placeholders}) \
                     ORDER BY priority DESC, created_at ASC LIMIT 1"
                ),
                params_from_iter(types.iter()),
                job_from_row,
            )
            .optional()?
        };

        let Some(mut job) = selected else {
            return Ok(None);
        };

        let now = now_ms();
        tx.execute(
            "UPDATE jobs SET status = 'assigned', worker_id = ?1, claimed_at = ?2, \
             heartbeat_at = ?2, attempts = attempts + 1 WHERE id = ?3",
            params![worker_id, now, job.id],
        )?;
        tx.commit()?;

        job.status = JobStatus::Assigned;
        job.worker_id = Some(worker_id.to_string());
        job.claimed_at = Some(now);
        job.heartbeat_at = Some(now);
        job.attempts += 1;
        Ok(Some(job))
    }

    /// Record a liveness signal from the holding worker.
    ///
    /// The first heartbeat after a claim marks true execution start and
    /// moves the job from `assigned` to `running`. A caller that is not the
    /// current holder gets `Conflict` and nothing is mutated.
    pub fn heartbeat(&self, job_id: &str, worker_id: &str) -> Result<HeartbeatOutcome> {
        let conn = self.db.lock();
        let row: Option<(Option<String>, String)> = conn
            .query_row(
                "SELECT worker_id, status FROM jobs WHERE id = ?1",
                params![job_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((holder, status)) = row else {
            return Ok(HeartbeatOutcome::NotFound);
        };
        if holder.as_deref() != Some(worker_id) {
            return Ok(HeartbeatOutcome::Conflict);
        }

        let new_status = if status == "assigned" {
            "running"
        } else {
            status.as_str()
        };
        conn.execute(
            "UPDATE jobs SET heartbeat_at = ?1, status = ?2 WHERE id = ?3",
            params![now_ms(), new_status, job_id],
        )?;
        Ok(HeartbeatOutcome::Ok)
    }

    /// Accept a completed result, idempotently.
    ///
    /// A resubmission whose idempotency key (or, failing that, result hash)
    /// matches the stored `result_hash` is a safe replay after a lost
    /// response: `Ok { duplicate: true }` with no state change. A mismatch
    /// is a `Conflict`. `completed_at` is stamped exactly once.
    pub fn submit_result(
        &self,
        job_id: &str,
        worker_id: &str,
        result: &str,
        result_hash: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<SubmitOutcome> {
        let conn = self.db.lock();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id],
                job_from_row,
            )
            .optional()?;
        let Some(job) = job else {
            return Ok(SubmitOutcome::NotFound);
        };

        if job.status == JobStatus::Completed {
            let key = idempotency_key.or(result_hash);
            if key.is_some() && job.result_hash.as_deref() == key {
                return Ok(SubmitOutcome::Ok { duplicate: true });
            }
            return Ok(SubmitOutcome::Conflict);
        }

        if job.worker_id.as_deref() != Some(worker_id) {
            return Ok(SubmitOutcome::Conflict);
        }

        conn.execute(
            "UPDATE jobs SET status = 'completed', result = ?1, result_hash = ?2, \
             completed_at = ?3 WHERE id = ?4",
            params![result, result_hash, now_ms(), job_id],
        )?;
        Ok(SubmitOutcome::Ok { duplicate: false })
    }

    /// Record a failed attempt.
    ///
    /// `attempts` was already incremented at claim time, so the decision is
    /// immediate: exhausted jobs are quarantined, everything else returns to
    /// pending with its worker fields cleared so any worker can reclaim it.
    pub fn fail(&self, job_id: &str, worker_id: &str, reason: &str) -> Result<FailOutcome> {
        let conn = self.db.lock();
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id],
                job_from_row,
            )
            .optional()?;
        let Some(job) = job else {
            return Ok(FailOutcome::NotFound);
        };
        if job.worker_id.as_deref() != Some(worker_id) {
            return Ok(FailOutcome::Conflict);
        }

        let mut history: Vec<FailEntry> =
            serde_json::from_str(&job.fail_history).unwrap_or_default();
        history.push(FailEntry {
            reason: reason.to_string(),
            worker_id: worker_id.to_string(),
            ts: now_ms(),
        });
        let history_json = serde_json::to_string(&history)?;

        let new_status = if job.attempts >= job.max_attempts {
            JobStatus::Quarantined
        } else {
            JobStatus::Pending
        };

        if new_status == JobStatus::Pending {
            conn.execute(
                "UPDATE jobs SET status = 'pending', worker_id = NULL, claimed_at = NULL, \
                 heartbeat_at = NULL, fail_reason = ?1, fail_history = ?2 WHERE id = ?3",
                params![reason, history_json, job_id],
            )?;
        } else {
            conn.execute(
                "UPDATE jobs SET status = 'quarantined', fail_reason = ?1, fail_history = ?2 \
                 WHERE id = ?3",
                params![reason, history_json, job_id],
            )?;
        }
        Ok(FailOutcome::Ok { new_status })
    }

    /// Cancel a job that has not started executing. Allowed only from
    /// `pending` or `assigned`; returns false from any other state.
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        let conn = self.db.lock();
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', fail_reason = 'cancelled' \
             WHERE id = ?1 AND status IN ('pending', 'assigned')",
            params![job_id],
        )?;
        Ok(changed > 0)
    }

    /// In-flight job counts per worker.
    pub fn counts_by_worker(&self) -> Result<HashMap<String, i64>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT worker_id, COUNT(*) FROM jobs \
             WHERE status IN ('assigned', 'running') AND worker_id IS NOT NULL \
             GROUP BY worker_id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut counts = HashMap::new();
        for row in rows {
            let (worker_id, count) = row?;
            counts.insert(worker_id, count);
        }
        Ok(counts)
    }

    /// Run the three reconciliation sweeps against the clock value `now`.
    ///
    /// Each sweep is one bulk conditional update and fails independently of
    /// the others; errors are logged, never propagated, so a broken sweep
    /// cannot stall the reaper.
    pub fn reap(&self, now: i64) -> ReapReport {
        let mut report = ReapReport::default();
        let conn = self.db.lock();

        // 1. Reclaim: worker presumed dead or partitioned.
        let stale_cutoff = now - self.policy.liveness_timeout_ms;
        match conn.execute(
            "UPDATE jobs SET status = 'pending', worker_id = NULL, claimed_at = NULL, \
             heartbeat_at = NULL \
             WHERE status IN ('assigned', 'running') \
               AND heartbeat_at IS NOT NULL AND heartbeat_at < ?1 \
               AND attempts < max_attempts",
            params![stale_cutoff],
        ) {
            Ok(n) => report.reclaimed = n,
            Err(e) => tracing::warn!(error = %e, "Reaper stale-reclaim sweep failed"),
        }

        // 2. Exhausted: no attempts left, whether stranded in pending after
        // repeated reclaims or gone silent on the final attempt.
        match conn.execute(
            "UPDATE jobs SET status = 'quarantined' \
             WHERE attempts >= max_attempts \
               AND (status = 'pending' \
                    OR (status IN ('assigned', 'running') \
                        AND heartbeat_at IS NOT NULL AND heartbeat_at < ?1))",
            params![stale_cutoff],
        ) {
            Ok(n) => report.quarantined = n,
            Err(e) => tracing::warn!(error = %e, "Reaper attempt-exhaustion sweep failed"),
        }

        // 3. Runaway: over the wall-clock budget, not worth retrying.
        match conn.execute(
            "UPDATE jobs SET status = 'quarantined', fail_reason = 'max_runtime_exceeded' \
             WHERE status IN ('assigned', 'running') \
               AND claimed_at IS NOT NULL \
               AND (?1 - claimed_at) > max_runtime_ms",
            params![now],
        ) {
            Ok(n) => report.timed_out = n,
            Err(e) => tracing::warn!(error = %e, "Reaper runtime sweep failed"),
        }

        report
    }

    #[cfg(test)]
    pub(crate) fn db(&self) -> &Db {
        &self.db
    }
}
