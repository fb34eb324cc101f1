use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::error::{FleetError, Result};
use crate::store::{Job, NewJob};

const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);
const RESULT_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client for the hub's coordination API.
///
/// Worker-facing calls swallow transport failures and map them to
/// "no effect" outcomes: a failed claim is indistinguishable from no job
/// being available, and the agent loop never crashes on network errors.
/// The CLI-facing calls surface errors instead.
#[derive(Clone)]
pub struct HubClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl HubClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.post(format!("{}{}", self.base, path));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http.get(format!("{}{}", self.base, path))
    }

    // -----------------------------------------------------------------------
    // Worker-facing calls (best-effort)
    // -----------------------------------------------------------------------

    /// Advertise capabilities. Best-effort: a failure is logged by the
    /// caller, never fatal.
    pub async fn register(
        &self,
        worker_id: &str,
        name: Option<&str>,
        cores: u32,
        ram_gb: f64,
        tags: &[String],
    ) -> bool {
        let body = json!({
            "worker_id": worker_id,
            "name": name,
            "cores": cores,
            "ram_gb": ram_gb,
            "tags": tags,
        });
        match self
            .post("/workers/register")
            .timeout(CONTROL_TIMEOUT)
            .json(&body)
            .send()
            .await
        {
            Ok(res) => res.status().is_success(),
            Err(_) => false,
        }
    }

    /// Atomically claim the next eligible job. `None` covers both "no job
    /// available" and any transport failure.
    pub async fn claim(&self, worker_id: &str, types: &[String]) -> Option<Job> {
        let mut body = json!({ "worker_id": worker_id });
        if !types.is_empty() {
            body["types"] = json!(types);
        }
        let res = self
            .post("/jobs/claim")
            .timeout(CONTROL_TIMEOUT)
            .json(&body)
            .send()
            .await
            .ok()?;
        if res.status() == StatusCode::NO_CONTENT || !res.status().is_success() {
            return None;
        }
        res.json::<Job>().await.ok()
    }

    pub async fn heartbeat(&self, job_id: &str, worker_id: &str) -> bool {
        match self
            .post(&format!("/jobs/{job_id}/heartbeat"))
            .timeout(CONTROL_TIMEOUT)
            .json(&json!({ "worker_id": worker_id }))
            .send()
            .await
        {
            Ok(res) => res.status().is_success(),
            Err(_) => false,
        }
    }

    /// Submit a completed result. The hash doubles as the idempotency key,
    /// so retrying after an ambiguous outcome is safe.
    pub async fn submit_result(
        &self,
        job_id: &str,
        worker_id: &str,
        result: &str,
        result_hash: &str,
    ) -> bool {
        match self
            .post(&format!("/jobs/{job_id}/result"))
            .timeout(RESULT_TIMEOUT)
            .header("X-Idempotency-Key", result_hash)
            .json(&json!({
                "worker_id": worker_id,
                "result": result,
                "result_hash": result_hash,
            }))
            .send()
            .await
        {
            Ok(res) => res.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn report_failure(&self, job_id: &str, worker_id: &str, reason: &str) -> bool {
        match self
            .post(&format!("/jobs/{job_id}/fail"))
            .timeout(CONTROL_TIMEOUT)
            .json(&json!({ "worker_id": worker_id, "reason": reason }))
            .send()
            .await
        {
            Ok(res) => res.status().is_success(),
            Err(_) => false,
        }
    }

    // -----------------------------------------------------------------------
    // CLI-facing calls (errors surfaced)
    // -----------------------------------------------------------------------

    pub async fn create_job(&self, new: &NewJob) -> Result<Value> {
        let params: Value = serde_json::from_str(&new.params)
            .unwrap_or_else(|_| Value::String(new.params.clone()));
        let body = json!({
            "type": new.job_type,
            "params": params,
            "priority": new.priority,
            "max_attempts": new.max_attempts,
            "max_runtime_ms": new.max_runtime_ms,
            "solver_url": new.solver_url,
            "solver_checksum": new.solver_checksum,
        });
        let res = self
            .post("/jobs")
            .timeout(CONTROL_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        if res.status() == StatusCode::UNAUTHORIZED {
            return Err(FleetError::Unauthorized);
        }
        if !res.status().is_success() {
            return Err(FleetError::Internal(format!(
                "job creation failed: HTTP {}",
                res.status()
            )));
        }
        Ok(res.json().await?)
    }

    pub async fn list_jobs(&self, status: Option<&str>, limit: i64) -> Result<Vec<Job>> {
        let mut req = self
            .get("/jobs")
            .timeout(CONTROL_TIMEOUT)
            .query(&[("limit", limit.to_string())]);
        if let Some(status) = status {
            req = req.query(&[("status", status)]);
        }
        let res = req.send().await?;
        Ok(res.json().await?)
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        let res = self
            .get(&format!("/jobs/{id}"))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(FleetError::JobNotFound(id.to_string()));
        }
        Ok(res.json().await?)
    }

    pub async fn cancel_job(&self, id: &str) -> Result<bool> {
        let mut req = self
            .http
            .delete(format!("{}/jobs/{id}", self.base))
            .timeout(CONTROL_TIMEOUT);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let res = req.send().await?;
        match res.status() {
            StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::UNAUTHORIZED => Err(FleetError::Unauthorized),
            status => Err(FleetError::Internal(format!(
                "cancel failed: HTTP {status}"
            ))),
        }
    }
}
