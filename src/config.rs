use std::net::SocketAddr;
use std::path::PathBuf;

/// Configuration for the hub process: HTTP listener, persistence, and the
/// reaper policy knobs.
///
/// The reclaim/runtime thresholds are deliberately plain fields rather than
/// derived values; they are operator policy, not tuned constants.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address the HTTP API binds to
    pub listen_addr: SocketAddr,
    /// Path to the SQLite database file
    pub db_path: PathBuf,
    /// Shared bearer token required on mutating calls.
    /// `None` disables auth entirely (development mode).
    pub auth_token: Option<String>,
    /// How often the reaper sweeps for stuck jobs
    pub reap_interval_ms: u64,
    /// A job whose heartbeat is older than this is presumed abandoned
    pub liveness_timeout_ms: i64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080"
                .parse()
                .expect("default listen address is valid"),
            db_path: PathBuf::from("./forge-fleet.sqlite"),
            auth_token: None,
            reap_interval_ms: 15_000,
            liveness_timeout_ms: 60_000,
        }
    }
}

impl HubConfig {
    pub fn new(listen_addr: SocketAddr, db_path: PathBuf) -> Self {
        Self {
            listen_addr,
            db_path,
            ..Default::default()
        }
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }
}

/// Configuration for a worker agent process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the hub, without a trailing slash
    pub hub_url: String,
    /// Unique, url-safe identifier for this worker
    pub worker_id: String,
    /// Display name; the hub preserves the previous name when absent
    pub name: Option<String>,
    /// Advertised CPU cores
    pub cores: u32,
    /// Advertised memory in GB
    pub ram_gb: f64,
    /// Free-form capability tags
    pub tags: Vec<String>,
    /// Restrict claims to these job types; empty means any type
    pub types: Vec<String>,
    /// Shared bearer token, must match the hub's
    pub auth_token: Option<String>,
    /// How long to sleep between empty claim polls
    pub poll_interval_ms: u64,
    /// Cadence of keep-alive heartbeats while a job is in flight
    pub heartbeat_interval_ms: u64,
    /// On shutdown, wait this long for an in-flight job before exiting
    pub shutdown_grace_ms: u64,
    /// Directory for cached solver executables
    pub solver_cache_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            hub_url: "http://127.0.0.1:8080".to_string(),
            worker_id: "worker-1".to_string(),
            name: None,
            cores: 1,
            ram_gb: 1.0,
            tags: Vec::new(),
            types: Vec::new(),
            auth_token: None,
            poll_interval_ms: 5_000,
            heartbeat_interval_ms: 10_000,
            shutdown_grace_ms: 30_000,
            solver_cache_dir: default_solver_cache_dir(),
        }
    }
}

impl WorkerConfig {
    pub fn new(hub_url: String, worker_id: String) -> Self {
        Self {
            hub_url: hub_url.trim_end_matches('/').to_string(),
            worker_id,
            ..Default::default()
        }
    }
}

fn default_solver_cache_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".forge-fleet")
        .join("solvers")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_config_default() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8080");
        assert!(cfg.auth_token.is_none());
        assert_eq!(cfg.reap_interval_ms, 15_000);
        assert_eq!(cfg.liveness_timeout_ms, 60_000);
    }

    #[test]
    fn hub_config_with_auth_token() {
        let cfg = HubConfig::default().with_auth_token(Some("secret".to_string()));
        assert_eq!(cfg.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn worker_config_default() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.cores, 1);
        assert!(cfg.tags.is_empty());
        assert!(cfg.types.is_empty());
        assert_eq!(cfg.poll_interval_ms, 5_000);
        assert_eq!(cfg.heartbeat_interval_ms, 10_000);
        assert_eq!(cfg.shutdown_grace_ms, 30_000);
    }

    #[test]
    fn worker_config_new_strips_trailing_slash() {
        let cfg = WorkerConfig::new("http://hub:9000/".to_string(), "w1".to_string());
        assert_eq!(cfg.hub_url, "http://hub:9000");
        assert_eq!(cfg.worker_id, "w1");
    }
}
