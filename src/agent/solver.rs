use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::executor::sha256_hex;

/// The external fetch/verify capability the agent loop calls when a job
/// references a solver executable. A resolution failure ends the attempt
/// with a failure report; no execution happens.
pub trait SolverSource: Send + Sync {
    fn resolve(
        &self,
        url: &str,
        checksum: Option<&str>,
    ) -> impl Future<Output = std::result::Result<PathBuf, String>> + Send;
}

/// Content-addressed disk cache of solver executables.
///
/// Files are stored under the declared checksum (or, lacking one, the hash
/// of the URL). A cached file that no longer matches its checksum is
/// re-downloaded rather than trusted.
pub struct CachedSolverSource {
    cache_dir: PathBuf,
    http: reqwest::Client,
}

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

impl CachedSolverSource {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            http: reqwest::Client::new(),
        }
    }

    async fn verify_cached(&self, path: &Path, checksum: &str) -> bool {
        match tokio::fs::read(path).await {
            Ok(data) => sha256_hex(&data) == checksum,
            Err(_) => false,
        }
    }

    async fn download(&self, url: &str, checksum: Option<&str>) -> Result<Vec<u8>, String> {
        tracing::info!(url, "Downloading solver");
        let res = self
            .http
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| format!("download failed: {e}"))?;
        if !res.status().is_success() {
            return Err(format!("download failed: HTTP {}", res.status()));
        }
        let data = res
            .bytes()
            .await
            .map_err(|e| format!("download failed: {e}"))?
            .to_vec();

        if let Some(expected) = checksum {
            let actual = sha256_hex(&data);
            if actual != expected {
                return Err(format!(
                    "solver_checksum_mismatch: expected {expected}, got {actual}"
                ));
            }
        }
        Ok(data)
    }
}

impl SolverSource for CachedSolverSource {
    async fn resolve(
        &self,
        url: &str,
        checksum: Option<&str>,
    ) -> std::result::Result<PathBuf, String> {
        let filename = checksum
            .map(String::from)
            .unwrap_or_else(|| sha256_hex(url.as_bytes()));
        let path = self.cache_dir.join(filename);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            match checksum {
                None => return Ok(path),
                Some(expected) => {
                    if self.verify_cached(&path, expected).await {
                        return Ok(path);
                    }
                    tracing::warn!(path = %path.display(), "Cached solver checksum mismatch, re-downloading");
                }
            }
        }

        let data = self.download(url, checksum).await?;

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| format!("cache dir creation failed: {e}"))?;
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| format!("cache write failed: {e}"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| format!("chmod failed: {e}"))?;
        }

        tracing::info!(path = %path.display(), "Solver cached");
        Ok(path)
    }
}
