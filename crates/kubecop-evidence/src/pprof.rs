//! pprof capture from the agent's debug endpoint

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info};

use kubecop_common::config::normalize_base_url;
use kubecop_common::Error;

/// Which profile to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    /// CPU profile over the duration
    Cpu,
    /// Heap profile
    Heap,
}

impl ProfileKind {
    fn endpoint(self) -> &'static str {
        match self {
            ProfileKind::Cpu => "/debug/pprof/profile",
            ProfileKind::Heap => "/debug/pprof/heap",
        }
    }
}

/// Fetches profiles from a pprof HTTP endpoint
#[derive(Debug, Clone)]
pub struct ProfileRecorder {
    client: reqwest::Client,
    base_url: String,
    http_timeout: Duration,
}

impl ProfileRecorder {
    /// Record from `base_url`; `http_timeout` is added on top of the capture duration
    pub fn new(base_url: &str, http_timeout: Duration) -> Result<Self, Error> {
        Ok(Self {
            client: crate::http_client(http_timeout)?,
            base_url: normalize_base_url(base_url),
            http_timeout,
        })
    }

    /// Capture a profile and write it to `path`
    pub async fn record(
        &self,
        kind: ProfileKind,
        duration: Duration,
        path: &Path,
    ) -> Result<PathBuf, Error> {
        let artifact = path.display().to_string();
        let url = format!("{}{}", self.base_url, kind.endpoint());

        let response = self
            .client
            .get(&url)
            .query(&[("seconds", duration.as_secs())])
            .timeout(duration + self.http_timeout)
            .send()
            .await
            .map_err(|e| Error::artifact(&artifact, format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::artifact(&artifact, format!("{url} returned {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::artifact(&artifact, format!("reading profile body: {e}")))?;
        tokio::fs::write(path, &body).await?;

        info!(?kind, profile = %artifact, bytes = body.len(), "Recorded profile");
        Ok(path.to_path_buf())
    }

    /// Capture in a background task that is never joined; the outcome is only logged.
    ///
    /// `guard` is held until the capture ends, e.g. the port-forward the
    /// base URL points at.
    pub fn record_detached<G>(&self, kind: ProfileKind, duration: Duration, path: PathBuf, guard: G)
    where
        G: Send + 'static,
    {
        let recorder = self.clone();
        drop(tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = recorder.record(kind, duration, &path).await {
                error!(?kind, error = %e, "Detached profile capture failed");
            }
        }));
    }
}
