//! Run configuration for the system tests.
//!
//! Built once at process start from CLI flags and environment, then threaded
//! by value into every client constructor. Nothing mutates it afterward.
//!
//! Root directory resolution (highest priority first):
//! 1. Explicit `--root-dir` flag
//! 2. `KUBECOP_SYSTEST_ROOT` environment variable
//! 3. `<git toplevel>/system-tests`
//! 4. The current directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::git;
use crate::{AGENT_NAMESPACE, AGENT_WORKLOAD, NAMESPACE_PREFIX};

/// Default Alertmanager base URL
pub const DEFAULT_ALERTMANAGER_URL: &str = "http://localhost:9093";
/// Default Prometheus base URL
pub const DEFAULT_PROMETHEUS_URL: &str = "http://localhost:9090";
/// Environment variable overriding the root directory
pub const ROOT_DIR_ENV: &str = "KUBECOP_SYSTEST_ROOT";
/// Directory under the repository top level holding scenario manifests
pub const SYSTEM_TESTS_DIR: &str = "system-tests";
/// Grace period after each scenario so Prometheus scrapes the window
pub const DEFAULT_SCRAPE_GRACE: Duration = Duration::from_secs(60);
/// Per-request timeout for Alertmanager/Prometheus/pprof calls
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable configuration for one system-test run
#[derive(Debug, Clone)]
pub struct SystestConfig {
    /// Alertmanager base URL
    pub alertmanager_url: String,
    /// Prometheus base URL
    pub prometheus_url: String,
    /// External namespace holding pre-created application profiles, if any
    pub store_namespace: Option<String>,
    /// Directory scenario manifests are resolved against
    pub root_directory: PathBuf,
    /// Kubeconfig path; `None` infers the in-cluster or default config
    pub kubeconfig: Option<PathBuf>,
    /// Directory plot images are written to
    pub output_dir: PathBuf,
    /// Sleep between a scenario's end and its metrics window capture
    pub scrape_grace: Duration,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// Prefix for generated namespace names
    pub namespace_prefix: String,
    /// Namespace the agent runs in
    pub agent_namespace: String,
    /// Agent workload name
    pub agent_workload: String,
    /// Agent pprof port; enables detached profiling when set
    pub pprof_port: Option<u16>,
    /// Register scenarios that kill processes inside workloads
    pub include_disruptive: bool,
}

impl Default for SystestConfig {
    fn default() -> Self {
        Self {
            alertmanager_url: DEFAULT_ALERTMANAGER_URL.to_string(),
            prometheus_url: DEFAULT_PROMETHEUS_URL.to_string(),
            store_namespace: None,
            root_directory: PathBuf::from("."),
            kubeconfig: None,
            output_dir: PathBuf::from("."),
            scrape_grace: DEFAULT_SCRAPE_GRACE,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            namespace_prefix: NAMESPACE_PREFIX.to_string(),
            agent_namespace: AGENT_NAMESPACE.to_string(),
            agent_workload: AGENT_WORKLOAD.to_string(),
            pprof_port: None,
            include_disruptive: false,
        }
    }
}

impl SystestConfig {
    /// Resolve a path relative to the root directory
    pub fn resource_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root_directory.join(relative)
    }

    /// Label selector matching the agent pods
    pub fn agent_selector(&self) -> String {
        format!("{}={}", crate::AGENT_NAME_LABEL, self.agent_workload)
    }
}

/// Strip trailing slashes so endpoint paths can be appended with `/api/...`
pub fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Resolve the root directory using the priority chain.
pub fn resolve_root_directory(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_DIR_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    match git::toplevel(&cwd) {
        Some(top) => top.join(SYSTEM_TESTS_DIR),
        None => cwd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_localhost_backends() {
        let config = SystestConfig::default();
        assert_eq!(config.alertmanager_url, "http://localhost:9093");
        assert_eq!(config.prometheus_url, "http://localhost:9090");
        assert_eq!(config.scrape_grace, Duration::from_secs(60));
        assert_eq!(config.namespace_prefix, "kubecop");
        assert!(config.store_namespace.is_none());
        assert!(!config.include_disruptive);
    }

    #[test]
    fn agent_selector_uses_name_label() {
        let config = SystestConfig::default();
        assert_eq!(config.agent_selector(), "app.kubernetes.io/name=kubecop");
    }

    #[test]
    fn resource_path_joins_root() {
        let config = SystestConfig {
            root_directory: PathBuf::from("/repo/system-tests"),
            ..Default::default()
        };
        assert_eq!(
            config.resource_path("resources/nginx-deployment.yaml"),
            PathBuf::from("/repo/system-tests/resources/nginx-deployment.yaml")
        );
    }

    #[test]
    fn normalize_strips_trailing_slashes() {
        assert_eq!(
            normalize_base_url("http://localhost:9093/"),
            "http://localhost:9093"
        );
        assert_eq!(normalize_base_url("http://prom:9090"), "http://prom:9090");
    }

    #[test]
    fn explicit_root_directory_wins() {
        let resolved = resolve_root_directory(Some(Path::new("/explicit/root")));
        assert_eq!(resolved, PathBuf::from("/explicit/root"));
    }
}
