//! Shared Kubernetes utilities using kube-rs
//!
//! Provides the kubectl-equivalent pieces the scenarios need (client setup,
//! manifest parsing, condition checks, bounded polling) without shelling out
//! to kubectl.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::Deserialize;
use tracing::trace;

use crate::Error;

/// The "Ready" condition type for pods
pub const CONDITION_READY: &str = "Ready";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::configuration(format!(
                    "failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::configuration(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::configuration(format!("failed to infer kube config: {}", e)))?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config)
        .map_err(|e| Error::configuration(format!("failed to create client: {}", e)))
}

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::core::v1::PodCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Check if a Kubernetes condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Poll until a condition is met or timeout is reached
///
/// `check_fn` returns `Ok(true)` when the condition is met and `Ok(false)` to
/// keep polling. Errors from `check_fn` are traced and polling continues; only
/// the deadline ends the wait unsuccessfully, with the error built by
/// `on_timeout`.
pub async fn poll_until<F, Fut, T>(
    timeout: Duration,
    poll_interval: Duration,
    on_timeout: T,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
    T: FnOnce() -> Error,
{
    let start = tokio::time::Instant::now();

    loop {
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!("polling condition not yet met"),
            Err(e) => trace!(error = %e, "polling check returned error"),
        }

        if start.elapsed() >= timeout {
            return Err(on_timeout());
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use kubecop_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Parse a (possibly multi-document) YAML manifest into JSON values.
///
/// Empty documents (e.g. a trailing `---`) are skipped.
pub fn parse_manifests(manifest: &str) -> Result<Vec<serde_json::Value>, Error> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = serde_json::Value::deserialize(document)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Read and parse a manifest file
pub fn read_manifests(path: &Path) -> Result<Vec<serde_json::Value>, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::configuration(format!("failed to read manifest {}: {}", path.display(), e))
    })?;
    let docs = parse_manifests(&content)?;
    if docs.is_empty() {
        return Err(Error::configuration(format!(
            "manifest {} contains no documents",
            path.display()
        )));
    }
    Ok(docs)
}
