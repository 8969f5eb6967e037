//! Orchestration API seam
//!
//! Everything the scenarios need from the cluster goes through [`ClusterOps`],
//! so handle, scope and readiness logic can be tested against a mock while
//! production runs against the real API server.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::task::JoinHandle;

#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use kubecop_common::Error;

/// Identity of one declarative object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// apiVersion, e.g. `apps/v1`
    pub api_version: String,
    /// Kind, e.g. `Deployment`
    pub kind: String,
    /// metadata.name
    pub name: String,
    /// Target namespace; ignored for cluster-scoped kinds
    pub namespace: Option<String>,
}

impl ObjectRef {
    /// Reference a cluster-scoped (or not yet namespaced) object
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    /// Set the namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Build a reference from a parsed manifest document.
    ///
    /// `metadata.namespace` in the document wins over `default_namespace`.
    pub fn from_manifest(
        doc: &serde_json::Value,
        default_namespace: Option<&str>,
    ) -> Result<Self, Error> {
        let field = |pointer: &str| doc.pointer(pointer).and_then(|v| v.as_str());

        let api_version = field("/apiVersion")
            .ok_or_else(|| Error::configuration("manifest missing apiVersion"))?;
        let kind = field("/kind").ok_or_else(|| Error::configuration("manifest missing kind"))?;
        let name = field("/metadata/name")
            .ok_or_else(|| Error::configuration(format!("{kind} manifest missing metadata.name")))?;

        let namespace = field("/metadata/namespace")
            .or(default_namespace)
            .map(str::to_string);

        Ok(Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace,
        })
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} in {}", self.kind, self.name, ns),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Observed state of one pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    /// Pod name
    pub name: String,
    /// `Ready` condition is `True`
    pub ready: bool,
    /// status.phase
    pub phase: Option<String>,
}

/// Result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Collected stdout
    pub stdout: String,
    /// Collected stderr
    pub stderr: String,
    /// The command exited zero
    pub success: bool,
    /// Exit code reported by the kubelet, when non-zero
    pub exit_code: Option<i32>,
    /// Failure message reported by the kubelet
    pub message: Option<String>,
}

impl ExecOutput {
    /// A successful run with the given stdout
    pub fn succeeded(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            success: true,
            ..Default::default()
        }
    }

    /// A failed run with the given exit code
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            success: false,
            exit_code: Some(exit_code),
            message: Some(format!("command terminated with non-zero exit code: {exit_code}")),
            ..Default::default()
        }
    }
}

/// A local TCP listener forwarding to a pod port.
///
/// Forwarding stops when this value is dropped.
#[derive(Debug)]
pub struct PortForward {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl PortForward {
    /// Wrap a listening address and its accept loop
    pub fn new(local_addr: SocketAddr, task: JoinHandle<()>) -> Self {
        Self { local_addr, task }
    }

    /// `http://` base URL for the forwarded port
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Trait abstracting the orchestration API operations the scenarios use
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Whether a namespace exists
    async fn namespace_exists(&self, name: &str) -> Result<bool, Error>;

    /// Create a namespace
    async fn create_namespace(&self, name: &str) -> Result<(), Error>;

    /// Delete a namespace; deleting a missing namespace succeeds
    async fn delete_namespace(&self, name: &str) -> Result<(), Error>;

    /// Fetch an object, `None` when it does not exist
    async fn get_object(&self, object: &ObjectRef) -> Result<Option<serde_json::Value>, Error>;

    /// Server-side apply a manifest document as `object`
    async fn apply_object(
        &self,
        object: &ObjectRef,
        manifest: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete_object(&self, object: &ObjectRef) -> Result<(), Error>;

    /// List all objects of a kind in a namespace
    async fn list_objects(
        &self,
        namespace: &str,
        api_version: &str,
        kind: &str,
    ) -> Result<Vec<serde_json::Value>, Error>;

    /// List pods matching a label selector, in the order the API returns them
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>, Error>;

    /// Run a command in a pod's default container
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        command: &[String],
    ) -> Result<ExecOutput, Error>;

    /// Forward a local ephemeral port to `port` on a pod
    async fn port_forward(
        &self,
        namespace: &str,
        pod: &str,
        port: u16,
    ) -> Result<PortForward, Error>;
}
