//! Workload identity derived from a manifest

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use kubecop_common::kube_utils::read_manifests;
use kubecop_common::Error;

/// Label every workload must carry for readiness and exec
pub const APP_LABEL: &str = "app";

/// Supported workload kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    /// apps/v1 Deployment
    Deployment,
    /// v1 Pod
    Pod,
    /// apps/v1 StatefulSet
    StatefulSet,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// batch/v1 Job
    Job,
}

impl WorkloadKind {
    /// JSON pointer to the pod labels for this kind
    pub fn label_path(self) -> &'static str {
        match self {
            WorkloadKind::Pod => "/metadata/labels",
            _ => "/spec/template/metadata/labels",
        }
    }

    /// Kind name as it appears in manifests
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::Pod => "Pod",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Job => "Job",
        }
    }
}

impl FromStr for WorkloadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Deployment" => Ok(WorkloadKind::Deployment),
            "Pod" => Ok(WorkloadKind::Pod),
            "StatefulSet" => Ok(WorkloadKind::StatefulSet),
            "DaemonSet" => Ok(WorkloadKind::DaemonSet),
            "Job" => Ok(WorkloadKind::Job),
            other => Err(Error::configuration(format!(
                "unsupported workload kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workload stood up in a test namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// Namespace the workload runs in
    pub namespace: String,
    /// Workload kind
    pub kind: WorkloadKind,
    /// metadata.name
    pub name: String,
    /// Pod template labels
    pub labels: BTreeMap<String, String>,
    /// Manifest the workload came from
    pub manifest: PathBuf,
}

impl Workload {
    /// Derive a workload from the first document of the manifest at `path`
    pub fn from_manifest(namespace: &str, path: &Path) -> Result<Self, Error> {
        let docs = read_manifests(path)?;
        let doc = docs.first().ok_or_else(|| {
            Error::configuration(format!("manifest {} is empty", path.display()))
        })?;
        Self::from_document(namespace, path, doc)
    }

    /// Derive a workload from one parsed manifest document
    pub fn from_document(
        namespace: &str,
        path: &Path,
        doc: &serde_json::Value,
    ) -> Result<Self, Error> {
        let kind: WorkloadKind = doc
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::configuration("workload manifest missing kind"))?
            .parse()?;
        let name = doc
            .pointer("/metadata/name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::configuration("workload manifest missing metadata.name"))?
            .to_string();

        let labels = doc
            .pointer(kind.label_path())
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            namespace: namespace.to_string(),
            kind,
            name,
            labels,
            manifest: path.to_path_buf(),
        })
    }

    /// Value of the `app` label
    pub fn app_label(&self) -> Result<&str, Error> {
        self.labels.get(APP_LABEL).map(String::as_str).ok_or_else(|| {
            Error::configuration(format!(
                "{} {} has no '{APP_LABEL}' label",
                self.kind, self.name
            ))
        })
    }

    /// `app=<value>` label selector for the workload's pods
    pub fn selector(&self) -> Result<String, Error> {
        Ok(format!("{APP_LABEL}={}", self.app_label()?))
    }
}
