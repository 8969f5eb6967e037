//! Common types for the KubeCop system tests: errors, configuration,
//! telemetry and Kubernetes utilities

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod git;
pub mod kube_utils;
pub mod telemetry;

pub use config::SystestConfig;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the KubeCop agent runs in
pub const AGENT_NAMESPACE: &str = "kubescape";

/// Workload name of the KubeCop agent daemonset
pub const AGENT_WORKLOAD: &str = "kubecop";

/// Label key the agent pods are selected by
pub const AGENT_NAME_LABEL: &str = "app.kubernetes.io/name";

/// `alertname` label value of every alert KubeCop raises
pub const RULE_VIOLATION_ALERT: &str = "KubeCopRuleViolated";

/// Prefix of generated test namespace names
pub const NAMESPACE_PREFIX: &str = "kubecop";

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "kubecop-systest";

/// Annotation the agent sets once an application profile is final
pub const PROFILE_FINAL_ANNOTATION: &str = "kapprofiler.kubescape.io/final";

/// API version of the agent's ApplicationProfile resources
pub const PROFILE_API_VERSION: &str = "kubescape.io/v1";

/// Kind of the agent's ApplicationProfile resources
pub const PROFILE_KIND: &str = "ApplicationProfile";
