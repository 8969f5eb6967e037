//! Error types for the KubeCop system tests
//!
//! Every failure a scenario can hit is a variant here, carrying enough context
//! (namespace, selector, pod, query) to make the final summary table useful
//! without digging through logs.

use std::time::Duration;

use thiserror::Error;

/// Main error type for system-test operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Cluster object create/delete failed
    #[error("resource error [{kind} {name}]: {message}")]
    Resource {
        /// Object kind (Namespace, Deployment, ApplicationProfile, ...)
        kind: String,
        /// Object name
        name: String,
        /// Description of what failed
        message: String,
    },

    /// Workload pods did not become ready in time
    #[error("pods matching '{selector}' in {namespace} not ready after {timeout:?}")]
    ReadinessTimeout {
        /// Namespace that was polled
        namespace: String,
        /// Label selector that was polled
        selector: String,
        /// The readiness budget that elapsed
        timeout: Duration,
    },

    /// Invalid workload or manifest configuration
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what's invalid
        message: String,
    },

    /// Remote command failed inside a pod
    #[error("exec of {command:?} in {pod} failed: {message}")]
    Exec {
        /// Pod the command ran in
        pod: String,
        /// The command line
        command: Vec<String>,
        /// Exit status or transport failure description
        message: String,
    },

    /// Alert aggregator could not be queried
    #[error("alert fetch error [{category}]: {message}")]
    AlertFetch {
        /// Failure category (http, connect, timeout, decode, other)
        category: String,
        /// Description of what failed
        message: String,
    },

    /// Metrics backend returned an error or could not be reached
    #[error("metrics query error: {message}")]
    Query {
        /// Description of what failed
        message: String,
    },

    /// Metrics backend returned no series for the query
    #[error("metrics query returned no data: {query}")]
    NoData {
        /// The query that came back empty
        query: String,
    },

    /// Bounded-growth invariant violated
    #[error("leak detected: grew by {delta} (first {first}, last {last}, tolerance {tolerance})")]
    LeakDetected {
        /// last - first
        delta: f64,
        /// First sample of the series
        first: f64,
        /// Last sample of the series
        last: f64,
        /// Allowed growth
        tolerance: f64,
    },

    /// A scenario expectation did not hold
    #[error("{message}")]
    ExpectationFailed {
        /// What was expected and what was observed
        message: String,
    },

    /// Profile capture or plot rendering failed
    #[error("artifact error [{artifact}]: {message}")]
    Artifact {
        /// Artifact being produced (plot file, profile file)
        artifact: String,
        /// Description of what failed
        message: String,
    },

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest YAML could not be parsed
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON (de)serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a resource error for an object kind and name
    pub fn resource(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Resource {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an exec error
    pub fn exec(pod: impl Into<String>, command: &[String], msg: impl Into<String>) -> Self {
        Self::Exec {
            pod: pod.into(),
            command: command.to_vec(),
            message: msg.into(),
        }
    }

    /// Create an alert fetch error with a failure category
    pub fn alert_fetch(category: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::AlertFetch {
            category: category.into(),
            message: msg.into(),
        }
    }

    /// Create a metrics query error
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query {
            message: msg.into(),
        }
    }

    /// Create a no-data error for a query
    pub fn no_data(query: impl Into<String>) -> Self {
        Self::NoData {
            query: query.into(),
        }
    }

    /// Create an expectation failure
    pub fn expectation(msg: impl Into<String>) -> Self {
        Self::ExpectationFailed {
            message: msg.into(),
        }
    }

    /// Create an artifact error
    pub fn artifact(artifact: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Artifact {
            artifact: artifact.into(),
            message: msg.into(),
        }
    }
}
