//! Cluster-side plumbing for the KubeCop system tests
//!
//! - [`ops::ClusterOps`]: the orchestration API seam, with [`client::KubeClusterOps`]
//!   as the kube-rs implementation
//! - [`namespace`], [`manifest`]: create/adopt/teardown handles
//! - [`scope::ResourceScope`]: releases every acquired handle on every exit path
//! - [`readiness::ReadinessWaiter`]: pod readiness polling and exec

#![deny(missing_docs)]

pub mod client;
pub mod manifest;
pub mod namespace;
pub mod ops;
pub mod readiness;
pub mod scope;
pub mod workload;

pub use client::KubeClusterOps;
pub use manifest::{ManifestHandle, ObjectHandle};
pub use namespace::{generate_namespace_name, NamespaceHandle};
#[cfg(any(test, feature = "mock"))]
pub use ops::MockClusterOps;
pub use ops::{ClusterOps, ExecOutput, ObjectRef, PodInfo, PortForward};
pub use readiness::{ReadinessWaiter, DEFAULT_READY_TIMEOUT};
pub use scope::{ResourceHandle, ResourceScope};
pub use workload::{Workload, WorkloadKind};
