//! Scoped acquisition of cluster resources
//!
//! Every handle a scenario acquires is registered in a [`ResourceScope`].
//! [`ResourceScope::guard`] runs the scenario body and then releases the
//! handles newest-first on every exit path: success, returned error or panic.

use std::future::Future;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tracing::{debug, warn};

use kubecop_common::Error;

use crate::manifest::{ManifestHandle, ObjectHandle};
use crate::namespace::NamespaceHandle;
use crate::ops::{ClusterOps, ObjectRef};
use crate::workload::Workload;

/// Anything a scope can release
#[derive(Debug, Clone)]
pub enum ResourceHandle {
    /// A created or adopted namespace
    Namespace(NamespaceHandle),
    /// An applied manifest
    Manifest(ManifestHandle),
    /// A single object to delete
    Object(ObjectHandle),
}

impl ResourceHandle {
    /// Release the resource; failures are logged, never returned
    pub async fn teardown(&self, ops: &dyn ClusterOps) {
        match self {
            ResourceHandle::Namespace(h) => h.teardown(ops).await,
            ResourceHandle::Manifest(h) => h.teardown(ops).await,
            ResourceHandle::Object(h) => h.teardown(ops).await,
        }
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            ResourceHandle::Namespace(h) => format!("namespace {}", h.name),
            ResourceHandle::Manifest(h) => format!("manifest {}", h.path().display()),
            ResourceHandle::Object(h) => h.object.to_string(),
        }
    }
}

async fn release_all(ops: &dyn ClusterOps, handles: Vec<ResourceHandle>) {
    for handle in handles.into_iter().rev() {
        debug!(resource = %handle.describe(), "Releasing");
        handle.teardown(ops).await;
    }
}

/// Owner of every resource handle a scenario acquires
pub struct ResourceScope {
    ops: Arc<dyn ClusterOps>,
    namespace_prefix: String,
    handles: Mutex<Vec<ResourceHandle>>,
}

impl ResourceScope {
    /// Create an empty scope
    pub fn new(ops: Arc<dyn ClusterOps>, namespace_prefix: impl Into<String>) -> Self {
        Self {
            ops,
            namespace_prefix: namespace_prefix.into(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// The cluster seam this scope releases through
    pub fn ops(&self) -> &dyn ClusterOps {
        self.ops.as_ref()
    }

    fn register(&self, handle: ResourceHandle) {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Number of handles not yet released
    pub fn len(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether every handle has been released
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create or adopt a namespace; `None` generates a fresh name
    pub async fn namespace(&self, name: Option<&str>) -> Result<NamespaceHandle, Error> {
        let ns = NamespaceHandle::create(self.ops(), name, &self.namespace_prefix).await?;
        self.register(ResourceHandle::Namespace(ns.clone()));
        Ok(ns)
    }

    /// Apply a manifest into `namespace`
    pub async fn manifest(&self, namespace: &str, path: &Path) -> Result<ManifestHandle, Error> {
        let handle = ManifestHandle::apply(self.ops(), namespace, path).await?;
        self.register(ResourceHandle::Manifest(handle.clone()));
        Ok(handle)
    }

    /// Apply a workload manifest, validating the workload before anything is applied
    pub async fn workload(&self, namespace: &str, path: &Path) -> Result<Workload, Error> {
        let workload = Workload::from_manifest(namespace, path)?;
        self.manifest(namespace, path).await?;
        Ok(workload)
    }

    /// Delete `object` when the scope is released
    pub fn track_object(&self, object: ObjectRef) {
        self.register(ResourceHandle::Object(ObjectHandle::new(object)));
    }

    /// Release every registered handle, newest first
    pub async fn release(&self) {
        let handles = mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()));
        release_all(self.ops(), handles).await;
    }

    /// Run `body`, then release the scope whatever the outcome.
    ///
    /// A panic in `body` is re-raised after release.
    pub async fn guard<Fut, T>(&self, body: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(body).catch_unwind().await;
        self.release().await;
        match outcome {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        let handles = mem::take(self.handles.get_mut().unwrap_or_else(|e| e.into_inner()));
        if handles.is_empty() {
            return;
        }

        let leaked: Vec<String> = handles.iter().map(ResourceHandle::describe).collect();
        warn!(?leaked, "ResourceScope dropped without release");

        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let ops = self.ops.clone();
                rt.spawn(async move { release_all(ops.as_ref(), handles).await });
            }
            Err(_) => warn!("No runtime available, leaked resources will not be released"),
        }
    }
}
