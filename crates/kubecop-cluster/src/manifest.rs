//! Manifest and single-object handles
//!
//! A manifest file may hold several documents. Each is adopted when it already
//! exists and applied (and owned) otherwise, so teardown only removes what the
//! scenario created.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use kubecop_common::kube_utils::read_manifests;
use kubecop_common::Error;

use crate::ops::{ClusterOps, ObjectRef};

/// One document of an applied manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedObject {
    /// What was applied
    pub object: ObjectRef,
    /// Applied by this handle (false when adopted)
    pub owned: bool,
}

/// A manifest file applied into a namespace
#[derive(Debug, Clone)]
pub struct ManifestHandle {
    path: PathBuf,
    objects: Vec<AppliedObject>,
}

impl ManifestHandle {
    /// Apply every document of the manifest at `path` into `namespace`.
    ///
    /// If a document fails to apply, the documents already applied by this
    /// call are deleted before the error is returned.
    pub async fn apply(ops: &dyn ClusterOps, namespace: &str, path: &Path) -> Result<Self, Error> {
        let docs = read_manifests(path)?;
        Self::apply_documents(ops, namespace, path, &docs).await
    }

    /// Apply already-parsed documents; `path` is kept for log context
    pub async fn apply_documents(
        ops: &dyn ClusterOps,
        namespace: &str,
        path: &Path,
        docs: &[serde_json::Value],
    ) -> Result<Self, Error> {
        let mut handle = Self {
            path: path.to_path_buf(),
            objects: Vec::with_capacity(docs.len()),
        };

        for doc in docs {
            if let Err(e) = handle.apply_one(ops, namespace, doc).await {
                error!(manifest = %path.display(), error = %e, "Manifest apply failed, rolling back");
                handle.teardown(ops).await;
                return Err(e);
            }
        }

        info!(
            manifest = %path.display(),
            namespace = %namespace,
            owned = handle.owned_count(),
            adopted = handle.objects.len() - handle.owned_count(),
            "Applied manifest"
        );
        Ok(handle)
    }

    async fn apply_one(
        &mut self,
        ops: &dyn ClusterOps,
        namespace: &str,
        doc: &serde_json::Value,
    ) -> Result<(), Error> {
        let object = ObjectRef::from_manifest(doc, Some(namespace))?;

        if ops.get_object(&object).await?.is_some() {
            debug!(object = %object, "Adopting existing object");
            self.objects.push(AppliedObject {
                object,
                owned: false,
            });
            return Ok(());
        }

        ops.apply_object(&object, doc).await?;
        self.objects.push(AppliedObject {
            object,
            owned: true,
        });
        Ok(())
    }

    /// Manifest file this handle was created from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Documents in apply order
    pub fn objects(&self) -> &[AppliedObject] {
        &self.objects
    }

    fn owned_count(&self) -> usize {
        self.objects.iter().filter(|o| o.owned).count()
    }

    /// Delete owned documents in reverse apply order; failures are logged
    pub async fn teardown(&self, ops: &dyn ClusterOps) {
        for applied in self.objects.iter().rev().filter(|o| o.owned) {
            if let Err(e) = ops.delete_object(&applied.object).await {
                error!(object = %applied.object, error = %e, "Failed to delete object");
            }
        }
    }
}

/// A single object the scenario did not apply but must remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHandle {
    /// The tracked object
    pub object: ObjectRef,
}

impl ObjectHandle {
    /// Track `object` for deletion
    pub fn new(object: ObjectRef) -> Self {
        Self { object }
    }

    /// Delete the object; failures are logged
    pub async fn teardown(&self, ops: &dyn ClusterOps) {
        if let Err(e) = ops.delete_object(&self.object).await {
            error!(object = %self.object, error = %e, "Failed to delete object");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::MockClusterOps;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn docs() -> Vec<serde_json::Value> {
        vec![
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "first"}}),
            json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "shared"}}),
            json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "third"}}),
        ]
    }

    #[tokio::test]
    async fn existing_documents_are_adopted_and_never_deleted() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let mut ops = MockClusterOps::new();
        ops.expect_get_object().returning(|obj| {
            Ok((obj.name == "shared").then(|| json!({"metadata": {"name": "shared"}})))
        });
        ops.expect_apply_object()
            .times(2)
            .returning(|obj, _| {
                assert_eq!(obj.namespace.as_deref(), Some("ns1"));
                assert_ne!(obj.name, "shared");
                Ok(())
            });
        let d = deleted.clone();
        ops.expect_delete_object().returning(move |obj| {
            d.lock().unwrap().push(obj.name.clone());
            Ok(())
        });

        let handle = ManifestHandle::apply_documents(&ops, "ns1", Path::new("m.yaml"), &docs())
            .await
            .unwrap();
        assert_eq!(handle.objects().len(), 3);
        assert!(!handle.objects()[1].owned);

        handle.teardown(&ops).await;
        assert_eq!(*deleted.lock().unwrap(), vec!["third", "first"]);
    }

    #[tokio::test]
    async fn failed_apply_rolls_back_applied_documents() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let mut ops = MockClusterOps::new();
        ops.expect_get_object().returning(|_| Ok(None));
        ops.expect_apply_object().returning(|obj, _| {
            if obj.kind == "Deployment" {
                Err(Error::resource(&obj.kind, &obj.name, "admission denied"))
            } else {
                Ok(())
            }
        });
        let d = deleted.clone();
        ops.expect_delete_object().returning(move |obj| {
            d.lock().unwrap().push(obj.name.clone());
            Ok(())
        });

        let err = ManifestHandle::apply_documents(&ops, "ns1", Path::new("m.yaml"), &docs())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));
        assert_eq!(*deleted.lock().unwrap(), vec!["shared", "first"]);
    }

    #[tokio::test]
    async fn teardown_continues_after_delete_error() {
        let mut ops = MockClusterOps::new();
        ops.expect_get_object().returning(|_| Ok(None));
        ops.expect_apply_object().returning(|_, _| Ok(()));
        ops.expect_delete_object()
            .times(3)
            .returning(|obj| Err(Error::resource(&obj.kind, &obj.name, "conflict")));

        let handle = ManifestHandle::apply_documents(&ops, "ns1", Path::new("m.yaml"), &docs())
            .await
            .unwrap();
        handle.teardown(&ops).await;
    }

    #[tokio::test]
    async fn apply_reads_manifest_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.yaml");
        std::fs::write(
            &path,
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: from-file\n",
        )
        .unwrap();

        let mut ops = MockClusterOps::new();
        ops.expect_get_object().returning(|_| Ok(None));
        ops.expect_apply_object()
            .times(1)
            .returning(|obj, _| {
                assert_eq!(obj.name, "from-file");
                Ok(())
            });

        let handle = ManifestHandle::apply(&ops, "ns1", &path).await.unwrap();
        assert_eq!(handle.path(), path.as_path());
    }

    #[tokio::test]
    async fn object_handle_always_deletes() {
        let mut ops = MockClusterOps::new();
        ops.expect_delete_object().times(1).returning(|_| Ok(()));
        ObjectHandle::new(ObjectRef::new("kubescape.io/v1", "ApplicationProfile", "p"))
            .teardown(&ops)
            .await;
    }
}
