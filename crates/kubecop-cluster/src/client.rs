//! kube-rs implementation of [`ClusterOps`]

use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Status};
use kube::api::{Api, AttachParams, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::{self, ApiResource, Scope};
use kube::Client;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use kubecop_common::kube_utils::{
    create_client, has_condition, parse_api_version, CONDITION_READY,
};
use kubecop_common::{Error, FIELD_MANAGER};

use crate::ops::{ClusterOps, ExecOutput, ObjectRef, PodInfo, PortForward};

/// [`ClusterOps`] backed by a live API server
pub struct KubeClusterOps {
    client: Client,
    /// apiVersion/kind -> (resource, namespaced)
    kinds: DashMap<String, (ApiResource, bool)>,
}

impl KubeClusterOps {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            kinds: DashMap::new(),
        }
    }

    /// Connect using an explicit kubeconfig, or infer one
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, Error> {
        Ok(Self::new(create_client(kubeconfig).await?))
    }

    async fn resolve(&self, api_version: &str, kind: &str) -> Result<(ApiResource, bool), Error> {
        let key = format!("{api_version}/{kind}");
        if let Some(entry) = self.kinds.get(&key) {
            return Ok(entry.clone());
        }

        let (group, version) = parse_api_version(api_version);
        let gvk = GroupVersionKind::gvk(&group, &version, kind);
        let (ar, caps) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| Error::resource(kind, "-", format!("kind not served: {e}")))?;
        let namespaced = matches!(caps.scope, Scope::Namespaced);

        self.kinds.insert(key, (ar.clone(), namespaced));
        Ok((ar, namespaced))
    }

    async fn dynamic_api(&self, object: &ObjectRef) -> Result<(Api<DynamicObject>, bool), Error> {
        let (ar, namespaced) = self.resolve(&object.api_version, &object.kind).await?;
        let api = match (&object.namespace, namespaced) {
            (Some(ns), true) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (None, true) => {
                return Err(Error::resource(
                    &object.kind,
                    &object.name,
                    "namespaced kind requires a namespace",
                ))
            }
            (_, false) => Api::all_with(self.client.clone(), &ar),
        };
        Ok((api, namespaced))
    }
}

/// Drain an exec output channel.
///
/// A stream closing early only truncates output; the status decides success.
async fn read_channel<R>(reader: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = String::new();
    if let Some(mut r) = reader {
        if let Err(e) = r.read_to_string(&mut buf).await {
            debug!(error = %e, "exec stream closed early");
        }
    }
    buf
}

/// Exit code carried in a failed exec status (`reason: ExitCode`)
fn exit_code_from_status(status: &Status) -> Option<i32> {
    status
        .details
        .as_ref()?
        .causes
        .as_ref()?
        .iter()
        .find(|c| c.reason.as_deref() == Some("ExitCode"))
        .and_then(|c| c.message.as_deref())
        .and_then(|m| m.parse().ok())
}

#[async_trait]
impl ClusterOps for KubeClusterOps {
    async fn namespace_exists(&self, name: &str) -> Result<bool, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_namespace(&self, name: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &ns)
            .await
            .map_err(|e| Error::resource("Namespace", name, e.to_string()))?;
        info!(namespace = %name, "Created namespace");
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(namespace = %name, "Deleted namespace");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(namespace = %name, "Namespace already gone");
                Ok(())
            }
            Err(e) => Err(Error::resource("Namespace", name, e.to_string())),
        }
    }

    async fn get_object(&self, object: &ObjectRef) -> Result<Option<serde_json::Value>, Error> {
        let (api, _) = self.dynamic_api(object).await?;
        match api.get_opt(&object.name).await? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn apply_object(
        &self,
        object: &ObjectRef,
        manifest: &serde_json::Value,
    ) -> Result<(), Error> {
        let (api, namespaced) = self.dynamic_api(object).await?;

        let mut manifest = manifest.clone();
        if namespaced {
            if let (Some(ns), Some(meta)) = (&object.namespace, manifest.get_mut("metadata")) {
                meta["namespace"] = serde_json::Value::String(ns.clone());
            }
        }
        let obj: DynamicObject = serde_json::from_value(manifest)?;

        debug!(object = %object, "Applying object");
        api.patch(
            &object.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&obj),
        )
        .await
        .map_err(|e| Error::resource(&object.kind, &object.name, format!("apply failed: {e}")))?;
        Ok(())
    }

    async fn delete_object(&self, object: &ObjectRef) -> Result<(), Error> {
        let (api, _) = self.dynamic_api(object).await?;
        match api.delete(&object.name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!(object = %object, "Deleted object");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::resource(&object.kind, &object.name, e.to_string())),
        }
    }

    async fn list_objects(
        &self,
        namespace: &str,
        api_version: &str,
        kind: &str,
    ) -> Result<Vec<serde_json::Value>, Error> {
        let listing = ObjectRef::new(api_version, kind, "").in_namespace(namespace);
        let (api, _) = self.dynamic_api(&listing).await?;
        let list = api.list(&ListParams::default()).await?;
        list.items
            .into_iter()
            .map(|obj| serde_json::to_value(obj).map_err(Error::from))
            .collect()
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(selector)).await?;
        Ok(pods
            .items
            .into_iter()
            .map(|pod| {
                let status = pod.status.as_ref();
                PodInfo {
                    name: pod.metadata.name.clone().unwrap_or_default(),
                    ready: has_condition(
                        status.and_then(|s| s.conditions.as_deref()),
                        CONDITION_READY,
                    ),
                    phase: status.and_then(|s| s.phase.clone()),
                }
            })
            .collect())
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        command: &[String],
    ) -> Result<ExecOutput, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default().stdout(true).stderr(true);

        let mut attached = api
            .exec(pod, command.to_vec(), &params)
            .await
            .map_err(|e| Error::exec(pod, command, e.to_string()))?;

        let stdout = attached.stdout();
        let stderr = attached.stderr();
        let status = attached.take_status();

        let (stdout, stderr) = tokio::join!(read_channel(stdout), read_channel(stderr));

        let status = match status {
            Some(fut) => fut.await,
            None => None,
        };
        if let Err(e) = attached.join().await {
            warn!(pod = %pod, error = %e, "exec session did not close cleanly");
        }

        let mut output = ExecOutput {
            stdout,
            stderr,
            ..Default::default()
        };
        match status {
            Some(s) if s.status.as_deref() == Some("Success") => output.success = true,
            Some(s) => {
                output.exit_code = exit_code_from_status(&s);
                output.message = s.message;
            }
            None => output.message = Some("no status returned for exec session".to_string()),
        }
        Ok(output)
    }

    async fn port_forward(
        &self,
        namespace: &str,
        pod: &str,
        port: u16,
    ) -> Result<PortForward, Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local_addr = listener.local_addr()?;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod_name = pod.to_string();

        info!(pod = %pod, port, local = %local_addr, "Starting port-forward");
        let task = tokio::spawn(async move {
            loop {
                let (mut incoming, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "port-forward accept failed");
                        return;
                    }
                };
                let api = api.clone();
                let pod_name = pod_name.clone();
                tokio::spawn(async move {
                    let mut forwarder = match api.portforward(&pod_name, &[port]).await {
                        Ok(f) => f,
                        Err(e) => {
                            warn!(pod = %pod_name, error = %e, "port-forward upgrade failed");
                            return;
                        }
                    };
                    let Some(mut upstream) = forwarder.take_stream(port) else {
                        warn!(pod = %pod_name, port, "port-forward stream unavailable");
                        return;
                    };
                    match tokio::io::copy_bidirectional(&mut incoming, &mut upstream).await {
                        Ok((sent, received)) => {
                            debug!(%peer, sent, received, "port-forward connection ended")
                        }
                        Err(e) => debug!(%peer, error = %e, "port-forward bridge error"),
                    }
                });
            }
        });

        Ok(PortForward::new(local_addr, task))
    }
}
