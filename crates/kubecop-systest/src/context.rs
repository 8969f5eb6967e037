//! What a scenario body gets to work with
//!
//! One [`ScenarioContext`] is built per run from the [`SystestConfig`] and the
//! cluster seam, then lent to every scenario in turn.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use kubecop_cluster::{ClusterOps, ObjectRef, PodInfo, ReadinessWaiter, ResourceScope};
use kubecop_common::{
    Error, Result, SystestConfig, PROFILE_API_VERSION, PROFILE_FINAL_ANNOTATION, PROFILE_KIND,
    RULE_VIOLATION_ALERT,
};
use kubecop_evidence::alerts::filter;
use kubecop_evidence::metrics::workload_cpu_query;
use kubecop_evidence::{
    http_client, AlertQueryClient, AlertRecord, MetricsQueryClient, PlotSink, ProfileKind,
    ProfileRecorder,
};

/// Shared services for scenario bodies
pub struct ScenarioContext {
    config: SystestConfig,
    cluster: Arc<dyn ClusterOps>,
    alerts: AlertQueryClient,
    metrics: MetricsQueryClient,
    plots: PlotSink,
}

impl ScenarioContext {
    /// Build the HTTP clients from `config`
    pub fn new(config: SystestConfig, cluster: Arc<dyn ClusterOps>) -> Result<Self> {
        let client = http_client(config.http_timeout)?;
        Ok(Self {
            alerts: AlertQueryClient::with_client(client.clone(), &config.alertmanager_url),
            metrics: MetricsQueryClient::with_client(client, &config.prometheus_url),
            plots: PlotSink::new(&config.output_dir),
            cluster,
            config,
        })
    }

    /// Run configuration
    pub fn config(&self) -> &SystestConfig {
        &self.config
    }

    /// Directory scenario manifests are resolved against
    pub fn root_directory(&self) -> &Path {
        &self.config.root_directory
    }

    /// Path of a manifest relative to the root directory
    pub fn resource_path(&self, relative: &str) -> PathBuf {
        self.config.resource_path(relative)
    }

    /// The cluster seam
    pub fn cluster(&self) -> &Arc<dyn ClusterOps> {
        &self.cluster
    }

    /// Alertmanager client
    pub fn alerts(&self) -> &AlertQueryClient {
        &self.alerts
    }

    /// Prometheus client
    pub fn metrics(&self) -> &MetricsQueryClient {
        &self.metrics
    }

    /// Plot output
    pub fn plots(&self) -> &PlotSink {
        &self.plots
    }

    /// Fresh scope for a scenario's resources
    pub fn resources(&self) -> ResourceScope {
        ResourceScope::new(self.cluster.clone(), self.config.namespace_prefix.clone())
    }

    /// Readiness and exec helper
    pub fn readiness(&self) -> ReadinessWaiter {
        ReadinessWaiter::new(self.cluster.clone())
    }

    /// Active KubeCop rule alerts raised in `namespace`.
    ///
    /// An unreachable Alertmanager yields an empty list so the caller's
    /// expectation fails with the names it was missing.
    pub async fn namespace_alerts(&self, namespace: &str) -> Vec<AlertRecord> {
        let Some(alerts) = self.alerts.list_active().await else {
            error!(namespace = %namespace, "Could not get alerts");
            return Vec::new();
        };
        let alerts = filter(&alerts, "alertname", RULE_VIOLATION_ALERT);
        filter(&alerts, "namespace", namespace)
    }

    /// First pod of the KubeCop agent
    pub async fn agent_pod(&self) -> Result<PodInfo> {
        let selector = self.config.agent_selector();
        self.cluster
            .list_pods(&self.config.agent_namespace, &selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::resource(
                    "Pod",
                    &self.config.agent_workload,
                    format!(
                        "no pods match {selector} in {}",
                        self.config.agent_namespace
                    ),
                )
            })
    }

    /// Mean CPU cores used by a daemonset's pods over the window
    pub async fn average_cpu_usage(
        &self,
        namespace: &str,
        workload: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64> {
        let usage = self
            .metrics
            .average(&workload_cpu_query(namespace, workload), start, end)
            .await?;
        info!(namespace = %namespace, workload = %workload, usage, "Average CPU usage");
        Ok(usage)
    }

    /// Reference to an application profile
    pub fn profile_ref(&self, namespace: &str, name: &str) -> ObjectRef {
        ObjectRef::new(PROFILE_API_VERSION, PROFILE_KIND, name).in_namespace(namespace)
    }

    /// Fetch an application profile, `None` if it does not exist
    pub async fn application_profile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>> {
        self.cluster
            .get_object(&self.profile_ref(namespace, name))
            .await
    }

    /// Names of every application profile in `namespace`
    pub async fn application_profile_names(&self, namespace: &str) -> Result<Vec<String>> {
        let profiles = self
            .cluster
            .list_objects(namespace, PROFILE_API_VERSION, PROFILE_KIND)
            .await?;
        Ok(profiles
            .iter()
            .filter_map(|p| p.pointer("/metadata/name").and_then(|n| n.as_str()))
            .map(str::to_string)
            .collect())
    }

    /// Capture a profile of the agent in the background.
    ///
    /// Needs `pprof_port`; without it nothing is started. The port-forward
    /// lives as long as the capture task. Failures are logged only.
    pub async fn profile_agent_detached(&self, kind: ProfileKind, duration: Duration, path: PathBuf) {
        let Some(port) = self.config.pprof_port else {
            info!("pprof port not configured, skipping agent profile");
            return;
        };
        if let Err(e) = self.start_agent_profile(kind, duration, path, port).await {
            warn!(?kind, error = %e, "Could not start agent profile");
        }
    }

    async fn start_agent_profile(
        &self,
        kind: ProfileKind,
        duration: Duration,
        path: PathBuf,
        port: u16,
    ) -> Result<()> {
        let pod = self.agent_pod().await?;
        let forward = self
            .cluster
            .port_forward(&self.config.agent_namespace, &pod.name, port)
            .await?;
        let recorder = ProfileRecorder::new(&forward.base_url(), self.config.http_timeout)?;
        info!(pod = %pod.name, ?kind, ?duration, profile = %path.display(), "Profiling agent");
        recorder.record_detached(kind, duration, path, forward);
        Ok(())
    }
}

/// Whether a profile carries the final annotation
pub fn profile_is_final(profile: &serde_json::Value) -> bool {
    profile
        .pointer("/metadata/annotations")
        .and_then(|a| a.get(PROFILE_FINAL_ANNOTATION))
        .and_then(|v| v.as_str())
        == Some("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubecop_cluster::MockClusterOps;
    use serde_json::json;

    fn context_with(ops: MockClusterOps) -> ScenarioContext {
        ScenarioContext::new(SystestConfig::default(), Arc::new(ops)).unwrap()
    }

    fn pod(name: &str) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            ready: true,
            phase: Some("Running".to_string()),
        }
    }

    #[test]
    fn final_annotation_must_be_true() {
        let done = json!({"metadata": {"annotations": {"kapprofiler.kubescape.io/final": "true"}}});
        let partial = json!({"metadata": {"annotations": {"kapprofiler.kubescape.io/final": "false"}}});
        let bare = json!({"metadata": {"name": "pod-nginx"}});
        assert!(profile_is_final(&done));
        assert!(!profile_is_final(&partial));
        assert!(!profile_is_final(&bare));
    }

    #[tokio::test]
    async fn agent_pod_is_first_match() {
        let mut ops = MockClusterOps::new();
        ops.expect_list_pods()
            .withf(|ns, sel| ns == "kubescape" && sel == "app.kubernetes.io/name=kubecop")
            .returning(|_, _| Ok(vec![pod("kubecop-a"), pod("kubecop-b")]));

        let ctx = context_with(ops);
        assert_eq!(ctx.agent_pod().await.unwrap().name, "kubecop-a");
    }

    #[tokio::test]
    async fn missing_agent_is_resource_error() {
        let mut ops = MockClusterOps::new();
        ops.expect_list_pods().returning(|_, _| Ok(vec![]));

        let ctx = context_with(ops);
        assert!(matches!(
            ctx.agent_pod().await,
            Err(Error::Resource { .. })
        ));
    }

    #[tokio::test]
    async fn profile_names_come_from_metadata() {
        let mut ops = MockClusterOps::new();
        ops.expect_list_objects()
            .withf(|ns, api, kind| {
                ns == "kubecop-test-abcd" && api == "kubescape.io/v1" && kind == "ApplicationProfile"
            })
            .returning(|_, _, _| {
                Ok(vec![
                    json!({"metadata": {"name": "pod-nginx-deployment-7f9c"}}),
                    json!({"metadata": {}}),
                ])
            });

        let ctx = context_with(ops);
        let names = ctx
            .application_profile_names("kubecop-test-abcd")
            .await
            .unwrap();
        assert_eq!(names, vec!["pod-nginx-deployment-7f9c".to_string()]);
    }

    #[tokio::test]
    async fn profiling_without_port_does_nothing() {
        // no expectations: any cluster call would panic
        let ctx = context_with(MockClusterOps::new());
        let dir = tempfile::tempdir().unwrap();
        ctx.profile_agent_detached(
            ProfileKind::Cpu,
            Duration::from_secs(1),
            dir.path().join("cpu.pprof"),
        )
        .await;
        assert!(!dir.path().join("cpu.pprof").exists());
    }
}
