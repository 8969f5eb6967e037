//! Workload readiness polling and remote commands

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use kubecop_common::kube_utils::poll_until;
use kubecop_common::Error;

use crate::ops::{ClusterOps, ExecOutput, PodInfo};
use crate::workload::Workload;

/// Default readiness budget for scenario workloads
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(120);

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Waits for workloads to become ready and runs commands inside them
#[derive(Clone)]
pub struct ReadinessWaiter {
    ops: Arc<dyn ClusterOps>,
    poll_interval: Duration,
}

impl ReadinessWaiter {
    /// Create a waiter polling every two seconds
    pub fn new(ops: Arc<dyn ClusterOps>) -> Self {
        Self {
            ops,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Wait until at least one pod matches and every matching pod is ready
    pub async fn wait_ready(&self, workload: &Workload, timeout: Duration) -> Result<(), Error> {
        let selector = workload.selector()?;
        let namespace = workload.namespace.as_str();
        let ops = self.ops.as_ref();

        info!(namespace = %namespace, selector = %selector, ?timeout, "Waiting for workload readiness");
        let sel = selector.as_str();
        poll_until(
            timeout,
            self.poll_interval,
            || Error::ReadinessTimeout {
                namespace: namespace.to_string(),
                selector: selector.clone(),
                timeout,
            },
            move || async move {
                let pods = ops.list_pods(namespace, sel).await?;
                let ready = pods.iter().filter(|p| p.ready).count();
                debug!(selector = %sel, total = pods.len(), ready, "Polled pods");
                Ok(!pods.is_empty() && ready == pods.len())
            },
        )
        .await
    }

    /// First pod matching the workload's selector.
    ///
    /// List order is not stable, so with several replicas any of them may be
    /// returned.
    pub async fn first_pod(&self, workload: &Workload) -> Result<PodInfo, Error> {
        let selector = workload.selector()?;
        self.ops
            .list_pods(&workload.namespace, &selector)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::resource(
                    workload.kind.as_str(),
                    &workload.name,
                    format!("no pods match {selector} in {}", workload.namespace),
                )
            })
    }

    /// Run a command in the workload's first pod; a non-zero exit is an error
    pub async fn exec(&self, workload: &Workload, command: &[&str]) -> Result<ExecOutput, Error> {
        let pod = self.first_pod(workload).await?;
        self.exec_in_pod(&workload.namespace, &pod.name, command)
            .await
    }

    /// Run a command in a named pod; a non-zero exit is an error
    pub async fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        command: &[&str],
    ) -> Result<ExecOutput, Error> {
        let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        debug!(pod = %pod, ?command, "Executing command");

        let output = self.ops.exec(namespace, pod, &command).await?;
        if output.success {
            return Ok(output);
        }

        let message = match (output.exit_code, &output.message) {
            (Some(code), _) => format!("exit code {code}: {}", output.stderr.trim()),
            (None, Some(msg)) => msg.clone(),
            (None, None) => "command failed".to_string(),
        };
        Err(Error::exec(pod, &command, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::MockClusterOps;
    use crate::workload::WorkloadKind;
    use mockall::predicate::eq;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn nginx() -> Workload {
        Workload {
            namespace: "ns1".to_string(),
            kind: WorkloadKind::Deployment,
            name: "nginx-deployment".to_string(),
            labels: BTreeMap::from([("app".to_string(), "nginx".to_string())]),
            manifest: PathBuf::from("nginx-deployment.yaml"),
        }
    }

    fn pod(name: &str, ready: bool) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            ready,
            phase: Some("Running".to_string()),
        }
    }

    fn waiter(ops: MockClusterOps) -> ReadinessWaiter {
        ReadinessWaiter::new(Arc::new(ops)).with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn ready_once_all_pods_ready() {
        let mut ops = MockClusterOps::new();
        let mut seq = mockall::Sequence::new();
        ops.expect_list_pods()
            .with(eq("ns1"), eq("app=nginx"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![]));
        ops.expect_list_pods()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![pod("a", true), pod("b", false)]));
        ops.expect_list_pods()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![pod("a", true), pod("b", true)]));

        waiter(ops)
            .wait_ready(&nginx(), Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn never_ready_is_readiness_timeout() {
        let mut ops = MockClusterOps::new();
        ops.expect_list_pods()
            .returning(|_, _| Ok(vec![pod("a", false)]));

        let err = waiter(ops)
            .wait_ready(&nginx(), Duration::from_millis(20))
            .await
            .unwrap_err();
        match err {
            Error::ReadinessTimeout {
                namespace,
                selector,
                ..
            } => {
                assert_eq!(namespace, "ns1");
                assert_eq!(selector, "app=nginx");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_app_label_fails_without_polling() {
        let mut ops = MockClusterOps::new();
        ops.expect_list_pods().never();
        let mut w = nginx();
        w.labels.clear();

        let err = waiter(ops)
            .wait_ready(&w, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn exec_uses_first_listed_pod() {
        let mut ops = MockClusterOps::new();
        ops.expect_list_pods()
            .returning(|_, _| Ok(vec![pod("nginx-1", true), pod("nginx-2", true)]));
        ops.expect_exec()
            .withf(|ns, pod, cmd| {
                ns == "ns1" && pod == "nginx-1" && cmd == ["touch", "/tmp/nginx-test"]
            })
            .times(1)
            .returning(|_, _, _| Ok(ExecOutput::succeeded("")));

        waiter(ops)
            .exec(&nginx(), &["touch", "/tmp/nginx-test"])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_exec_error() {
        let mut ops = MockClusterOps::new();
        ops.expect_list_pods()
            .returning(|_, _| Ok(vec![pod("nginx-1", true)]));
        ops.expect_exec()
            .returning(|_, _, _| Ok(ExecOutput::failed(1, "permission denied\n")));

        let err = waiter(ops)
            .exec(&nginx(), &["touch", "/etc/shadow"])
            .await
            .unwrap_err();
        match err {
            Error::Exec { pod, message, .. } => {
                assert_eq!(pod, "nginx-1");
                assert_eq!(message, "exit code 1: permission denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_pod_without_matches_is_resource_error() {
        let mut ops = MockClusterOps::new();
        ops.expect_list_pods().returning(|_, _| Ok(vec![]));

        let err = waiter(ops).first_pod(&nginx()).await.unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));
    }
}
