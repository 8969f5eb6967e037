//! Learning a profile from scratch does not leak agent memory
//!
//! With a store namespace configured, profiles live there instead of next to
//! the workload, named `<kind>-<name>-<namespace>`, and the workload runs in
//! the fixed namespace `test-namespace`.

use std::time::Duration;

use chrono::Utc;
use tracing::info;

use kubecop_cluster::ResourceScope;
use kubecop_common::{Error, Result};
use kubecop_evidence::check_bounded_growth;
use kubecop_evidence::metrics::pod_memory_query;

use super::{deploy, wait, NGINX_DEPLOYMENT};
use crate::context::{profile_is_final, ScenarioContext};

/// Workload namespace in store mode
pub const STORE_MODE_NAMESPACE: &str = "test-namespace";

/// Time for the final profile to be written
pub const FINALIZATION_DELAY: Duration = Duration::from_secs(150);

/// Time for the agent's garbage collection to settle
pub const GC_DELAY: Duration = Duration::from_secs(60);

/// Allowed memory growth, 20 MB
pub const TOLERANCE: f64 = 20_000_000.0;

const PLOT_NAME: &str = "install_app_no_application_profile_no_leak_mem";

const DEPLOYMENT_NAME: &str = "nginx-deployment";

/// Namespace and name of the profile recorded for `pod`
fn profile_location<'a>(
    store_namespace: Option<&'a str>,
    namespace: &'a str,
    pod: &str,
) -> (&'a str, String) {
    match store_namespace {
        Some(store) => (store, format!("pod-{pod}-{namespace}")),
        None => (namespace, format!("pod-{pod}")),
    }
}

/// nginx without a profile; the final profile must appear and agent memory must stay bounded
pub async fn run(ctx: &ScenarioContext) -> Result<()> {
    let store = ctx.config().store_namespace.as_deref();

    // agent-written profiles in the store; released after the workload's namespace is gone
    let profiles = ctx.resources();
    profiles
        .guard(async {
            if let Some(store) = store {
                profiles.namespace(Some(store)).await?;
            }
            let scope = ctx.resources();
            scope.guard(learn_and_measure(ctx, &scope, &profiles, store)).await
        })
        .await
}

async fn learn_and_measure(
    ctx: &ScenarioContext,
    scope: &ResourceScope,
    profiles: &ResourceScope,
    store: Option<&str>,
) -> Result<()> {
    let ns = match store {
        Some(_) => scope.namespace(Some(STORE_MODE_NAMESPACE)).await?,
        None => scope.namespace(None).await?,
    };

    let start = Utc::now();
    let nginx = deploy(ctx, scope, &ns.name, NGINX_DEPLOYMENT).await?;
    let pod = ctx.readiness().first_pod(&nginx).await?;

    if let Some(store) = store {
        profiles.track_object(ctx.profile_ref(store, &format!("pod-{}-{}", pod.name, ns.name)));
        profiles.track_object(
            ctx.profile_ref(store, &format!("deployment-{DEPLOYMENT_NAME}-{}", ns.name)),
        );
    }

    wait(FINALIZATION_DELAY, "the final application profile").await;

    let (profile_ns, profile_name) = profile_location(store, &ns.name, &pod.name);
    match ctx.application_profile(profile_ns, &profile_name).await? {
        Some(profile) if profile_is_final(&profile) => {
            info!(profile = %profile_name, namespace = %profile_ns, "Final profile created");
        }
        Some(_) => {
            return Err(Error::expectation(format!(
                "applicationprofile {profile_name} in {profile_ns} is not final"
            )))
        }
        None => {
            return Err(Error::expectation(format!(
                "final applicationprofile {profile_name} in {profile_ns} did not get created"
            )))
        }
    }

    wait(GC_DELAY, "garbage collection").await;

    let agent = ctx.agent_pod().await?;
    let series = ctx
        .metrics()
        .series(&pod_memory_query(&agent.name), start, Utc::now())
        .await?;
    ctx.plots()
        .render_series(PLOT_NAME, &series, "Memory Usage (bytes)");

    check_bounded_growth(&series, TOLERANCE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubecop_cluster::{MockClusterOps, PodInfo};
    use kubecop_common::SystestConfig;
    use serde_json::json;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[test]
    fn profile_lives_beside_workload_by_default() {
        let (ns, name) = profile_location(None, "kubecop-test-abcd", "nginx-7f9c-x2x");
        assert_eq!(ns, "kubecop-test-abcd");
        assert_eq!(name, "pod-nginx-7f9c-x2x");
    }

    #[test]
    fn store_mode_suffixes_namespace() {
        let (ns, name) = profile_location(Some("kubescape"), "test-namespace", "nginx-7f9c-x2x");
        assert_eq!(ns, "kubescape");
        assert_eq!(name, "pod-nginx-7f9c-x2x-test-namespace");
    }

    /// Cluster in store mode that records namespace and object deletions in order
    fn store_cluster(released: Arc<Mutex<Vec<String>>>) -> MockClusterOps {
        let mut ops = MockClusterOps::new();
        ops.expect_namespace_exists()
            .returning(|name| Ok(name == "store"));
        ops.expect_create_namespace()
            .withf(|name| name == STORE_MODE_NAMESPACE)
            .returning(|_| Ok(()));
        ops.expect_get_object().returning(|obj| {
            Ok((obj.kind == "ApplicationProfile").then(|| {
                json!({"metadata": {
                    "name": obj.name,
                    "annotations": {"kapprofiler.kubescape.io/final": "true"}
                }})
            }))
        });
        ops.expect_apply_object().returning(|_, _| Ok(()));
        ops.expect_list_pods().returning(|ns, _| {
            let name = if ns == "kubescape" { "kubecop-0" } else { "nginx-1" };
            Ok(vec![PodInfo {
                name: name.to_string(),
                ready: true,
                phase: Some("Running".to_string()),
            }])
        });
        let log = released.clone();
        ops.expect_delete_namespace().returning(move |name| {
            log.lock().unwrap().push(format!("Namespace:{name}"));
            Ok(())
        });
        ops.expect_delete_object().returning(move |obj| {
            released.lock().unwrap().push(format!("{}:{}", obj.kind, obj.name));
            Ok(())
        });
        ops
    }

    #[tokio::test(start_paused = true)]
    async fn store_profiles_are_deleted_after_workload_namespace() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let config = SystestConfig {
            root_directory: Path::new(env!("CARGO_MANIFEST_DIR")).join("../../system-tests"),
            store_namespace: Some("store".to_string()),
            // nothing listens here: the leak check cannot get data
            prometheus_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let ctx = ScenarioContext::new(config, Arc::new(store_cluster(released.clone()))).unwrap();

        assert!(run(&ctx).await.is_err());

        let released = released.lock().unwrap();
        let position = |entry: &str| {
            released
                .iter()
                .position(|r| r == entry)
                .unwrap_or_else(|| panic!("{entry} not released: {released:?}"))
        };
        let namespace = position("Namespace:test-namespace");
        assert!(position("Deployment:nginx-deployment") < namespace);
        assert!(namespace < position("ApplicationProfile:pod-nginx-1-test-namespace"));
        assert!(namespace < position("ApplicationProfile:deployment-nginx-deployment-test-namespace"));
        assert!(!released.iter().any(|r| r == "Namespace:store"));
    }
}
