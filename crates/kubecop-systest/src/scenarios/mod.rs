//! The scenario catalogue
//!
//! Each scenario acquires its resources through a [`ResourceScope`] and runs
//! its body inside [`ResourceScope::guard`], so everything it created is gone
//! before the runner moves on.

use futures::FutureExt;
use tracing::info;

use kubecop_cluster::{ResourceScope, Workload, DEFAULT_READY_TIMEOUT};
use kubecop_common::{Error, Result, SystestConfig};

use crate::context::ScenarioContext;
use crate::runner::{ScenarioConfig, ScenarioRunner};

pub mod alert_load_leak;
pub mod basic_alert;
pub mod finalization;
pub mod kill_in_the_middle;
pub mod load_activities;
pub mod malicious_app;
pub mod profile_leak;
pub mod rule_binding;

/// nginx deployment labelled `app=nginx`
pub const NGINX_DEPLOYMENT: &str = "resources/nginx-deployment.yaml";
/// Pre-created application profile for the nginx deployment
pub const NGINX_PROFILE: &str = "resources/nginx-app-profile.yaml";
/// Job exercising every rule
pub const MALICIOUS_JOB: &str = "resources/malicious-job.yaml";
/// Pre-created application profile for the malicious job
pub const MALICIOUS_PROFILE: &str = "resources/malicious-job-app-profile.yaml";
/// Locust load generator hitting nginx
pub const LOCUST_DEPLOYMENT: &str = "resources/locust-deployment.yaml";

/// Command whose execution the nginx profile does not allow
pub const TOUCH_COMMAND: &[&str] = &["touch", "/tmp/nginx-test"];

/// Rule fired by [`TOUCH_COMMAND`]
pub const UNEXPECTED_PROCESS: &str = "Unexpected process launched";

/// Register the catalogue in run order
pub fn register_all(runner: &mut ScenarioRunner, config: &SystestConfig) {
    runner.register("Basic alert test", ScenarioConfig::critical(), |ctx| {
        basic_alert::run(ctx).boxed()
    });
    runner.register("Rule binding apply test", ScenarioConfig::critical(), |ctx| {
        rule_binding::run(ctx).boxed()
    });
    runner.register("Finalization alert test", ScenarioConfig::critical(), |ctx| {
        finalization::run(ctx).boxed()
    });
    runner.register(
        "All alerts from malicious app test",
        ScenarioConfig::critical(),
        |ctx| malicious_app::run(ctx).boxed(),
    );
    runner.register(
        "Basic load activities test",
        ScenarioConfig::default(),
        |ctx| load_activities::run(ctx).boxed(),
    );
    runner.register(
        "Load 10k alerts no memory leak test",
        ScenarioConfig::default(),
        |ctx| alert_load_leak::run(ctx).boxed(),
    );
    runner.register(
        "Install app no application profile no leak test",
        ScenarioConfig::default(),
        |ctx| profile_leak::run(ctx).boxed(),
    );
    if config.include_disruptive {
        runner.register(
            "Kill process in the middle test",
            ScenarioConfig::default(),
            |ctx| kill_in_the_middle::run(ctx).boxed(),
        );
    }
}

/// Apply a workload manifest and wait for its pods
pub async fn deploy(
    ctx: &ScenarioContext,
    scope: &ResourceScope,
    namespace: &str,
    manifest: &str,
) -> Result<Workload> {
    let workload = scope
        .workload(namespace, &ctx.resource_path(manifest))
        .await?;
    ctx.readiness()
        .wait_ready(&workload, DEFAULT_READY_TIMEOUT)
        .await?;
    Ok(workload)
}

/// Every name in `expected` must appear as the `rule_name` of an active alert in `namespace`
pub async fn expect_alerts(ctx: &ScenarioContext, namespace: &str, expected: &[&str]) -> Result<()> {
    let alerts = ctx.namespace_alerts(namespace).await;
    let missing = missing_alerts(
        alerts.iter().filter_map(|a| a.label("rule_name")),
        expected,
    );

    if missing.is_empty() {
        info!(namespace = %namespace, count = expected.len(), "All expected alerts signaled");
        return Ok(());
    }
    Err(Error::expectation(format!(
        "Expected alerts {missing:?} were not signaled"
    )))
}

fn missing_alerts<'a>(
    signaled: impl Iterator<Item = &'a str>,
    expected: &[&'a str],
) -> Vec<&'a str> {
    let signaled: Vec<&str> = signaled.collect();
    expected
        .iter()
        .copied()
        .filter(|name| !signaled.contains(name))
        .collect()
}

/// Sleep, logging why
pub async fn wait(duration: std::time::Duration, reason: &str) {
    info!(?duration, "Waiting for {reason}");
    tokio::time::sleep(duration).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MetricsWindowReporter;
    use std::sync::Arc;
    use std::time::Duration;

    fn registered(include_disruptive: bool) -> Vec<String> {
        let config = SystestConfig {
            include_disruptive,
            ..Default::default()
        };
        let mut runner = ScenarioRunner::new(Arc::new(MetricsWindowReporter), Duration::ZERO);
        register_all(&mut runner, &config);
        runner
            .scenario_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn catalogue_order_is_fixed() {
        assert_eq!(
            registered(false),
            vec![
                "Basic alert test",
                "Rule binding apply test",
                "Finalization alert test",
                "All alerts from malicious app test",
                "Basic load activities test",
                "Load 10k alerts no memory leak test",
                "Install app no application profile no leak test",
            ]
        );
    }

    #[test]
    fn disruptive_scenario_is_opt_in() {
        let names = registered(true);
        assert_eq!(names.len(), 8);
        assert_eq!(names.last().unwrap(), "Kill process in the middle test");
    }

    #[test]
    fn missing_lists_unsignaled_names() {
        let signaled = ["Unexpected file access", "Exec from mount"];
        let missing = missing_alerts(
            signaled.iter().copied(),
            &["Unexpected file access", "Kernel Module Load", "Exec from mount"],
        );
        assert_eq!(missing, vec!["Kernel Module Load"]);
    }

    #[test]
    fn duplicates_do_not_matter() {
        let signaled = [UNEXPECTED_PROCESS, UNEXPECTED_PROCESS];
        assert!(missing_alerts(signaled.iter().copied(), &[UNEXPECTED_PROCESS]).is_empty());
    }
}
