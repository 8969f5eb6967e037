//! Agent CPU stays low while nginx serves steady traffic

use std::time::Duration;

use chrono::Utc;
use tracing::info;

use kubecop_common::{Error, Result};
use kubecop_evidence::ProfileKind;

use super::{deploy, wait, LOCUST_DEPLOYMENT, NGINX_DEPLOYMENT, NGINX_PROFILE};
use crate::context::ScenarioContext;

/// Length of the load window
pub const LOAD_WINDOW: Duration = Duration::from_secs(300);

/// Highest acceptable mean agent CPU, in cores
pub const CPU_LIMIT: f64 = 0.1;

/// nginx under locust load; the agent's mean CPU over the window must stay under [`CPU_LIMIT`]
pub async fn run(ctx: &ScenarioContext) -> Result<()> {
    let scope = ctx.resources();
    scope
        .guard(async {
            let ns = scope.namespace(None).await?;
            scope
                .manifest(&ns.name, &ctx.resource_path(NGINX_PROFILE))
                .await?;
            deploy(ctx, &scope, &ns.name, NGINX_DEPLOYMENT).await?;
            deploy(ctx, &scope, &ns.name, LOCUST_DEPLOYMENT).await?;

            ctx.profile_agent_detached(
                ProfileKind::Cpu,
                LOAD_WINDOW,
                ctx.config().output_dir.join("basic_load_activities_cpu.pprof"),
            )
            .await;

            let start = Utc::now();
            wait(LOAD_WINDOW, "the load window").await;
            let end = Utc::now();

            let config = ctx.config();
            let usage = ctx
                .average_cpu_usage(&config.agent_namespace, &config.agent_workload, start, end)
                .await?;
            check_cpu(usage)
        })
        .await
}

fn check_cpu(usage: f64) -> Result<()> {
    if usage < CPU_LIMIT {
        info!(usage, limit = CPU_LIMIT, "Agent CPU within limit");
        return Ok(());
    }
    Err(Error::expectation(format!(
        "CPU usage of KubeCop is too high. CPU usage is {usage}"
    )))
}
