//! A burst of alerts does not grow the agent's memory

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use kubecop_common::{Error, Result};
use kubecop_evidence::metrics::pod_memory_query;
use kubecop_evidence::{check_bounded_growth, MetricSeries};

use super::{deploy, NGINX_DEPLOYMENT, NGINX_PROFILE, TOUCH_COMMAND};
use crate::context::ScenarioContext;

/// Number of alert-raising execs
pub const ALERT_BURST: usize = 10;

/// How long to wait for the first memory samples of the window
pub const SAMPLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Allowed growth in bytes
pub const TOLERANCE: f64 = 0.0;

const PLOT_NAME: &str = "load_10k_alerts_no_memory_leak";

/// nginx with a profile, a burst of `touch` execs, then agent memory must not have grown
pub async fn run(ctx: &ScenarioContext) -> Result<()> {
    let scope = ctx.resources();
    scope
        .guard(async {
            let ns = scope.namespace(None).await?;
            scope
                .manifest(&ns.name, &ctx.resource_path(NGINX_PROFILE))
                .await?;
            let nginx = deploy(ctx, &scope, &ns.name, NGINX_DEPLOYMENT).await?;

            let readiness = ctx.readiness();
            let pod = readiness.first_pod(&nginx).await?;
            let start = Utc::now();
            for i in 0..ALERT_BURST {
                readiness
                    .exec_in_pod(&ns.name, &pod.name, TOUCH_COMMAND)
                    .await?;
                debug!(executed = i + 1, "Exec burst progress");
            }
            info!(count = ALERT_BURST, pod = %pod.name, "Exec burst done");

            let agent = ctx.agent_pod().await?;
            let series = memory_since(ctx, &pod_memory_query(&agent.name), start).await?;
            ctx.plots()
                .render_series(PLOT_NAME, &series, "Memory Usage (bytes)");

            check_bounded_growth(&series, TOLERANCE)
        })
        .await
}

/// Agent memory from `start` to now, retrying until the backend has samples
async fn memory_since(
    ctx: &ScenarioContext,
    query: &str,
    start: DateTime<Utc>,
) -> Result<MetricSeries> {
    let deadline = tokio::time::Instant::now() + SAMPLE_TIMEOUT;
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        match ctx.metrics().series(query, start, Utc::now()).await {
            Ok(series) if !series.is_empty() => return Ok(series),
            Ok(_) | Err(Error::NoData { .. }) if tokio::time::Instant::now() < deadline => {
                debug!("No memory samples yet");
            }
            Ok(_) => return Err(Error::no_data(query)),
            Err(e) => return Err(e),
        }
    }
}
