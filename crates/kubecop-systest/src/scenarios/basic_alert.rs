//! An unexpected process in a profiled workload raises an alert

use std::time::Duration;

use kubecop_common::Result;

use super::{deploy, expect_alerts, wait, NGINX_DEPLOYMENT, NGINX_PROFILE, TOUCH_COMMAND, UNEXPECTED_PROCESS};
use crate::context::ScenarioContext;

/// Time the agent gets to raise the alert
pub const ALERT_DELAY: Duration = Duration::from_secs(5);

/// nginx with a pre-created profile; `touch` must raise `Unexpected process launched`
pub async fn run(ctx: &ScenarioContext) -> Result<()> {
    let scope = ctx.resources();
    scope
        .guard(async {
            let ns = scope.namespace(None).await?;
            scope
                .manifest(&ns.name, &ctx.resource_path(NGINX_PROFILE))
                .await?;
            let nginx = deploy(ctx, &scope, &ns.name, NGINX_DEPLOYMENT).await?;

            ctx.readiness().exec(&nginx, TOUCH_COMMAND).await?;
            wait(ALERT_DELAY, "the alert to be signaled").await;

            expect_alerts(ctx, &ns.name, &[UNEXPECTED_PROCESS]).await
        })
        .await
}
