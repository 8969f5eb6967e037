//! Alerts fire against a profile the agent learned and finalized itself

use std::time::Duration;

use kubecop_common::Result;

use super::basic_alert::ALERT_DELAY;
use super::{deploy, expect_alerts, wait, NGINX_DEPLOYMENT, TOUCH_COMMAND, UNEXPECTED_PROCESS};
use crate::context::ScenarioContext;

/// Learning period plus finalization
pub const FINALIZATION_DELAY: Duration = Duration::from_secs(160);

/// nginx without a profile; after finalization `touch` must raise `Unexpected process launched`
pub async fn run(ctx: &ScenarioContext) -> Result<()> {
    let scope = ctx.resources();
    scope
        .guard(async {
            let ns = scope.namespace(None).await?;
            let nginx = deploy(ctx, &scope, &ns.name, NGINX_DEPLOYMENT).await?;

            wait(FINALIZATION_DELAY, "the profile to be finalized").await;

            ctx.readiness().exec(&nginx, TOUCH_COMMAND).await?;
            wait(ALERT_DELAY, "the alert to be signaled").await;

            expect_alerts(ctx, &ns.name, &[UNEXPECTED_PROCESS]).await
        })
        .await
}
