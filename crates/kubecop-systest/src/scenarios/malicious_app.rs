//! A job that trips every rule raises every alert

use std::time::Duration;

use kubecop_common::Result;

use super::{deploy, expect_alerts, wait, MALICIOUS_JOB, MALICIOUS_PROFILE};
use crate::context::ScenarioContext;

/// Time the job gets to run through its activities
pub const ACTIVITY_DELAY: Duration = Duration::from_secs(20);

/// Rule names the malicious job must trigger
pub const EXPECTED_ALERTS: &[&str] = &[
    "Unexpected process launched",
    "Unexpected file access",
    "Unexpected system call",
    "Unexpected capability used",
    "Unexpected domain request",
    "Unexpected Service Account Token Access",
    "Kubernetes Client Executed",
    "Exec from malicious source",
    "Kernel Module Load",
    "Exec Binary Not In Base Image",
    "Malicious SSH Connection",
    "Exec from mount",
    "Unshare System Call usage",
    "Crypto Miners port detected",
];

/// Run the malicious job against its profile and expect the full alert set
pub async fn run(ctx: &ScenarioContext) -> Result<()> {
    let scope = ctx.resources();
    scope
        .guard(async {
            let ns = scope.namespace(None).await?;
            scope
                .manifest(&ns.name, &ctx.resource_path(MALICIOUS_PROFILE))
                .await?;
            deploy(ctx, &scope, &ns.name, MALICIOUS_JOB).await?;

            wait(ACTIVITY_DELAY, "the alerts to be generated").await;

            expect_alerts(ctx, &ns.name, EXPECTED_ALERTS).await
        })
        .await
}
