//! Killing a workload's main process before finalization delays its profile

use std::time::Duration;

use tracing::{info, warn};

use kubecop_common::{Error, Result};

use super::{deploy, wait, NGINX_DEPLOYMENT};
use crate::context::ScenarioContext;

/// Time into the learning period at which the process is killed
pub const KILL_DELAY: Duration = Duration::from_secs(100);

/// Time for the profile to be written after the kill
pub const RECOVERY_DELAY: Duration = Duration::from_secs(30);

const KILL_COMMAND: &[&str] = &["kill", "-9", "1"];

fn has_nginx_profile(names: &[String]) -> bool {
    names.iter().any(|n| n.contains("nginx"))
}

/// Kill PID 1 of nginx mid-learning; no profile yet, then one shortly after
pub async fn run(ctx: &ScenarioContext) -> Result<()> {
    let scope = ctx.resources();
    scope
        .guard(async {
            let ns = scope.namespace(None).await?;
            let nginx = deploy(ctx, &scope, &ns.name, NGINX_DEPLOYMENT).await?;
            let readiness = ctx.readiness();
            let pod = readiness.first_pod(&nginx).await?;

            wait(KILL_DELAY, "load before the kill").await;
            match readiness.exec_in_pod(&ns.name, &pod.name, KILL_COMMAND).await {
                Ok(_) => info!(pod = %pod.name, "Killed main process"),
                // the session dies with the process it killed
                Err(e @ Error::Exec { .. }) => warn!(pod = %pod.name, error = %e, "Kill exec ended abnormally"),
                Err(e) => return Err(e),
            }

            if has_nginx_profile(&ctx.application_profile_names(&ns.name).await?) {
                return Err(Error::expectation("applicationprofile did get created"));
            }

            wait(RECOVERY_DELAY, "the profile after restart").await;

            if !has_nginx_profile(&ctx.application_profile_names(&ns.name).await?) {
                return Err(Error::expectation("applicationprofile did not get created"));
            }
            Ok(())
        })
        .await
}
