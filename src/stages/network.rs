//! Network stage - network configuration script
//!
//! Runs last before the reboot is scheduled, after the control container
//! exists: the script may take down the interface the artifacts came from.

use tracing::{debug, info};

use crate::orchestrator::InstallContext;
use crate::process::CommandSpec;
use crate::{InstallError, StepOutcome};

/// Run the network configuration stage
pub async fn run(ctx: &InstallContext) -> Result<StepOutcome, InstallError> {
    let url = &ctx.request.artifacts.network_config;
    let script = ctx.fetcher.fetch(url).await?;
    debug!("Fetched network configuration script from {}", url);

    let output = ctx
        .runner
        .run_checked(&CommandSpec::new("bash").stdin(script))
        .await?;
    if !output.stdout.trim().is_empty() {
        debug!("Network script output: {}", output.stdout.trim());
    }

    info!("Network configured");
    Ok(StepOutcome::Success)
}
