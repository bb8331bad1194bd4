//! Final stage - schedule the reboot

use tracing::info;

use crate::orchestrator::InstallContext;
use crate::process::CommandSpec;
use crate::{InstallError, StepOutcome};

/// Delay handed to `shutdown -r`
pub const REBOOT_DELAY: &str = "+1";

pub const REBOOT_MESSAGE: &str = "BlueOS installed, rebooting to finish setup";

/// Schedule a reboot one minute out
pub async fn run(ctx: &InstallContext) -> Result<StepOutcome, InstallError> {
    ctx.runner.run_checked(&reboot_command()).await?;

    info!("Installation complete, reboot scheduled in one minute");
    Ok(StepOutcome::Success)
}

pub fn reboot_command() -> CommandSpec {
    CommandSpec::new("shutdown").args(["-r", REBOOT_DELAY, REBOOT_MESSAGE])
}
