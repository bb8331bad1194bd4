//! Board configuration stage
//!
//! Runs the board-specific hardware configuration script from the artifact
//! root. Hosts without a device-tree model (anything that is not an SBC) have
//! nothing to configure; that is logged and skipped, not an error.

use std::io::ErrorKind;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::orchestrator::InstallContext;
use crate::process::CommandSpec;
use crate::{InstallError, StepOutcome};

/// Run the board configuration stage
pub async fn run(ctx: &InstallContext) -> Result<StepOutcome, InstallError> {
    let model_path = ctx.paths.device_tree_model();
    let model = match fs::read(&model_path).await {
        Ok(raw) => parse_model(&raw),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(
                "No board model at {}, skipping board configuration",
                model_path.display()
            );
            return Ok(StepOutcome::Skipped("no board model found".to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    info!("Detected board: {}", model);

    let script = ctx.fetcher.fetch(&ctx.request.artifacts.board_config).await?;
    debug!("Running board configuration script ({} bytes)", script.len());

    ctx.runner
        .run_checked(&CommandSpec::new("bash").stdin(script))
        .await?;

    Ok(StepOutcome::Success)
}

/// Device-tree strings are NUL-terminated
fn parse_model(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}
