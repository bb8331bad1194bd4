//! Runtime stage - container engine bootstrap
//!
//! 1. Probe for an installed engine
//! 2. Otherwise run the upstream install script, with our own `VERSION`
//!    removed from its environment so it does not pick the BlueOS version
//! 3. If that fails outside CI the run halts; in CI a nested daemon is
//!    started instead and waited on, with a deadline and cancellation
//! 4. Register the engine to start on boot

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::orchestrator::InstallContext;
use crate::process::CommandSpec;
use crate::retry::{PollError, poll_until};
use crate::{InstallError, StepOutcome};

/// Unprivileged user the nested daemon remaps containers to
pub const REMAP_USER: &str = "dockremap";

/// Subordinate id range given to [`REMAP_USER`]
pub const SUBORDINATE_RANGE: &str = "165536:65536";

/// `useradd` exit status for an existing user
const USERADD_EXISTS: i32 = 9;

/// Run the runtime stage
pub async fn run(ctx: &InstallContext) -> Result<StepOutcome, InstallError> {
    let outcome = match ctx.engine.version().await {
        Ok(version) => {
            info!("Container engine already installed: {}", version);
            StepOutcome::Success
        }
        Err(probe_error) => {
            info!("No container engine found ({}), installing", probe_error);
            match install_engine(ctx).await {
                Ok(()) => {
                    info!("Container engine installed");
                    StepOutcome::Success
                }
                Err(e) if ctx.request.ci_run => {
                    warn!("Engine install failed: {}; starting nested runtime", e);
                    start_nested_runtime(ctx).await?;
                    StepOutcome::Degraded(format!("nested runtime after install failure: {}", e))
                }
                Err(e) => return Err(InstallError::RuntimeBootstrapFailed(e.to_string())),
            }
        }
    };

    enable_on_boot(ctx, &outcome).await?;
    Ok(outcome)
}

async fn install_engine(ctx: &InstallContext) -> Result<(), InstallError> {
    let script = ctx
        .fetcher
        .fetch(&ctx.request.artifacts.runtime_install)
        .await?;

    ctx.runner
        .run_checked(&CommandSpec::new("sh").env_remove("VERSION").stdin(script))
        .await?;
    Ok(())
}

/// Fetch the nested-runtime helper, prepare id remapping, launch the daemon
/// and wait for it to answer
async fn start_nested_runtime(ctx: &InstallContext) -> Result<(), InstallError> {
    let helper = ctx.paths.nested_runtime_helper();
    let body = ctx
        .fetcher
        .fetch(&ctx.request.artifacts.nested_runtime)
        .await?;
    if let Some(parent) = helper.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&helper, body).await?;
    fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755)).await?;
    debug!("Installed nested runtime helper at {}", helper.display());

    ensure_remap_user(ctx).await?;
    ensure_subordinate_range(&ctx.paths.subuid()).await?;
    ensure_subordinate_range(&ctx.paths.subgid()).await?;

    let daemon = CommandSpec::new(helper.display().to_string())
        .arg("dockerd")
        .args(ctx.request.docker_opts.iter().cloned());
    let pid = ctx
        .runner
        .spawn_detached(&daemon, &ctx.paths.nested_daemon_log())
        .await?;
    info!("Nested container daemon started (pid {})", pid);

    wait_until_ready(ctx).await
}

/// Poll the engine until it answers, bounded by the configured timeout
pub async fn wait_until_ready(ctx: &InstallContext) -> Result<(), InstallError> {
    let engine = &ctx.engine;
    let timeout = ctx.request.runtime_ready_timeout;

    let result = poll_until(timeout, ctx.readiness_interval, &ctx.cancel, move || async move {
        engine.ping().await.is_ok()
    })
    .await;

    match result {
        Ok(checks) => {
            info!("Container engine ready after {} checks", checks);
            Ok(())
        }
        Err(PollError::TimedOut(waited)) => Err(InstallError::RuntimeBootstrapTimeout(waited)),
        Err(PollError::Cancelled) => Err(InstallError::Cancelled(
            "waiting for the nested container runtime".to_string(),
        )),
    }
}

async fn ensure_remap_user(ctx: &InstallContext) -> Result<(), InstallError> {
    let spec = CommandSpec::new("useradd").args([
        "--system",
        "--no-create-home",
        "--shell",
        "/bin/false",
        REMAP_USER,
    ]);
    let output = ctx.runner.run(&spec).await?;

    match output.code {
        Some(0) => {
            debug!("Created user {}", REMAP_USER);
            Ok(())
        }
        Some(USERADD_EXISTS) => {
            debug!("User {} already exists", REMAP_USER);
            Ok(())
        }
        _ => output.check(&spec).map(|_| ()),
    }
}

async fn ensure_subordinate_range(path: &Path) -> Result<(), InstallError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    if let Some(updated) = with_subordinate_range(&content) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, updated).await?;
        debug!("Added {} range to {}", REMAP_USER, path.display());
    }
    Ok(())
}

/// Add the remap user's range, or `None` when one is already present
pub fn with_subordinate_range(content: &str) -> Option<String> {
    let prefix = format!("{}:", REMAP_USER);
    if content.lines().any(|line| line.starts_with(&prefix)) {
        return None;
    }

    let mut updated = content.to_string();
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&format!("{}:{}\n", REMAP_USER, SUBORDINATE_RANGE));
    Some(updated)
}

async fn enable_on_boot(ctx: &InstallContext, outcome: &StepOutcome) -> Result<(), InstallError> {
    let spec = CommandSpec::new("systemctl").args(["enable", "docker"]);

    match outcome {
        // The nested daemon is not a systemd unit; enabling is best effort
        StepOutcome::Degraded(_) => match ctx.runner.run_checked(&spec).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Could not enable docker on boot in nested mode: {}", e);
                Ok(())
            }
        },
        _ => ctx.runner.run_checked(&spec).await.map(|_| ()),
    }
}
