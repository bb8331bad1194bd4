//! Image and container stages
//!
//! Cleanup, image pull with the factory alias, and creation of the control
//! container. Image references and the container spec are built here and
//! nowhere else.

use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::InstallationRequest;
use crate::engine::{BindMount, ContainerImageRef, ContainerSpec};
use crate::orchestrator::InstallContext;
use crate::state::InstallPaths;
use crate::{InstallError, StepOutcome};

/// Name of the control container
pub const CONTROL_CONTAINER_NAME: &str = "blueos-bootstrap";

/// Tag of the rollback alias of the core image
pub const FACTORY_TAG: &str = "factory";

/// Engine control socket exposed to the control container
pub const ENGINE_SOCKET: &str = "/var/run/docker.sock";

/// The three image references of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSet {
    pub bootstrap: ContainerImageRef,
    pub core: ContainerImageRef,
    /// Retag of `core`; never pulled on its own
    pub factory: ContainerImageRef,
}

impl ImageSet {
    pub fn for_request(request: &InstallationRequest) -> Self {
        let core = ContainerImageRef::new(
            format!("{}/blueos-core", request.image_namespace),
            request.version.clone(),
        );
        Self {
            bootstrap: ContainerImageRef::new(
                format!("{}/blueos-bootstrap", request.image_namespace),
                request.version.clone(),
            ),
            factory: core.with_tag(FACTORY_TAG),
            core,
        }
    }
}

/// The control container's fixed spec, with paths expanded for this host
pub fn control_container_spec(
    request: &InstallationRequest,
    paths: &InstallPaths,
) -> ContainerSpec {
    ContainerSpec {
        name: CONTROL_CONTAINER_NAME.to_string(),
        image: ImageSet::for_request(request).bootstrap,
        restart_policy: "unless-stopped".to_string(),
        network_mode: "host".to_string(),
        mounts: vec![
            BindMount::new(paths.bootstrap_config_dir(), "/root/.config/bootstrap"),
            BindMount::new(ENGINE_SOCKET, ENGINE_SOCKET),
        ],
        env: vec![(
            "BLUEOS_CONFIG_PATH".to_string(),
            paths.blueos_config_dir().display().to_string(),
        )],
    }
}

/// Stop and remove existing containers, then prune dangling images
pub async fn cleanup(ctx: &InstallContext) -> Result<StepOutcome, InstallError> {
    let scope = ctx.request.cleanup_scope;
    let containers = ctx.engine.list_containers().await?;
    let targets: Vec<_> = containers
        .iter()
        .filter(|c| scope.includes(&c.name))
        .collect();

    if targets.is_empty() {
        info!("No existing containers to clean up");
    } else {
        info!("Removing {} existing containers ({:?} scope)", targets.len(), scope);
    }

    for container in targets {
        debug!("Stopping {} ({})", container.name, container.id);
        // An exited container may refuse to stop; removal below decides
        if let Err(e) = ctx.engine.stop_container(&container.id).await {
            warn!("Could not stop {}: {}", container.name, e);
        }
        ctx.engine.remove_container(&container.id).await?;
    }

    ctx.engine.prune_images().await?;
    Ok(StepOutcome::Success)
}

/// Pull the pinned images and create the factory alias
pub async fn pull(ctx: &InstallContext) -> Result<StepOutcome, InstallError> {
    let images = ImageSet::for_request(&ctx.request);

    info!("Pulling {}", images.bootstrap);
    ctx.engine.pull(&images.bootstrap).await?;

    info!("Pulling {}", images.core);
    ctx.engine.pull(&images.core).await?;

    // Only reachable with the core image present, so the alias never dangles
    info!("Tagging {} as {}", images.core, images.factory);
    ctx.engine.tag(&images.core, &images.factory).await?;

    Ok(StepOutcome::Success)
}

/// Create the control container
///
/// A container with the same name is not removed first; outside cleanup a
/// leftover one makes this fail with [`InstallError::ContainerNameConflict`].
pub async fn create_control_container(ctx: &InstallContext) -> Result<StepOutcome, InstallError> {
    let spec = control_container_spec(&ctx.request, &ctx.paths);

    fs::create_dir_all(ctx.paths.bootstrap_config_dir()).await?;

    let id = ctx.engine.create(&spec).await?;
    info!("Created control container {} ({})", spec.name, id);
    Ok(StepOutcome::Success)
}
