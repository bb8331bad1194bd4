//! Container engine access
//!
//! The installer needs a narrow slice of the engine: probe, readiness,
//! inventory, stop/remove/prune, pull/tag and create. [`DockerCli`] drives
//! the `docker` binary through a [`CommandRunner`].

pub mod mock;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::InstallError;
use crate::process::{CommandOutput, CommandRunner, CommandSpec};

/// Image reference as `repository:tag`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerImageRef {
    pub repository: String,
    pub tag: String,
}

impl ContainerImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Same repository under another tag
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self::new(self.repository.clone(), tag)
    }
}

impl std::fmt::Display for ContainerImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Host path bound into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host: PathBuf,
    pub container: PathBuf,
}

impl BindMount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }
}

/// Everything needed to create a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: ContainerImageRef,
    pub restart_policy: String,
    pub network_mode: String,
    pub mounts: Vec<BindMount>,
    pub env: Vec<(String, String)>,
}

impl ContainerSpec {
    /// Arguments for `docker create`, image last
    pub fn create_args(&self) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--restart".to_string(),
            self.restart_policy.clone(),
            "--net".to_string(),
            self.network_mode.clone(),
        ];
        for mount in &self.mounts {
            args.push("-v".to_string());
            args.push(format!(
                "{}:{}",
                mount.host.display(),
                mount.container.display()
            ));
        }
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.image.to_string());
        args
    }
}

/// Entry in the host's container inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
}

/// Operations the installer performs against the container engine
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Client version; fails when the engine is not installed
    async fn version(&self) -> Result<String, InstallError>;

    /// Succeeds once the daemon answers requests
    async fn ping(&self) -> Result<(), InstallError>;

    /// Every container on the host, running or not
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, InstallError>;

    async fn stop_container(&self, id: &str) -> Result<(), InstallError>;

    async fn remove_container(&self, id: &str) -> Result<(), InstallError>;

    /// Remove dangling images
    async fn prune_images(&self) -> Result<(), InstallError>;

    async fn pull(&self, image: &ContainerImageRef) -> Result<(), InstallError>;

    async fn tag(
        &self,
        source: &ContainerImageRef,
        target: &ContainerImageRef,
    ) -> Result<(), InstallError>;

    /// Create (not start) a container, returning its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String, InstallError>;
}

/// [`ContainerEngine`] backed by the docker CLI
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    binary: String,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            binary: "docker".to_string(),
        }
    }

    /// Use a different client binary
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.binary).args(args)
    }

    /// Run a docker command, mapping a non-zero exit to an engine error
    async fn docker(
        &self,
        operation: &str,
        spec: CommandSpec,
    ) -> Result<CommandOutput, InstallError> {
        let output = self.runner.run(&spec).await?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(InstallError::engine(operation, output.stderr.trim()))
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn version(&self) -> Result<String, InstallError> {
        let output = self.docker("version", self.command(["--version"])).await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn ping(&self) -> Result<(), InstallError> {
        self.docker("info", self.command(["info", "--format", "{{.ServerVersion}}"]))
            .await
            .map(|_| ())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, InstallError> {
        let output = self
            .docker(
                "ps",
                self.command(["ps", "-a", "--no-trunc", "--format", "{{.ID}}\t{{.Names}}"]),
            )
            .await?;
        Ok(parse_container_list(&output.stdout))
    }

    async fn stop_container(&self, id: &str) -> Result<(), InstallError> {
        self.docker("stop", self.command(["stop", id])).await.map(|_| ())
    }

    async fn remove_container(&self, id: &str) -> Result<(), InstallError> {
        self.docker("rm", self.command(["rm", id])).await.map(|_| ())
    }

    async fn prune_images(&self) -> Result<(), InstallError> {
        self.docker("image prune", self.command(["image", "prune", "-f"]))
            .await
            .map(|_| ())
    }

    async fn pull(&self, image: &ContainerImageRef) -> Result<(), InstallError> {
        self.docker("pull", self.command(["pull".to_string(), image.to_string()]))
            .await
            .map(|_| ())
    }

    async fn tag(
        &self,
        source: &ContainerImageRef,
        target: &ContainerImageRef,
    ) -> Result<(), InstallError> {
        self.docker(
            "tag",
            self.command([
                "image".to_string(),
                "tag".to_string(),
                source.to_string(),
                target.to_string(),
            ]),
        )
        .await
        .map(|_| ())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, InstallError> {
        let command = self.command(spec.create_args());
        let output = self.runner.run(&command).await?;

        if !output.is_success() {
            let stderr = output.stderr.trim();
            if is_name_conflict(stderr) {
                return Err(InstallError::ContainerNameConflict(spec.name.clone()));
            }
            return Err(InstallError::engine("create", stderr));
        }

        let id = output.stdout.trim().to_string();
        debug!("Created container {} ({})", spec.name, id);
        Ok(id)
    }
}

/// Parse `ID<TAB>NAME` lines from `docker ps`
fn parse_container_list(stdout: &str) -> Vec<ContainerSummary> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (id, name) = line.split_once('\t').unwrap_or((line, ""));
            Some(ContainerSummary {
                id: id.trim().to_string(),
                name: name.trim().to_string(),
            })
        })
        .collect()
}

fn is_name_conflict(stderr: &str) -> bool {
    stderr.contains("is already in use") || stderr.contains("Conflict.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::mock::MockRunner;
    use tokio_test::{assert_err, assert_ok};

    fn control_spec() -> ContainerSpec {
        ContainerSpec {
            name: "blueos-bootstrap".to_string(),
            image: ContainerImageRef::new("bluerobotics/blueos-bootstrap", "1.2.0"),
            restart_policy: "unless-stopped".to_string(),
            network_mode: "host".to_string(),
            mounts: vec![BindMount::new(
                "/var/run/docker.sock",
                "/var/run/docker.sock",
            )],
            env: vec![("BLUEOS_CONFIG_PATH".to_string(), "/root/.config/blueos".to_string())],
        }
    }

    #[test]
    fn test_image_ref_display() {
        let image = ContainerImageRef::new("bluerobotics/blueos-core", "1.2.0");
        assert_eq!(image.to_string(), "bluerobotics/blueos-core:1.2.0");
        assert_eq!(
            image.with_tag("factory").to_string(),
            "bluerobotics/blueos-core:factory"
        );
    }

    #[test]
    fn test_create_args() {
        let args = control_spec().create_args();
        assert_eq!(
            args,
            vec![
                "create",
                "--name",
                "blueos-bootstrap",
                "--restart",
                "unless-stopped",
                "--net",
                "host",
                "-v",
                "/var/run/docker.sock:/var/run/docker.sock",
                "-e",
                "BLUEOS_CONFIG_PATH=/root/.config/blueos",
                "bluerobotics/blueos-bootstrap:1.2.0",
            ]
        );
    }

    #[test]
    fn test_parse_container_list() {
        let list = parse_container_list("abc123\tblueos-core\n\ndef456\tportainer\nlonely\n");
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].id, "abc123");
        assert_eq!(list[0].name, "blueos-core");
        assert_eq!(list[2].name, "");
    }

    #[tokio::test]
    async fn test_docker_cli_commands() {
        let runner = Arc::new(
            MockRunner::new()
                .respond(
                    "docker ps",
                    CommandOutput::success().with_stdout("abc\tblueos-core\n"),
                )
                .respond(
                    "docker --version",
                    CommandOutput::success().with_stdout("Docker version 24.0.7\n"),
                ),
        );
        let docker = DockerCli::new(runner.clone());

        assert_eq!(docker.version().await.unwrap(), "Docker version 24.0.7");
        assert_eq!(docker.list_containers().await.unwrap().len(), 1);

        let core = ContainerImageRef::new("bluerobotics/blueos-core", "1.2.0");
        assert_ok!(docker.pull(&core).await);
        assert_ok!(docker.tag(&core, &core.with_tag("factory")).await);
        assert_ok!(docker.prune_images().await);

        let commands = runner.commands();
        assert!(commands.contains(&"docker pull bluerobotics/blueos-core:1.2.0".to_string()));
        assert!(commands.contains(
            &"docker image tag bluerobotics/blueos-core:1.2.0 bluerobotics/blueos-core:factory"
                .to_string()
        ));
        assert!(commands.contains(&"docker image prune -f".to_string()));
    }

    #[tokio::test]
    async fn test_docker_cli_maps_name_conflict() {
        let runner = Arc::new(MockRunner::new().respond(
            "docker create",
            CommandOutput::failure(
                125,
                "Error response from daemon: Conflict. The container name \"/blueos-bootstrap\" is already in use",
            ),
        ));
        let docker = DockerCli::new(runner);

        let result = docker.create(&control_spec()).await;
        assert!(matches!(
            result,
            Err(InstallError::ContainerNameConflict(name)) if name == "blueos-bootstrap"
        ));
    }

    #[tokio::test]
    async fn test_docker_cli_missing_binary() {
        let runner = Arc::new(MockRunner::new().missing("docker"));
        let docker = DockerCli::new(runner);
        assert_err!(docker.version().await);
        assert_err!(docker.ping().await);
    }

    #[tokio::test]
    async fn test_docker_cli_pull_failure() {
        let runner = Arc::new(
            MockRunner::new().respond("docker pull", CommandOutput::failure(1, "manifest unknown")),
        );
        let docker = DockerCli::new(runner);

        let err = docker
            .pull(&ContainerImageRef::new("bluerobotics/blueos-core", "nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Engine { ref operation, .. } if operation == "pull"));
        assert!(err.to_string().contains("manifest unknown"));
    }
}
