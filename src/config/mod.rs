//! Installation request resolution
//!
//! Flags, environment overrides and the optional config file are collapsed
//! into one [`InstallationRequest`] before any stage runs. Stages only ever
//! see it by shared reference.

pub mod loader;

pub use loader::{InstallConfigFile, Overrides};

use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Version installed when nothing else is requested
pub const DEFAULT_VERSION: &str = "master";

/// Repository hosting the install artifacts
pub const DEFAULT_GITHUB_REPOSITORY: &str = "bluerobotics/blueos-docker";

/// Raw content host the remote root is derived from
pub const DEFAULT_REMOTE_HOST: &str = "https://raw.githubusercontent.com";

/// Registry namespace of the BlueOS images
pub const DEFAULT_IMAGE_NAMESPACE: &str = "bluerobotics";

/// Upstream installer for the container engine
pub const RUNTIME_INSTALL_URL: &str = "https://get.docker.com";

/// moby revision the nested-runtime helper is pinned to
pub const NESTED_RUNTIME_REVISION: &str = "v24.0.7";

/// Default bound on the nested runtime readiness wait
pub const DEFAULT_RUNTIME_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound accepted for the readiness wait
pub const MAX_RUNTIME_READY_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Which containers the cleanup stage removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupScope {
    /// Every container on the host
    #[default]
    All,
    /// Only containers whose name starts with [`CleanupScope::OWNED_PREFIX`]
    Owned,
}

impl CleanupScope {
    pub const OWNED_PREFIX: &'static str = "blueos";

    /// Whether a container with this name falls inside the scope
    pub fn includes(&self, container_name: &str) -> bool {
        match self {
            CleanupScope::All => true,
            CleanupScope::Owned => container_name
                .trim_start_matches('/')
                .starts_with(Self::OWNED_PREFIX),
        }
    }
}

/// Remote resources fetched during a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifactSet {
    /// `<remote>/<version>`; probed once during preflight
    pub root: String,
    pub board_config: String,
    pub udev_rules: String,
    pub network_config: String,
    pub runtime_install: String,
    pub nested_runtime: String,
}

impl RemoteArtifactSet {
    /// Derive every artifact URL from the resolved root
    pub fn from_root(root: &str) -> Self {
        let root = root.trim_end_matches('/').to_string();
        let under_root = |path: &str| format!("{}/{}", root, path);

        Self {
            board_config: under_root("install/boards/configure_board.sh"),
            udev_rules: under_root("install/udev/100.autopilot.rules"),
            network_config: under_root("install/network/configure_network.sh"),
            runtime_install: RUNTIME_INSTALL_URL.to_string(),
            nested_runtime: format!(
                "{}/moby/moby/{}/hack/dind",
                DEFAULT_REMOTE_HOST, NESTED_RUNTIME_REVISION
            ),
            root,
        }
    }
}

/// Immutable input to every stage
#[derive(Debug, Clone)]
pub struct InstallationRequest {
    /// Tag applied to the bootstrap and core images
    pub version: String,
    /// Repository hosting the install artifacts (`owner/name`)
    pub github_repository: String,
    /// Remote base the root URL was derived from
    pub remote: String,
    pub artifacts: RemoteArtifactSet,
    pub skip_board_config: bool,
    /// Enables the nested runtime fallback and verbose tracing
    pub ci_run: bool,
    pub no_clean: bool,
    /// Extra arguments for the nested daemon
    pub docker_opts: Vec<String>,
    pub image_namespace: String,
    pub cleanup_scope: CleanupScope,
    pub runtime_ready_timeout: Duration,
    pub fetch_policy: RetryPolicy,
}

impl InstallationRequest {
    /// Resolved root artifact URL
    pub fn root_url(&self) -> &str {
        &self.artifacts.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifacts_from_root() {
        let set = RemoteArtifactSet::from_root(
            "https://raw.githubusercontent.com/bluerobotics/blueos-docker/1.2.3/",
        );
        assert_eq!(
            set.root,
            "https://raw.githubusercontent.com/bluerobotics/blueos-docker/1.2.3"
        );
        assert_eq!(
            set.udev_rules,
            "https://raw.githubusercontent.com/bluerobotics/blueos-docker/1.2.3/install/udev/100.autopilot.rules"
        );
        assert!(set.board_config.ends_with("/install/boards/configure_board.sh"));
        assert_eq!(set.runtime_install, "https://get.docker.com");
        assert!(set.nested_runtime.contains(NESTED_RUNTIME_REVISION));
    }

    #[test]
    fn test_cleanup_scope() {
        assert!(CleanupScope::All.includes("portainer"));
        assert!(CleanupScope::Owned.includes("blueos-core"));
        assert!(CleanupScope::Owned.includes("/blueos-bootstrap"));
        assert!(!CleanupScope::Owned.includes("portainer"));
    }

    #[test]
    fn test_default_request() {
        let request = loader::resolve(&Overrides::default(), None).unwrap();
        assert_eq!(request.version, "master");
        assert_eq!(
            request.root_url(),
            "https://raw.githubusercontent.com/bluerobotics/blueos-docker/master"
        );
        assert!(!request.ci_run);
        assert!(!request.no_clean);
        assert_eq!(request.cleanup_scope, CleanupScope::All);
    }
}
