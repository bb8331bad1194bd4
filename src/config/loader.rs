//! Installer config loader
//!
//! Layers built-in defaults, the optional YAML config file and the
//! command-line/environment overrides into an [`InstallationRequest`].

use super::{
    CleanupScope, DEFAULT_GITHUB_REPOSITORY, DEFAULT_IMAGE_NAMESPACE, DEFAULT_REMOTE_HOST,
    DEFAULT_RUNTIME_READY_TIMEOUT, DEFAULT_VERSION, InstallationRequest, MAX_RUNTIME_READY_TIMEOUT,
    RemoteArtifactSet,
};
use crate::InstallError;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// Default location of the installer config file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/blueos/install.yaml";

/// Values supplied on the command line or through the environment
///
/// These take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub skip_board_config: bool,
    pub ci_run: bool,
    pub no_clean: bool,
    pub version: Option<String>,
    pub github_repository: Option<String>,
    pub remote: Option<String>,
    pub docker_opts: Option<String>,
}

/// Optional YAML config file
///
/// ```yaml
/// version: 1.4.0
/// cleanup_scope: owned
/// runtime_ready_timeout_secs: 300
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallConfigFile {
    pub version: Option<String>,
    pub github_repository: Option<String>,
    pub remote: Option<String>,
    pub no_clean: Option<bool>,
    pub docker_opts: Option<String>,
    pub image_namespace: Option<String>,
    pub cleanup_scope: Option<CleanupScope>,
    pub runtime_ready_timeout_secs: Option<u64>,
    pub fetch_attempts: Option<u32>,
    pub fetch_timeout_secs: Option<u64>,
}

impl InstallConfigFile {
    /// Parse a config file from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    /// Load the config file, or `None` when it does not exist
    pub async fn load(path: impl AsRef<Path>) -> Result<Option<Self>, InstallError> {
        let path = path.as_ref();

        if !path.exists() {
            debug!("No installer config at {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(path).await?;
        let config = Self::from_yaml(&content).map_err(|e| {
            InstallError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        debug!("Loaded installer config from {}", path.display());
        Ok(Some(config))
    }
}

/// Resolve the installation request
pub fn resolve(
    overrides: &Overrides,
    file: Option<&InstallConfigFile>,
) -> Result<InstallationRequest, InstallError> {
    let file = file.cloned().unwrap_or_default();

    let version = pick(&overrides.version, &file.version, DEFAULT_VERSION);
    validate_token("version", &version)?;

    let github_repository = pick(
        &overrides.github_repository,
        &file.github_repository,
        DEFAULT_GITHUB_REPOSITORY,
    );
    validate_token("repository", &github_repository)?;
    if !github_repository.contains('/') {
        return Err(InstallError::Config(format!(
            "repository must look like owner/name, got '{}'",
            github_repository
        )));
    }

    let default_remote = format!("{}/{}", DEFAULT_REMOTE_HOST, github_repository);
    let remote = pick(&overrides.remote, &file.remote, &default_remote)
        .trim_end_matches('/')
        .to_string();
    if !(remote.starts_with("https://") || remote.starts_with("http://")) {
        return Err(InstallError::Config(format!(
            "remote must be an http(s) URL, got '{}'",
            remote
        )));
    }

    let root = format!("{}/{}", remote, version);

    let docker_opts = overrides
        .docker_opts
        .as_deref()
        .or(file.docker_opts.as_deref())
        .map(|opts| opts.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let image_namespace = file
        .image_namespace
        .clone()
        .unwrap_or_else(|| DEFAULT_IMAGE_NAMESPACE.to_string());
    validate_token("image_namespace", &image_namespace)?;

    let runtime_ready_timeout = file
        .runtime_ready_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RUNTIME_READY_TIMEOUT);
    if runtime_ready_timeout.is_zero() {
        return Err(InstallError::Config(
            "runtime_ready_timeout_secs must be positive".to_string(),
        ));
    }
    if runtime_ready_timeout > MAX_RUNTIME_READY_TIMEOUT {
        return Err(InstallError::Config(format!(
            "runtime_ready_timeout_secs must be at most {}, got {}",
            MAX_RUNTIME_READY_TIMEOUT.as_secs(),
            runtime_ready_timeout.as_secs()
        )));
    }

    let defaults = RetryPolicy::default();
    let fetch_policy = RetryPolicy::new(
        file.fetch_attempts.unwrap_or(defaults.max_attempts),
        file.fetch_timeout_secs
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or(defaults.attempt_timeout),
    );

    Ok(InstallationRequest {
        artifacts: RemoteArtifactSet::from_root(&root),
        version,
        github_repository,
        remote,
        skip_board_config: overrides.skip_board_config,
        ci_run: overrides.ci_run,
        no_clean: overrides.no_clean || file.no_clean.unwrap_or(false),
        docker_opts,
        image_namespace,
        cleanup_scope: file.cleanup_scope.unwrap_or_default(),
        runtime_ready_timeout,
        fetch_policy,
    })
}

fn pick(over: &Option<String>, file: &Option<String>, default: &str) -> String {
    over.as_deref()
        .or(file.as_deref())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn validate_token(field: &str, value: &str) -> Result<(), InstallError> {
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(InstallError::Config(format!(
            "{} must not contain whitespace: '{}'",
            field, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_overrides_beat_file() {
        let file = InstallConfigFile::from_yaml(
            r#"
version: "1.1.0"
github_repository: someone/fork
docker_opts: --debug
"#,
        )
        .unwrap();
        let overrides = Overrides {
            version: Some("1.2.0".to_string()),
            ..Default::default()
        };

        let request = resolve(&overrides, Some(&file)).unwrap();
        assert_eq!(request.version, "1.2.0");
        assert_eq!(request.github_repository, "someone/fork");
        assert_eq!(
            request.root_url(),
            "https://raw.githubusercontent.com/someone/fork/1.2.0"
        );
        assert_eq!(request.docker_opts, vec!["--debug"]);
    }

    #[test]
    fn test_remote_override_sets_root() {
        let overrides = Overrides {
            remote: Some("http://mirror.local/blueos/".to_string()),
            version: Some("stable".to_string()),
            ..Default::default()
        };

        let request = resolve(&overrides, None).unwrap();
        assert_eq!(request.root_url(), "http://mirror.local/blueos/stable");
        assert_eq!(
            request.artifacts.network_config,
            "http://mirror.local/blueos/stable/install/network/configure_network.sh"
        );
    }

    #[test]
    fn test_empty_override_falls_back() {
        let overrides = Overrides {
            version: Some("  ".to_string()),
            ..Default::default()
        };
        let request = resolve(&overrides, None).unwrap();
        assert_eq!(request.version, DEFAULT_VERSION);
    }

    #[test]
    fn test_docker_opts_split() {
        let overrides = Overrides {
            docker_opts: Some("--storage-driver vfs  --debug".to_string()),
            ..Default::default()
        };
        let request = resolve(&overrides, None).unwrap();
        assert_eq!(
            request.docker_opts,
            vec!["--storage-driver", "vfs", "--debug"]
        );
    }

    #[test]
    fn test_file_only_settings() {
        let file = InstallConfigFile::from_yaml(
            r#"
no_clean: true
cleanup_scope: owned
image_namespace: myregistry
runtime_ready_timeout_secs: 30
fetch_attempts: 10
fetch_timeout_secs: 5
"#,
        )
        .unwrap();

        let request = resolve(&Overrides::default(), Some(&file)).unwrap();
        assert!(request.no_clean);
        assert_eq!(request.cleanup_scope, CleanupScope::Owned);
        assert_eq!(request.image_namespace, "myregistry");
        assert_eq!(request.runtime_ready_timeout, Duration::from_secs(30));
        assert_eq!(request.fetch_policy.max_attempts, 6);
        assert_eq!(request.fetch_policy.attempt_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_version = Overrides {
            version: Some("1.0 beta".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            resolve(&bad_version, None),
            Err(InstallError::Config(_))
        ));

        let bad_repo = Overrides {
            github_repository: Some("noslash".to_string()),
            ..Default::default()
        };
        assert!(resolve(&bad_repo, None).is_err());

        let bad_remote = Overrides {
            remote: Some("ftp://example.com".to_string()),
            ..Default::default()
        };
        assert!(resolve(&bad_remote, None).is_err());
    }

    #[test]
    fn test_readiness_timeout_bounds() {
        let at_cap = InstallConfigFile::from_yaml("runtime_ready_timeout_secs: 3600\n").unwrap();
        let request = resolve(&Overrides::default(), Some(&at_cap)).unwrap();
        assert_eq!(request.runtime_ready_timeout, MAX_RUNTIME_READY_TIMEOUT);

        let zero = InstallConfigFile::from_yaml("runtime_ready_timeout_secs: 0\n").unwrap();
        assert!(matches!(
            resolve(&Overrides::default(), Some(&zero)),
            Err(InstallError::Config(_))
        ));

        let huge =
            InstallConfigFile::from_yaml("runtime_ready_timeout_secs: 18446744073709551615\n")
                .unwrap();
        assert!(matches!(
            resolve(&Overrides::default(), Some(&huge)),
            Err(InstallError::Config(msg)) if msg.contains("at most 3600")
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(InstallConfigFile::from_yaml("verison: 1.0\n").is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let loaded = InstallConfigFile::load(temp.path().join("install.yaml"))
            .await
            .unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_load_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("install.yaml");
        std::fs::write(&path, "version: \"1.3.1\"\n").unwrap();

        let loaded = InstallConfigFile::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded.version.as_deref(), Some("1.3.1"));

        std::fs::write(&path, "version: [unterminated\n").unwrap();
        assert!(matches!(
            InstallConfigFile::load(&path).await,
            Err(InstallError::Config(_))
        ));
    }
}
