//! Error types for blueos-install

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::Stage;

/// Main error type for installer operations
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Unsupported architecture: {0} (expected one of armv7l, armhf, arm64, aarch64)")]
    UnsupportedArchitecture(String),

    #[error("Insufficient privilege: running as uid {euid}, root is required")]
    InsufficientPrivilege { euid: u32 },

    #[error("Remote {url} is unreachable: {message}")]
    RemoteUnreachable { url: String, message: String },

    #[error("Insufficient space: {available_mb} MB available, {required_mb} MB required")]
    InsufficientSpace { available_mb: u64, required_mb: u64 },

    #[error("Container runtime bootstrap failed: {0}")]
    RuntimeBootstrapFailed(String),

    #[error("Timed out after {0:?} waiting for the nested container runtime")]
    RuntimeBootstrapTimeout(Duration),

    #[error("Cancelled while {0}")]
    Cancelled(String),

    #[error("Fetching {url} failed after {attempts} attempts: {message}")]
    Fetch {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Container engine '{operation}' failed: {message}")]
    Engine { operation: String, message: String },

    #[error("A container named '{0}' already exists")]
    ContainerNameConflict(String),

    #[error("Command execution failed: {0}")]
    Command(String),

    #[error("Command '{command}' exited with status {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Another installation holds the lock at {0}")]
    AlreadyRunning(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("System call failed: {0}")]
    Syscall(#[from] nix::Error),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<InstallError>,
    },
}

/// Failure classes surfaced by the installer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Host validation failed; nothing was mutated
    FatalPreflight,
    /// Container engine missing or unusable after remediation
    RecoverableRuntime,
    /// A remote fetch that exhausted its retries
    TransientFetch,
    /// Any other failure of a fatal step
    Fatal,
}

impl InstallError {
    /// Wrap an error with the stage it halted
    pub fn stage(stage: Stage, source: InstallError) -> Self {
        Self::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// Create an engine error
    pub fn engine(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// The stage this error halted, if it has been attributed to one
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedArchitecture(_)
            | Self::InsufficientPrivilege { .. }
            | Self::RemoteUnreachable { .. }
            | Self::InsufficientSpace { .. } => ErrorCategory::FatalPreflight,
            Self::RuntimeBootstrapFailed(_) | Self::RuntimeBootstrapTimeout(_) => {
                ErrorCategory::RecoverableRuntime
            }
            Self::Fetch { .. } | Self::Http(_) => ErrorCategory::TransientFetch,
            Self::Stage { source, .. } => source.category(),
            _ => ErrorCategory::Fatal,
        }
    }
}

impl From<reqwest::Error> for InstallError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_wrapper_names_stage() {
        let err = InstallError::stage(
            Stage::Preflight,
            InstallError::UnsupportedArchitecture("x86_64".to_string()),
        );
        assert_eq!(err.failed_stage(), Some(Stage::Preflight));
        assert!(err.to_string().contains("preflight"));
        assert!(err.to_string().contains("x86_64"));
    }

    #[test]
    fn test_category_looks_through_stage() {
        let err = InstallError::stage(
            Stage::RuntimeReady,
            InstallError::RuntimeBootstrapTimeout(Duration::from_secs(5)),
        );
        assert_eq!(err.category(), ErrorCategory::RecoverableRuntime);

        let err = InstallError::InsufficientSpace {
            available_mb: 10,
            required_mb: 1024,
        };
        assert_eq!(err.category(), ErrorCategory::FatalPreflight);
        assert_eq!(
            InstallError::ContainerNameConflict("blueos-bootstrap".into()).category(),
            ErrorCategory::Fatal
        );
    }
}
