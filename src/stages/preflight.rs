//! Preflight stage - host validation
//!
//! Checks, in order, each fatal:
//! 1. Architecture is one of the supported ARM variants
//! 2. Caller is root
//! 3. The remote artifact root answers
//! 4. At least 1024 MB free on the root filesystem
//!
//! Nothing on the host is modified here; the reachability probe is the only
//! side effect.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::orchestrator::InstallContext;
use crate::{InstallError, StepOutcome};

/// Architectures BlueOS images are published for
pub const SUPPORTED_ARCHITECTURES: [&str; 4] = ["armv7l", "armhf", "arm64", "aarch64"];

/// Free space required on the root filesystem
pub const REQUIRED_SPACE_MB: u64 = 1024;

/// Host facts read at preflight time
///
/// Re-read on every run, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemState {
    pub architecture: String,
    pub euid: u32,
    pub available_space_mb: u64,
}

/// Reads [`SystemState`] from the host
#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn read_state(&self) -> Result<SystemState, InstallError>;
}

/// [`SystemProbe`] backed by uname, geteuid and statvfs
#[derive(Debug, Clone)]
pub struct HostProbe {
    root: PathBuf,
}

impl HostProbe {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new("/")
    }
}

#[async_trait]
impl SystemProbe for HostProbe {
    async fn read_state(&self) -> Result<SystemState, InstallError> {
        let uts = nix::sys::utsname::uname()?;
        let stat = nix::sys::statvfs::statvfs(&self.root)?;

        // available blocks (non-root) times fragment size, like `stat -f %a*%S`
        let available_bytes = (stat.blocks_available() as u64) * (stat.fragment_size() as u64);

        Ok(SystemState {
            architecture: uts.machine().to_string_lossy().into_owned(),
            euid: nix::unistd::geteuid().as_raw(),
            available_space_mb: available_bytes / (1024 * 1024),
        })
    }
}

/// Fixed [`SystemProbe`] for tests
#[derive(Debug, Clone)]
pub struct StaticProbe {
    pub state: SystemState,
}

impl StaticProbe {
    /// A root-owned aarch64 host with 8 GB free
    pub fn new() -> Self {
        Self {
            state: SystemState {
                architecture: "aarch64".to_string(),
                euid: 0,
                available_space_mb: 8192,
            },
        }
    }

    pub fn with_architecture(mut self, architecture: &str) -> Self {
        self.state.architecture = architecture.to_string();
        self
    }

    pub fn with_euid(mut self, euid: u32) -> Self {
        self.state.euid = euid;
        self
    }

    pub fn with_available_space_mb(mut self, mb: u64) -> Self {
        self.state.available_space_mb = mb;
        self
    }
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemProbe for StaticProbe {
    async fn read_state(&self) -> Result<SystemState, InstallError> {
        Ok(self.state.clone())
    }
}

pub fn check_architecture(architecture: &str) -> Result<(), InstallError> {
    if SUPPORTED_ARCHITECTURES.contains(&architecture) {
        Ok(())
    } else {
        Err(InstallError::UnsupportedArchitecture(
            architecture.to_string(),
        ))
    }
}

pub fn check_privilege(euid: u32) -> Result<(), InstallError> {
    if euid == 0 {
        Ok(())
    } else {
        Err(InstallError::InsufficientPrivilege { euid })
    }
}

pub fn check_space(available_mb: u64) -> Result<(), InstallError> {
    if available_mb >= REQUIRED_SPACE_MB {
        Ok(())
    } else {
        Err(InstallError::InsufficientSpace {
            available_mb,
            required_mb: REQUIRED_SPACE_MB,
        })
    }
}

/// Run the preflight stage
pub async fn run(ctx: &InstallContext) -> Result<StepOutcome, InstallError> {
    let state = ctx.probe.read_state().await?;
    debug!("Host state: {:?}", state);

    info!("Checking architecture: {}", state.architecture);
    check_architecture(&state.architecture)?;

    debug!("Checking privilege");
    check_privilege(state.euid)?;

    let root = ctx.request.root_url();
    info!("Checking that {} is reachable", root);
    ctx.fetcher
        .probe(root)
        .await
        .map_err(|e| InstallError::RemoteUnreachable {
            url: root.to_string(),
            message: e.to_string(),
        })?;

    info!(
        "Checking free space: {} MB available, {} MB required",
        state.available_space_mb, REQUIRED_SPACE_MB
    );
    check_space(state.available_space_mb)?;

    Ok(StepOutcome::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_architectures() {
        for arch in SUPPORTED_ARCHITECTURES {
            assert!(check_architecture(arch).is_ok(), "{arch} should pass");
        }
    }

    #[test]
    fn test_unsupported_architectures() {
        for arch in ["x86_64", "i686", "riscv64", "ARM64", "", "armv6l"] {
            assert!(matches!(
                check_architecture(arch),
                Err(InstallError::UnsupportedArchitecture(a)) if a == arch
            ));
        }
    }

    #[test]
    fn test_privilege() {
        assert!(check_privilege(0).is_ok());
        assert!(matches!(
            check_privilege(1000),
            Err(InstallError::InsufficientPrivilege { euid: 1000 })
        ));
    }

    #[test]
    fn test_space_threshold() {
        assert!(check_space(1024).is_ok());
        assert!(check_space(50_000).is_ok());
        assert!(matches!(
            check_space(1023),
            Err(InstallError::InsufficientSpace {
                available_mb: 1023,
                required_mb: 1024
            })
        ));
    }

    #[tokio::test]
    async fn test_host_probe_reads_state() {
        let state = HostProbe::default().read_state().await.unwrap();
        assert!(!state.architecture.is_empty());
    }
}
