//! Host paths touched by the installer
//!
//! Every path is resolved under a root so tests can point the whole
//! installer at a temporary directory.

use std::path::{Path, PathBuf};

/// Default home of the installing user
pub const DEFAULT_HOME: &str = "/root";

/// Host paths used by the installer
#[derive(Debug, Clone)]
pub struct InstallPaths {
    /// Filesystem root (default: /)
    pub root: PathBuf,
    /// Home directory of the installing user, relative to `root`
    pub home: PathBuf,
}

impl Default for InstallPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallPaths {
    /// Create with the host root and `$HOME` (falling back to /root)
    pub fn new() -> Self {
        let home = std::env::var_os("HOME")
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME));

        Self {
            root: PathBuf::from("/"),
            home,
        }
    }

    /// Create with a custom root (useful for testing)
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            home: PathBuf::from(DEFAULT_HOME),
        }
    }

    fn under_root(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    // ==================== System Files ====================

    /// /etc/udev/rules.d/100.autopilot.rules
    pub fn udev_rules(&self) -> PathBuf {
        self.under_root("/etc/udev/rules.d/100.autopilot.rules")
    }

    /// /etc/dhcpcd.conf - link-local address policy
    pub fn dhcpcd_conf(&self) -> PathBuf {
        self.under_root("/etc/dhcpcd.conf")
    }

    /// /etc/rc.local - startup manifest
    pub fn rc_local(&self) -> PathBuf {
        self.under_root("/etc/rc.local")
    }

    /// /proc/device-tree/model - board identification
    pub fn device_tree_model(&self) -> PathBuf {
        self.under_root("/proc/device-tree/model")
    }

    // ==================== Nested Runtime ====================

    /// /etc/subuid
    pub fn subuid(&self) -> PathBuf {
        self.under_root("/etc/subuid")
    }

    /// /etc/subgid
    pub fn subgid(&self) -> PathBuf {
        self.under_root("/etc/subgid")
    }

    /// /usr/local/bin/dind - nested runtime helper
    pub fn nested_runtime_helper(&self) -> PathBuf {
        self.under_root("/usr/local/bin/dind")
    }

    /// /var/log/dockerd.log - nested daemon output
    pub fn nested_daemon_log(&self) -> PathBuf {
        self.under_root("/var/log/dockerd.log")
    }

    // ==================== BlueOS ====================

    /// ~/.config/blueos - BlueOS configuration root
    pub fn blueos_config_dir(&self) -> PathBuf {
        self.under_root(self.home.join(".config/blueos"))
    }

    /// ~/.config/blueos/bootstrap - bootstrap container configuration
    pub fn bootstrap_config_dir(&self) -> PathBuf {
        self.blueos_config_dir().join("bootstrap")
    }

    // ==================== Installer State ====================

    /// /run/blueos-install.lock - run-level lock
    pub fn lock_file(&self) -> PathBuf {
        self.under_root("/run/blueos-install.lock")
    }

    /// /var/lib/blueos-install - installer state directory
    pub fn state_dir(&self) -> PathBuf {
        self.under_root("/var/lib/blueos-install")
    }

    /// /var/lib/blueos-install/result.json - last run report
    pub fn report_file(&self) -> PathBuf {
        self.state_dir().join("result.json")
    }
}
