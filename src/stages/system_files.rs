//! System files stage
//!
//! - udev rules for autopilot serial devices (static file placement)
//! - link-local address policy in dhcpcd.conf (remove, then append)
//! - autostart of the control container from rc.local (insert once)
//!
//! Both edits are idempotent: running them twice leaves the same file.

use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::orchestrator::InstallContext;
use crate::stages::images::CONTROL_CONTAINER_NAME;
use crate::{InstallError, StepOutcome};

/// dhcpcd option disabling IPv4 link-local addresses
pub const LINK_LOCAL_POLICY: &str = "noipv4ll";

/// Run the system files stage
pub async fn run(ctx: &InstallContext) -> Result<StepOutcome, InstallError> {
    install_udev_rules(ctx).await?;
    apply_link_local_policy(&ctx.paths.dhcpcd_conf()).await?;
    register_autostart(&ctx.paths.rc_local()).await?;
    Ok(StepOutcome::Success)
}

async fn install_udev_rules(ctx: &InstallContext) -> Result<(), InstallError> {
    let rules = ctx.fetcher.fetch(&ctx.request.artifacts.udev_rules).await?;
    let path = ctx.paths.udev_rules();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&path, rules).await?;
    fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).await?;

    info!("Installed udev rules at {}", path.display());
    Ok(())
}

/// Ensure dhcpcd.conf carries exactly one link-local policy line
pub async fn apply_link_local_policy(path: &Path) -> Result<(), InstallError> {
    let content = read_or_empty(path).await?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, with_link_local_policy(&content)).await?;
    info!("Applied link-local policy in {}", path.display());
    Ok(())
}

/// Ensure rc.local starts the control container
pub async fn register_autostart(path: &Path) -> Result<(), InstallError> {
    let existed = path.exists();
    let content = read_or_empty(path).await?;

    let Some(updated) = with_autostart(&content) else {
        debug!("Autostart already registered in {}", path.display());
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, updated).await?;
    if !existed {
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }

    info!("Registered autostart in {}", path.display());
    Ok(())
}

/// Command rc.local runs at boot
pub fn autostart_command() -> String {
    format!("docker start {}", CONTROL_CONTAINER_NAME)
}

/// Drop every existing policy line, then append one
pub fn with_link_local_policy(content: &str) -> String {
    let mut lines: Vec<&str> = content
        .lines()
        .filter(|line| line.trim() != LINK_LOCAL_POLICY)
        .collect();
    lines.push(LINK_LOCAL_POLICY);

    let mut updated = lines.join("\n");
    updated.push('\n');
    updated
}

/// Insert the autostart command before the last `exit 0`
///
/// Returns `None` when the command is already present. An empty manifest
/// becomes a minimal shell script.
pub fn with_autostart(content: &str) -> Option<String> {
    let command = autostart_command();
    if content.lines().any(|line| line.contains(&command)) {
        return None;
    }

    if content.trim().is_empty() {
        return Some(format!("#!/bin/sh -e\n\n{}\n\nexit 0\n", command));
    }

    let mut lines: Vec<&str> = content.lines().collect();
    match lines.iter().rposition(|line| line.trim() == "exit 0") {
        Some(index) => lines.insert(index, &command),
        None => lines.push(&command),
    }

    let mut updated = lines.join("\n");
    updated.push('\n');
    Some(updated)
}

async fn read_or_empty(path: &Path) -> Result<String, InstallError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RC_LOCAL: &str = "#!/bin/sh -e\n#\n# rc.local\n\nexit 0\n";

    #[test]
    fn test_link_local_policy_replaces_duplicates() {
        let content = "hostname\nnoipv4ll\nclientid\n  noipv4ll  \n";
        assert_eq!(
            with_link_local_policy(content),
            "hostname\nclientid\nnoipv4ll\n"
        );
    }

    #[test]
    fn test_link_local_policy_is_idempotent() {
        let once = with_link_local_policy("hostname\n");
        assert_eq!(with_link_local_policy(&once), once);
        assert_eq!(with_link_local_policy(""), "noipv4ll\n");
    }

    #[test]
    fn test_autostart_before_exit() {
        let updated = with_autostart(RC_LOCAL).unwrap();
        assert_eq!(
            updated,
            "#!/bin/sh -e\n#\n# rc.local\n\ndocker start blueos-bootstrap\nexit 0\n"
        );
        assert!(with_autostart(&updated).is_none());
    }

    #[test]
    fn test_autostart_uses_last_exit() {
        let content = "#!/bin/sh\nif false; then\n  exit 0\nfi\nexit 0\n";
        let updated = with_autostart(content).unwrap();
        assert!(updated.ends_with("fi\ndocker start blueos-bootstrap\nexit 0\n"));
    }

    #[test]
    fn test_autostart_without_exit_appends() {
        let updated = with_autostart("#!/bin/sh\necho hi").unwrap();
        assert_eq!(updated, "#!/bin/sh\necho hi\ndocker start blueos-bootstrap\n");
    }

    #[test]
    fn test_autostart_empty_manifest() {
        let updated = with_autostart("").unwrap();
        assert!(updated.starts_with("#!/bin/sh -e\n"));
        assert!(updated.contains("docker start blueos-bootstrap\n"));
        assert!(updated.ends_with("exit 0\n"));
    }

    #[tokio::test]
    async fn test_register_autostart_creates_executable_manifest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("etc/rc.local");

        register_autostart(&path).await.unwrap();
        register_autostart(&path).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("docker start blueos-bootstrap").count(), 1);
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[tokio::test]
    async fn test_apply_link_local_policy_on_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dhcpcd.conf");
        std::fs::write(&path, "noipv4ll\nslaac private\n").unwrap();

        apply_link_local_policy(&path).await.unwrap();
        apply_link_local_policy(&path).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "slaac private\nnoipv4ll\n"
        );
    }
}
