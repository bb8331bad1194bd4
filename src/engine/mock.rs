//! Mock container engine for testing
//!
//! Keeps an in-memory image and container inventory so tests can assert on
//! the state a run leaves behind, not only on the calls it made.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Mutex;

use super::{ContainerEngine, ContainerImageRef, ContainerSpec, ContainerSummary};
use crate::InstallError;
use crate::mock::Journal;

#[derive(Debug, Default)]
struct EngineState {
    images: BTreeSet<String>,
    containers: Vec<ContainerSummary>,
    pings: u32,
}

/// Mock container engine
///
/// # Example
/// ```
/// use blueos_install::engine::mock::MockEngine;
///
/// let engine = MockEngine::new()
///     .with_container("abc", "blueos-bootstrap")
///     .with_failing_pull("bluerobotics/blueos-core");
/// ```
#[derive(Debug)]
pub struct MockEngine {
    journal: Journal,
    installed: bool,
    /// Pings that fail before the daemon answers; `None` never answers
    ready_after: Option<u32>,
    failing_pulls: Vec<String>,
    state: Mutex<EngineState>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create an installed, ready engine with no images or containers
    pub fn new() -> Self {
        Self {
            journal: Journal::new(),
            installed: true,
            ready_after: Some(0),
            failing_pulls: Vec::new(),
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Record calls into a shared journal
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Whether `version` finds an engine
    pub fn with_installed(mut self, installed: bool) -> Self {
        self.installed = installed;
        self
    }

    /// Fail the first `pings` readiness checks
    pub fn with_ready_after(mut self, pings: u32) -> Self {
        self.ready_after = Some(pings);
        self
    }

    /// Never answer readiness checks
    pub fn never_ready(mut self) -> Self {
        self.ready_after = None;
        self
    }

    /// Seed an existing container
    pub fn with_container(self, id: &str, name: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.containers.push(ContainerSummary {
                id: id.to_string(),
                name: name.to_string(),
            });
        }
        self
    }

    /// Fail pulls of images whose reference starts with `prefix`
    pub fn with_failing_pull(mut self, prefix: &str) -> Self {
        self.failing_pulls.push(prefix.to_string());
        self
    }

    /// Whether an image reference is present locally
    pub fn has_image(&self, image: &str) -> bool {
        self.state
            .lock()
            .map(|state| state.images.contains(image))
            .unwrap_or(false)
    }

    /// Names of the containers currently on the engine
    pub fn container_names(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn ping_count(&self) -> u32 {
        self.state.lock().map(|state| state.pings).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, EngineState>, InstallError> {
        self.state
            .lock()
            .map_err(|_| InstallError::engine("mock", "state poisoned"))
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn version(&self) -> Result<String, InstallError> {
        self.journal.push("engine: version");
        if self.installed {
            Ok("Docker version 24.0.7, build mock".to_string())
        } else {
            Err(InstallError::Command("docker: No such file or directory".to_string()))
        }
    }

    async fn ping(&self) -> Result<(), InstallError> {
        self.journal.push("engine: ping");
        let mut state = self.lock()?;
        state.pings += 1;
        match self.ready_after {
            Some(after) if state.pings > after => Ok(()),
            _ => Err(InstallError::engine(
                "info",
                "Cannot connect to the Docker daemon",
            )),
        }
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, InstallError> {
        self.journal.push("engine: list");
        Ok(self.lock()?.containers.clone())
    }

    async fn stop_container(&self, id: &str) -> Result<(), InstallError> {
        self.journal.push(format!("engine: stop {}", id));
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), InstallError> {
        self.journal.push(format!("engine: rm {}", id));
        self.lock()?.containers.retain(|c| c.id != id);
        Ok(())
    }

    async fn prune_images(&self) -> Result<(), InstallError> {
        self.journal.push("engine: prune");
        Ok(())
    }

    async fn pull(&self, image: &ContainerImageRef) -> Result<(), InstallError> {
        let reference = image.to_string();
        self.journal.push(format!("engine: pull {}", reference));
        if self
            .failing_pulls
            .iter()
            .any(|prefix| reference.starts_with(prefix.as_str()))
        {
            return Err(InstallError::engine("pull", "manifest unknown"));
        }
        self.lock()?.images.insert(reference);
        Ok(())
    }

    async fn tag(
        &self,
        source: &ContainerImageRef,
        target: &ContainerImageRef,
    ) -> Result<(), InstallError> {
        self.journal.push(format!("engine: tag {} {}", source, target));
        let mut state = self.lock()?;
        if !state.images.contains(&source.to_string()) {
            return Err(InstallError::engine(
                "tag",
                format!("No such image: {}", source),
            ));
        }
        state.images.insert(target.to_string());
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, InstallError> {
        self.journal.push(format!("engine: create {}", spec.name));
        let mut state = self.lock()?;
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(InstallError::ContainerNameConflict(spec.name.clone()));
        }
        let id = format!("mock-{}", state.containers.len() + 1);
        state.containers.push(ContainerSummary {
            id: id.clone(),
            name: spec.name.clone(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tag_requires_source() {
        let engine = MockEngine::new();
        let core = ContainerImageRef::new("bluerobotics/blueos-core", "1.0");

        assert!(engine.tag(&core, &core.with_tag("factory")).await.is_err());

        engine.pull(&core).await.unwrap();
        engine.tag(&core, &core.with_tag("factory")).await.unwrap();
        assert!(engine.has_image("bluerobotics/blueos-core:factory"));
    }

    #[tokio::test]
    async fn test_ready_after() {
        let engine = MockEngine::new().with_ready_after(2);
        assert!(engine.ping().await.is_err());
        assert!(engine.ping().await.is_err());
        assert!(engine.ping().await.is_ok());
        assert_eq!(engine.ping_count(), 3);
    }

    #[tokio::test]
    async fn test_remove_updates_inventory() {
        let engine = MockEngine::new().with_container("abc", "portainer");
        engine.remove_container("abc").await.unwrap();
        assert!(engine.container_names().is_empty());
    }
}
