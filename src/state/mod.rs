//! Installer state
//!
//! Nothing here is read back by a later run: the host is re-probed every
//! time. The report only records what a run did, for whoever inspects the
//! board afterwards.

pub mod lock;
pub mod paths;

pub use lock::RunLock;
pub use paths::InstallPaths;

use crate::config::InstallationRequest;
use crate::{InstallError, Stage, StepOutcome};
use serde::Serialize;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Outcome of a single stage as recorded in the report
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    /// success, skipped, degraded or failed
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Summary of one installer run
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub run_id: String,
    pub version: String,
    pub root_url: String,
    /// Unix timestamp of the run start
    pub started_at: u64,
    /// running, done or failed
    pub status: String,
    pub stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstallReport {
    pub fn new(run_id: impl Into<String>, request: &InstallationRequest) -> Self {
        Self {
            run_id: run_id.into(),
            version: request.version.clone(),
            root_url: request.root_url().to_string(),
            started_at: unix_timestamp(),
            status: "running".to_string(),
            stages: Vec::new(),
            error: None,
        }
    }

    pub fn record(&mut self, stage: Stage, outcome: &StepOutcome) {
        self.stages.push(StageRecord {
            stage,
            outcome: outcome.label().to_string(),
            detail: outcome.detail().map(str::to_string),
        });
    }

    pub fn record_failure(&mut self, stage: Stage, error: &InstallError) {
        self.stages.push(StageRecord {
            stage,
            outcome: "failed".to_string(),
            detail: Some(error.to_string()),
        });
        self.status = "failed".to_string();
        self.error = Some(error.to_string());
    }

    pub fn finish(&mut self) {
        self.status = "done".to_string();
    }

    /// Outcome recorded for a stage, if it ran
    pub fn outcome_of(&self, stage: Stage) -> Option<&str> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| r.outcome.as_str())
    }

    /// Stages in the order they were recorded
    pub fn stage_order(&self) -> Vec<Stage> {
        self.stages.iter().map(|r| r.stage).collect()
    }

    /// Write the report as JSON
    pub async fn write(&self, path: &Path) -> Result<(), InstallError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?).await?;
        debug!("Wrote install report to {}", path.display());
        Ok(())
    }

    /// Write the report, logging instead of failing
    pub async fn write_best_effort(&self, path: &Path) {
        if let Err(e) = self.write(path).await {
            warn!("Could not write install report to {}: {}", path.display(), e);
        }
    }
}

/// Get a simple timestamp (no chrono dependency)
fn unix_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Overrides, loader};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_report_round_trip_to_disk() {
        let temp = TempDir::new().unwrap();
        let request = loader::resolve(&Overrides::default(), None).unwrap();

        let mut report = InstallReport::new("run-1", &request);
        report.record(Stage::Preflight, &StepOutcome::Success);
        report.record(
            Stage::BoardConfig,
            &StepOutcome::Skipped("disabled by --skip-board-config".to_string()),
        );
        report.finish();

        let path = temp.path().join("state/result.json");
        report.write(&path).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["status"], "done");
        assert_eq!(json["version"], "master");
        assert_eq!(json["stages"][1]["stage"], "board-config");
        assert_eq!(json["stages"][1]["outcome"], "skipped");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_record_failure() {
        let request = loader::resolve(&Overrides::default(), None).unwrap();
        let mut report = InstallReport::new("run-2", &request);
        report.record_failure(
            Stage::ImagePull,
            &InstallError::engine("pull", "manifest unknown"),
        );

        assert_eq!(report.status, "failed");
        assert_eq!(report.outcome_of(Stage::ImagePull), Some("failed"));
        assert!(report.error.as_deref().unwrap().contains("manifest unknown"));
    }
}
