//! Installation orchestrator
//!
//! Drives [`Stage::ORDER`] front to back. Each stage either returns a
//! [`StepOutcome`] and the run continues, or returns an error and the run
//! halts with that error attributed to the stage. Nothing is retried or
//! resumed at this level: retries live in the fetcher and the readiness poll.
//!
//! Preflight runs before the run lock is taken and before the report is
//! written, so a run that fails preflight leaves the host as it found it.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::InstallationRequest;
use crate::engine::ContainerEngine;
use crate::fetch::Fetcher;
use crate::process::CommandRunner;
use crate::stages::preflight::SystemProbe;
use crate::stages::{board, finish, images, network, preflight, runtime, system_files};
use crate::state::{InstallPaths, InstallReport, RunLock};
use crate::{InstallError, Stage, StepOutcome};

/// Default interval between readiness checks of a freshly started daemon
pub const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a stage can reach
///
/// Stages only borrow the context; the request is never modified once a run
/// has started.
#[derive(Clone)]
pub struct InstallContext {
    pub request: InstallationRequest,
    pub paths: InstallPaths,
    pub probe: Arc<dyn SystemProbe>,
    pub fetcher: Arc<dyn Fetcher>,
    pub runner: Arc<dyn CommandRunner>,
    pub engine: Arc<dyn ContainerEngine>,
    pub cancel: CancellationToken,
    pub readiness_interval: Duration,
}

impl InstallContext {
    pub fn new(
        request: InstallationRequest,
        paths: InstallPaths,
        probe: Arc<dyn SystemProbe>,
        fetcher: Arc<dyn Fetcher>,
        runner: Arc<dyn CommandRunner>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Self {
        Self {
            request,
            paths,
            probe,
            fetcher,
            runner,
            engine,
            cancel: CancellationToken::new(),
            readiness_interval: DEFAULT_READINESS_INTERVAL,
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_readiness_interval(mut self, interval: Duration) -> Self {
        self.readiness_interval = interval;
        self
    }

    /// Why a stage is turned off for this run, if it is
    fn disabled_reason(&self, stage: Stage) -> Option<&'static str> {
        match stage {
            Stage::BoardConfig if self.request.skip_board_config => {
                Some("disabled by --skip-board-config")
            }
            Stage::Cleanup if self.request.no_clean => Some("disabled by --no-clean"),
            _ => None,
        }
    }
}

impl std::fmt::Debug for InstallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallContext")
            .field("request", &self.request)
            .field("paths", &self.paths)
            .field("readiness_interval", &self.readiness_interval)
            .finish_non_exhaustive()
    }
}

/// Runs one installation
#[derive(Debug)]
pub struct Installer {
    ctx: InstallContext,
    run_id: String,
}

impl Installer {
    pub fn new(ctx: InstallContext) -> Self {
        Self {
            ctx,
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn context(&self) -> &InstallContext {
        &self.ctx
    }

    /// Run every stage and return the report, failed or not
    pub async fn execute(&self) -> (InstallReport, Result<(), InstallError>) {
        let span = info_span!(
            "install",
            run_id = %self.run_id,
            version = %self.ctx.request.version
        );
        self.execute_stages().instrument(span).await
    }

    /// Run every stage, returning the report only on success
    pub async fn run(&self) -> Result<InstallReport, InstallError> {
        let (report, result) = self.execute().await;
        result.map(|()| report)
    }

    async fn execute_stages(&self) -> (InstallReport, Result<(), InstallError>) {
        let mut report = InstallReport::new(&self.run_id, &self.ctx.request);
        let mut lock: Option<RunLock> = None;

        info!(
            "Installing BlueOS {} from {}",
            self.ctx.request.version,
            self.ctx.request.root_url()
        );

        for stage in Stage::ORDER {
            if self.ctx.cancel.is_cancelled() {
                let cause = InstallError::Cancelled(format!("starting stage {}", stage));
                return self.halt(report, stage, cause, lock.is_some()).await;
            }

            if let Some(reason) = self.ctx.disabled_reason(stage) {
                info!("Skipping stage {}: {}", stage, reason);
                report.record(stage, &StepOutcome::Skipped(reason.to_string()));
                continue;
            }

            info!("Starting stage: {}", stage);
            let outcome = match self.run_stage(stage).await {
                Ok(outcome) => outcome,
                Err(e) => return self.halt(report, stage, e, lock.is_some()).await,
            };

            match &outcome {
                StepOutcome::Success => info!("Completed stage: {}", stage),
                StepOutcome::Skipped(reason) => warn!("Skipped stage {}: {}", stage, reason),
                StepOutcome::Degraded(reason) => warn!("Stage {} degraded: {}", stage, reason),
            }
            report.record(stage, &outcome);

            if stage == Stage::Preflight {
                match RunLock::acquire(self.ctx.paths.lock_file()) {
                    Ok(acquired) => lock = Some(acquired),
                    // The report belongs to whichever run holds the lock
                    Err(e) => return self.halt(report, stage, e, false).await,
                }
            }
        }

        report.finish();
        report.write_best_effort(&self.ctx.paths.report_file()).await;
        drop(lock);
        (report, Ok(()))
    }

    async fn run_stage(&self, stage: Stage) -> Result<StepOutcome, InstallError> {
        let ctx = &self.ctx;
        match stage {
            Stage::Preflight => preflight::run(ctx).await,
            Stage::BoardConfig => board::run(ctx).await,
            Stage::RuntimeReady => runtime::run(ctx).await,
            Stage::Cleanup => images::cleanup(ctx).await,
            Stage::ImagePull => images::pull(ctx).await,
            Stage::ContainerCreate => images::create_control_container(ctx).await,
            Stage::SystemFiles => system_files::run(ctx).await,
            Stage::NetworkConfig => network::run(ctx).await,
            Stage::Done => finish::run(ctx).await,
        }
    }

    async fn halt(
        &self,
        mut report: InstallReport,
        stage: Stage,
        cause: InstallError,
        write_report: bool,
    ) -> (InstallReport, Result<(), InstallError>) {
        error!("Stage {} failed: {}", stage, cause);
        report.record_failure(stage, &cause);
        if write_report {
            report.write_best_effort(&self.ctx.paths.report_file()).await;
        }
        (report, Err(InstallError::stage(stage, cause)))
    }
}
