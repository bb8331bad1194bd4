//! blueos-install - provision a Linux board into a running BlueOS stack
//!
//! Runs every stage in one pass:
//! - host validation
//! - board configuration
//! - container engine bootstrap
//! - images and the control container
//! - system files and network configuration
//! - reboot scheduling

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap::builder::FalseyValueParser;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use blueos_install::config::loader::{self, DEFAULT_CONFIG_PATH, InstallConfigFile, Overrides};
use blueos_install::engine::DockerCli;
use blueos_install::fetch::HttpFetcher;
use blueos_install::process::ProcessRunner;
use blueos_install::stages::preflight::HostProbe;
use blueos_install::state::InstallPaths;
use blueos_install::{InstallContext, InstallError, Installer};

#[derive(Parser, Debug)]
#[command(name = "blueos-install")]
#[command(author, version, about = "Install BlueOS on a Linux board", long_about = None)]
struct Cli {
    /// Enable verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Do not run the board configuration script
    #[arg(long)]
    skip_board_config: bool,

    /// Continuous-integration run: trace logging and nested runtime fallback
    #[arg(long)]
    ci_run: bool,

    /// Keep existing containers and images
    #[arg(long, env = "NO_CLEAN", value_parser = FalseyValueParser::new())]
    no_clean: bool,

    /// BlueOS version to install (image tag and artifact ref)
    #[arg(long = "target-version", env = "VERSION")]
    target_version: Option<String>,

    /// Repository hosting the install artifacts (owner/name)
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: Option<String>,

    /// Remote base URL, overriding the one derived from the repository
    #[arg(long, env = "REMOTE")]
    remote: Option<String>,

    /// Extra arguments for the nested container daemon
    #[arg(long, env = "DOCKER_OPTS", allow_hyphen_values = true)]
    docker_opts: Option<String>,

    /// Installer config file
    #[arg(long, env = "BLUEOS_INSTALL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            skip_board_config: self.skip_board_config,
            ci_run: self.ci_run,
            no_clean: self.no_clean,
            version: self.target_version.clone(),
            github_repository: self.repository.clone(),
            remote: self.remote.clone(),
            docker_opts: self.docker_opts.clone(),
        }
    }

    fn log_level(&self) -> Level {
        if self.ci_run {
            return Level::TRACE;
        }
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

fn init_logging(level: Level) {
    // RUST_LOG wins over the verbosity flags
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .try_init();

    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

async fn build_installer(cli: &Cli, cancel: CancellationToken) -> anyhow::Result<Installer> {
    let file = InstallConfigFile::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let request = loader::resolve(&cli.overrides(), file.as_ref())?;

    let fetcher = HttpFetcher::new(request.fetch_policy)?.with_cancellation(cancel.clone());
    let runner = Arc::new(ProcessRunner::new());
    let engine = DockerCli::new(runner.clone());

    let ctx = InstallContext::new(
        request,
        InstallPaths::new(),
        Arc::new(HostProbe::default()),
        Arc::new(fetcher),
        runner,
        Arc::new(engine),
    )
    .with_cancellation(cancel);

    Ok(Installer::new(ctx))
}

fn cancel_on_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, cancelling the installation");
                cancel.cancel();
            }
            Err(e) => warn!("Could not listen for interrupts: {}", e),
        }
    });
}

fn report_failure(e: &InstallError) {
    match e {
        InstallError::Stage { stage, source } => {
            eprintln!("installation halted at stage {}: {}", stage, source);
        }
        other => eprintln!("installation halted: {}", other),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level());

    let cancel = CancellationToken::new();
    let installer = match build_installer(&cli, cancel.clone()).await {
        Ok(installer) => installer,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("installation halted: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    cancel_on_interrupt(cancel);

    match installer.run().await {
        Ok(report) => {
            info!(
                "BlueOS {} installed ({} stages, run {})",
                report.version,
                report.stages.len(),
                report.run_id
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            report_failure(&e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["blueos-install"]).unwrap();
        assert!(!cli.skip_board_config);
        assert!(!cli.ci_run);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_flags_map_to_overrides() {
        let cli = Cli::try_parse_from([
            "blueos-install",
            "--skip-board-config",
            "--no-clean",
            "--target-version",
            "1.4.0",
            "--repository",
            "someone/blueos-fork",
            "--docker-opts",
            "--storage-driver vfs",
        ])
        .unwrap();

        let overrides = cli.overrides();
        assert!(overrides.skip_board_config);
        assert!(overrides.no_clean);
        assert_eq!(overrides.version.as_deref(), Some("1.4.0"));
        assert_eq!(
            overrides.github_repository.as_deref(),
            Some("someone/blueos-fork")
        );
        assert_eq!(overrides.docker_opts.as_deref(), Some("--storage-driver vfs"));
    }

    #[test]
    fn test_log_level() {
        let cli = Cli::try_parse_from(["blueos-install", "-v"]).unwrap();
        assert_eq!(cli.log_level(), Level::DEBUG);

        let cli = Cli::try_parse_from(["blueos-install", "--ci-run"]).unwrap();
        assert_eq!(cli.log_level(), Level::TRACE);
    }
}
