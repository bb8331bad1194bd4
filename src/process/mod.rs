//! External process execution
//!
//! Board scripts, the engine installer, `systemctl`, `useradd`, `shutdown`
//! and the docker CLI all go through [`CommandRunner`], so stages can be
//! exercised without touching the host.

pub mod mock;

use crate::InstallError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

/// A command to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Variables removed from the inherited environment
    pub env_remove: Vec<String>,
    /// Bytes written to the child's stdin
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program and arguments joined for logs and errors
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`InstallError::CommandFailed`]
    pub fn check(self, spec: &CommandSpec) -> Result<Self, InstallError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(InstallError::CommandFailed {
                command: spec.display(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output
    ///
    /// A program that cannot be started is an `Err`; a non-zero exit is an
    /// `Ok` whose [`CommandOutput::is_success`] is false.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, InstallError>;

    /// Start a long-running process that outlives the call
    ///
    /// stdout and stderr are appended to `log`. Returns the child's pid.
    async fn spawn_detached(&self, spec: &CommandSpec, log: &Path) -> Result<u32, InstallError>;

    /// Run and fail on non-zero exit
    async fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, InstallError> {
        self.run(spec).await?.check(spec)
    }
}

/// [`CommandRunner`] backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args);
        for key in &spec.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, InstallError> {
        debug!("Running: {}", spec.display());

        let mut cmd = Self::command(spec);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd
            .spawn()
            .map_err(|e| InstallError::Command(format!("{}: {}", spec.program, e)))?;

        // Fed from a task so a chatty child cannot fill its stdout pipe while
        // we are still writing the script
        let writer = match (spec.stdin.clone(), child.stdin.take()) {
            (Some(input), Some(mut stdin)) => Some(tokio::spawn(async move {
                stdin.write_all(&input).await
            })),
            _ => None,
        };

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| InstallError::Command(format!("{}: {}", spec.program, e)))?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(InstallError::Io(e));
                }
                Err(e) => {
                    return Err(InstallError::Command(format!(
                        "{}: stdin writer failed: {}",
                        spec.program, e
                    )));
                }
                _ => {}
            }
        }

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.stdout.is_empty() {
            trace!("stdout: {}", result.stdout);
        }
        if !result.is_success() {
            debug!(
                "{} exited with {:?}: {}",
                spec.program,
                result.code,
                result.stderr.trim()
            );
        }

        Ok(result)
    }

    async fn spawn_detached(&self, spec: &CommandSpec, log: &Path) -> Result<u32, InstallError> {
        debug!("Starting in background: {}", spec.display());

        if let Some(parent) = log.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)?;
        let err_file = log_file.try_clone()?;

        let mut cmd = Self::command(spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(err_file))
            .kill_on_drop(false);

        let child = cmd
            .spawn()
            .map_err(|e| InstallError::Command(format!("{}: {}", spec.program, e)))?;

        child
            .id()
            .ok_or_else(|| InstallError::Command(format!("{} exited immediately", spec.program)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_spec_display() {
        let spec = CommandSpec::new("docker").args(["image", "prune", "-f"]);
        assert_eq!(spec.display(), "docker image prune -f");
        assert_eq!(CommandSpec::new("true").display(), "true");
    }

    #[test]
    fn test_check_maps_failure() {
        let spec = CommandSpec::new("false");
        let err = CommandOutput::failure(1, "boom\n").check(&spec).unwrap_err();
        match err {
            InstallError::CommandFailed {
                command,
                code,
                stderr,
            } => {
                assert_eq!(command, "false");
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_process_runner_feeds_stdin() {
        let runner = ProcessRunner::new();
        let spec = CommandSpec::new("sh").stdin("echo from-stdin\n");

        let output = runner.run(&spec).await.unwrap();
        assert!(output.is_success());
        assert_eq!(output.stdout.trim(), "from-stdin");
    }

    #[tokio::test]
    async fn test_process_runner_env_handling() {
        let runner = ProcessRunner::new();
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo \"${BLUEOS_TEST_VALUE:-unset}\""])
            .env("BLUEOS_TEST_VALUE", "set");

        let output = runner.run_checked(&spec).await.unwrap();
        assert_eq!(output.stdout.trim(), "set");
    }

    #[tokio::test]
    async fn test_process_runner_reports_exit_code() {
        let runner = ProcessRunner::new();
        let spec = CommandSpec::new("sh").args(["-c", "echo oops >&2; exit 3"]);

        let output = runner.run(&spec).await.unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stderr.trim(), "oops");
        assert!(runner.run_checked(&spec).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let runner = ProcessRunner::new();
        let result = runner
            .run(&CommandSpec::new("definitely-not-a-real-program-blueos"))
            .await;
        assert!(matches!(result, Err(InstallError::Command(_))));
    }

    #[tokio::test]
    async fn test_spawn_detached_writes_log() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("logs/daemon.log");
        let runner = ProcessRunner::new();

        let pid = runner
            .spawn_detached(&CommandSpec::new("sh").args(["-c", "echo started"]), &log)
            .await
            .unwrap();
        assert!(pid > 0);

        let mut content = String::new();
        for _ in 0..100 {
            content = std::fs::read_to_string(&log).unwrap_or_default();
            if !content.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(content.trim(), "started");
    }
}
