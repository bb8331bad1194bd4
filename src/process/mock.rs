//! Mock command runner for testing
//!
//! Records every command and answers from a table of canned responses,
//! matched by whole-word prefix against the command line: `sh` matches
//! `sh` and `sh -c true` but not `shutdown -r +1`.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::InstallError;
use crate::mock::Journal;

#[derive(Debug, Clone)]
enum Response {
    Output(CommandOutput),
    /// The program cannot be started at all
    Missing,
}

/// Mock command runner
///
/// # Example
/// ```
/// use blueos_install::process::CommandOutput;
/// use blueos_install::process::mock::MockRunner;
///
/// let runner = MockRunner::new()
///     .respond("docker --version", CommandOutput::failure(127, "not found"))
///     .missing("systemctl");
/// ```
#[derive(Debug, Default)]
pub struct MockRunner {
    journal: Journal,
    responses: Vec<(String, Response)>,
    runs: Mutex<Vec<CommandSpec>>,
    spawned: Mutex<Vec<CommandSpec>>,
}

impl MockRunner {
    /// Create a runner where every command succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Record calls into a shared journal
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Answer commands starting with `prefix` with `output`
    pub fn respond(mut self, prefix: &str, output: CommandOutput) -> Self {
        self.responses
            .push((prefix.to_string(), Response::Output(output)));
        self
    }

    /// Make commands starting with `prefix` fail to start
    pub fn missing(mut self, prefix: &str) -> Self {
        self.responses.push((prefix.to_string(), Response::Missing));
        self
    }

    /// Command lines run so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.runs
            .lock()
            .map(|runs| runs.iter().map(CommandSpec::display).collect())
            .unwrap_or_default()
    }

    /// First run command whose line starts with `prefix`
    pub fn find(&self, prefix: &str) -> Option<CommandSpec> {
        self.runs
            .lock()
            .ok()?
            .iter()
            .find(|spec| matches_prefix(&spec.display(), prefix))
            .cloned()
    }

    /// Whether any run command starts with `prefix`
    pub fn ran(&self, prefix: &str) -> bool {
        self.find(prefix).is_some()
    }

    /// Commands started with [`CommandRunner::spawn_detached`]
    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.spawned
            .lock()
            .map(|spawned| spawned.clone())
            .unwrap_or_default()
    }

    fn response_for(&self, line: &str) -> Option<&Response> {
        self.responses
            .iter()
            .find(|(prefix, _)| matches_prefix(line, prefix))
            .map(|(_, response)| response)
    }
}

fn matches_prefix(line: &str, prefix: &str) -> bool {
    line.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, InstallError> {
        let line = spec.display();
        self.journal.push(format!("run: {}", line));
        if let Ok(mut runs) = self.runs.lock() {
            runs.push(spec.clone());
        }

        match self.response_for(&line) {
            Some(Response::Output(output)) => Ok(output.clone()),
            Some(Response::Missing) => Err(InstallError::Command(format!(
                "{}: No such file or directory",
                spec.program
            ))),
            None => Ok(CommandOutput::success()),
        }
    }

    async fn spawn_detached(&self, spec: &CommandSpec, _log: &Path) -> Result<u32, InstallError> {
        let line = spec.display();
        self.journal.push(format!("spawn: {}", line));
        if let Ok(mut spawned) = self.spawned.lock() {
            spawned.push(spec.clone());
        }

        match self.response_for(&line) {
            Some(Response::Missing) => Err(InstallError::Command(format!(
                "{}: No such file or directory",
                spec.program
            ))),
            _ => Ok(4242),
        }
    }
}
