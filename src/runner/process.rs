//! Subprocess runner - executes commands as child processes

use crate::runner::{CommandOutput, CommandRunner, CommandSpec, RunnerError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs commands as child processes of this one
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    /// Spawn the command and wait for it, killing it on timeout
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        let (program, args) = command.argv.split_first().ok_or(RunnerError::EmptyCommand)?;

        debug!(command = %command.display(), cwd = %command.cwd.display(), "Spawning process");

        let child = Command::new(program)
            .args(args)
            .current_dir(&command.cwd)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunnerError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;

        let output = timeout(command.timeout, child.wait_with_output())
            .await
            .map_err(|_| RunnerError::Timeout(command.timeout.as_secs()))?
            .map_err(|e| RunnerError::Internal(format!("Failed to wait for '{}': {}", program, e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code != 0 {
            warn!(command = %command.display(), exit_code, "Process exited unsuccessfully");
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
