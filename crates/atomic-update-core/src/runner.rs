use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Output, Stdio};

use anyhow::{Context, Result};
use tracing::debug;

/// Captured result of a non-interactive command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// stdout and stderr joined, trimmed, the way an operator would see them.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_string(),
            (false, true) => stdout.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            status: exit_code_of(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// The single seam through which every external collaborator is reached:
/// the snapshot store, the volume manager, the instance supervisor, the
/// package engine and the init system.
pub trait CommandRunner: Send + Sync {
    /// Runs to completion with stdin closed, capturing output.
    fn output(&self, command: &mut Command) -> Result<CommandOutput>;

    /// Runs attached to the caller's terminal and returns the exit code.
    fn interactive(&self, command: &mut Command) -> Result<i32>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn output(&self, command: &mut Command) -> Result<CommandOutput> {
        let line = describe_command(command);
        debug!(command = %line, "running");
        let output = command
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed launching {line}"))?;
        Ok(output.into())
    }

    fn interactive(&self, command: &mut Command) -> Result<i32> {
        let line = describe_command(command);
        debug!(command = %line, "running interactively");
        let status = command
            .status()
            .with_context(|| format!("failed launching {line}"))?;
        Ok(exit_code_of(status))
    }
}

/// Program followed by its arguments, lossily converted.
pub fn command_line(command: &Command) -> Vec<String> {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect()
}

pub fn describe_command(command: &Command) -> String {
    command_line(command).join(" ")
}

fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
