use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use atomic_update_core::{describe_command, CommandRunner};
use serde::Deserialize;

use crate::volumes::{checked_stdout, run_checked};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MachineRecord {
    pub machine: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnitRecord {
    pub unit: String,
    pub active: String,
}

impl UnitRecord {
    pub fn is_failed(&self) -> bool {
        self.active == "failed"
    }
}

/// Boots `directory` as a throwaway container named `machine`. Writes land in
/// an overlay discarded on stop, so the staged tree is never modified.
pub fn spawn_ephemeral(
    runner: &dyn CommandRunner,
    machine: &str,
    directory: &Path,
    masked_units: &[String],
) -> Result<()> {
    let mut command = Command::new("systemd-run");
    command
        .arg("--unit")
        .arg(machine)
        .arg("--collect")
        .arg("--quiet")
        .arg("systemd-nspawn")
        .arg("--quiet")
        .arg("--boot")
        .arg("--ephemeral")
        .arg("--machine")
        .arg(machine)
        .arg("--directory")
        .arg(directory);
    for unit in masked_units {
        command.arg(format!("systemd.mask={unit}"));
    }
    run_checked(runner, &mut command)
}

pub fn list_machines(runner: &dyn CommandRunner) -> Result<Vec<MachineRecord>> {
    let mut command = Command::new("machinectl");
    command.arg("list").arg("--output=json");
    let stdout = checked_stdout(runner, &mut command)?;
    parse_json_list(&stdout).context("failed parsing machinectl output")
}

/// Returns `false` when the machine was not running.
pub fn terminate_machine(runner: &dyn CommandRunner, machine: &str) -> Result<bool> {
    let known = list_machines(runner)?
        .iter()
        .any(|record| record.machine == machine);
    if !known {
        return Ok(false);
    }
    let mut command = Command::new("machinectl");
    command.arg("terminate").arg(machine);
    run_checked(runner, &mut command)?;
    Ok(true)
}

/// Whether the machine's init system reports startup as finished.
pub fn boot_finished(runner: &dyn CommandRunner, machine: &str) -> Result<bool> {
    let mut command = Command::new("systemd-analyze");
    command.arg("--machine").arg(machine).arg("time");
    let line = describe_command(&command);
    let output = runner
        .output(&mut command)
        .with_context(|| format!("failed running {line}"))?;
    Ok(output.success() && output.stdout.contains("Startup finished"))
}

/// Console log of the container unit, for diagnosing a stuck boot.
pub fn console_output(runner: &dyn CommandRunner, machine: &str) -> Result<String> {
    let mut command = Command::new("journalctl");
    command
        .arg("--unit")
        .arg(machine)
        .arg("--no-pager")
        .arg("--output")
        .arg("cat");
    let line = describe_command(&command);
    let output = runner
        .output(&mut command)
        .with_context(|| format!("failed running {line}"))?;
    Ok(output.combined())
}

pub fn list_units(runner: &dyn CommandRunner, machine: &str) -> Result<Vec<UnitRecord>> {
    let mut command = Command::new("systemctl");
    command
        .arg("--machine")
        .arg(machine)
        .arg("list-units")
        .arg("--all")
        .arg("--output=json");
    let stdout = checked_stdout(runner, &mut command)?;
    parse_json_list(&stdout).context("failed parsing unit list")
}

fn parse_json_list<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<Vec<T>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(raw)?)
}
