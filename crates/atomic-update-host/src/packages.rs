use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use atomic_update_core::{describe_command, CommandRunner};
use serde::Deserialize;
use tracing::debug;

/// Outcome of a package engine dry run against a staged tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DryRunReport {
    pub packages_to_change: u32,
    pub conflicts: bool,
}

impl DryRunReport {
    pub fn nothing_to_do(&self) -> bool {
        self.packages_to_change == 0 && !self.conflicts
    }
}

#[derive(Debug, Deserialize)]
struct Stream {
    #[serde(rename = "install-summary", default)]
    install_summary: Option<InstallSummary>,
    #[serde(rename = "prompt", default)]
    prompts: Vec<Prompt>,
    #[serde(rename = "message", default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct InstallSummary {
    #[serde(rename = "@packages-to-change", default)]
    packages_to_change: u32,
}

#[derive(Debug, Deserialize)]
struct Prompt {
    #[serde(rename = "@id", default)]
    id: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(rename = "@type", default)]
    kind: String,
    #[serde(rename = "$text", default)]
    text: String,
}

/// Zypper reports informational outcomes with codes of 100 and above.
fn engine_succeeded(status: i32) -> bool {
    status == 0 || status >= 100
}

pub fn dist_upgrade_dry_run(runner: &dyn CommandRunner, root: &Path) -> Result<DryRunReport> {
    let mut command = Command::new("zypper");
    command
        .arg("--root")
        .arg(root)
        .arg("--non-interactive")
        .arg("--no-cd")
        .arg("--xmlout")
        .arg("dist-upgrade")
        .arg("--dry-run");
    let line = describe_command(&command);
    let output = runner
        .output(&mut command)
        .with_context(|| format!("failed running {line}"))?;
    let report = parse_dry_run(&output.stdout, output.status)
        .with_context(|| format!("failed reading {line} output"))?;
    debug!(
        packages = report.packages_to_change,
        conflicts = report.conflicts,
        status = output.status,
        "dist-upgrade dry run"
    );
    Ok(report)
}

pub fn parse_dry_run(xml: &str, status: i32) -> Result<DryRunReport> {
    if xml.trim().is_empty() {
        if engine_succeeded(status) {
            return Err(anyhow!("package engine produced no report"));
        }
        return Ok(DryRunReport {
            packages_to_change: 0,
            conflicts: true,
        });
    }

    let stream: Stream = quick_xml::de::from_str(xml).context("malformed zypper XML")?;
    for message in stream
        .messages
        .iter()
        .filter(|message| message.kind == "error")
    {
        debug!(message = %message.text.trim(), "package engine error");
    }
    for prompt in &stream.prompts {
        debug!(id = %prompt.id, text = %prompt.text.trim(), "package engine prompt");
    }

    let summary = stream.install_summary;
    let conflicts =
        !stream.prompts.is_empty() || (summary.is_none() && !engine_succeeded(status));
    Ok(DryRunReport {
        packages_to_change: summary.map_or(0, |summary| summary.packages_to_change),
        conflicts,
    })
}

/// The real upgrade, run against the staged tree. Without `interactive`
/// every question is answered with its default.
pub fn dist_upgrade_command(root: &Path, interactive: bool) -> Command {
    let mut command = Command::new("zypper");
    command.arg("--root").arg(root);
    if !interactive {
        command.arg("--non-interactive");
    }
    command.arg("--no-cd").arg("dist-upgrade");
    command
}
