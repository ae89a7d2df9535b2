use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use atomic_update_core::{describe_command, CommandRunner, UpdateError};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subvolume {
    pub id: u64,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MountEntry {
    pub target: PathBuf,
    pub source: String,
    pub fstype: String,
}

#[derive(Debug, Deserialize)]
struct MountTable {
    filesystems: Vec<MountEntry>,
}

/// Subvolumes of the filesystem holding `/`, as paths relative to its top level.
pub fn list_subvolumes(runner: &dyn CommandRunner) -> Result<Vec<Subvolume>> {
    let mut command = Command::new("btrfs");
    command.arg("subvolume").arg("list").arg("/");
    let stdout = checked_stdout(runner, &mut command)?;
    parse_subvolume_list(&stdout)
}

pub fn parse_subvolume_list(raw: &str) -> Result<Vec<Subvolume>> {
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            // Paths may contain spaces; everything after " path " belongs to it.
            let (head, path) = line
                .split_once(" path ")
                .ok_or_else(|| anyhow!("malformed subvolume line: '{line}'"))?;
            let id = head
                .split_whitespace()
                .nth(1)
                .and_then(|id| id.parse::<u64>().ok())
                .ok_or_else(|| anyhow!("malformed subvolume id in line: '{line}'"))?;
            Ok(Subvolume {
                id,
                path: path.to_string(),
            })
        })
        .collect()
}

pub fn subvolume_exists(runner: &dyn CommandRunner, path: &str) -> Result<bool> {
    let wanted = path.trim_start_matches('/');
    Ok(list_subvolumes(runner)?
        .iter()
        .any(|subvolume| subvolume.path == wanted))
}

/// Subvolumes strictly below `parent`, shallowest first.
pub fn nested_subvolumes(subvolumes: &[Subvolume], parent: &str) -> Vec<String> {
    let prefix = format!("{}/", parent.trim_end_matches('/'));
    let mut nested = subvolumes
        .iter()
        .filter_map(|subvolume| subvolume.path.strip_prefix(&prefix))
        .map(str::to_string)
        .collect::<Vec<_>>();
    nested.sort_by_key(|path| (path.matches('/').count(), path.clone()));
    nested
}

pub fn list_mounts(runner: &dyn CommandRunner) -> Result<Vec<MountEntry>> {
    let mut command = Command::new("findmnt");
    command
        .arg("--json")
        .arg("--list")
        .arg("--output")
        .arg("TARGET,SOURCE,FSTYPE");
    let stdout = checked_stdout(runner, &mut command)?;
    let table: MountTable =
        serde_json::from_str(&stdout).context("failed parsing findmnt output")?;
    Ok(table.filesystems)
}

/// Block device backing the running root filesystem.
pub fn root_device(runner: &dyn CommandRunner) -> Result<String> {
    let mounts = list_mounts(runner)
        .map_err(|err| UpdateError::DeviceResolution(format!("{err:#}")))?;
    let root = mounts
        .iter()
        .find(|entry| entry.target == Path::new("/") && entry.fstype == "btrfs")
        .ok_or_else(|| {
            UpdateError::DeviceResolution("no btrfs filesystem mounted at /".to_string())
        })?;
    let device = strip_subvolume_suffix(&root.source);
    if device.is_empty() {
        return Err(UpdateError::DeviceResolution(format!(
            "unusable root mount source '{}'",
            root.source
        ))
        .into());
    }
    Ok(device.to_string())
}

/// `/dev/vda2[/@/.snapshots/5/snapshot]` names the device `/dev/vda2`.
pub fn strip_subvolume_suffix(source: &str) -> &str {
    match source.find('[') {
        Some(index) => &source[..index],
        None => source,
    }
}

pub fn is_mountpoint(runner: &dyn CommandRunner, target: &Path) -> Result<bool> {
    Ok(list_mounts(runner)?
        .iter()
        .any(|entry| entry.target == target))
}

/// Mount targets at or below `root`, deepest first.
pub fn mounts_under(runner: &dyn CommandRunner, root: &Path) -> Result<Vec<PathBuf>> {
    let mut targets = list_mounts(runner)?
        .into_iter()
        .map(|entry| entry.target)
        .filter(|target| target.starts_with(root))
        .collect::<Vec<_>>();
    targets.sort_by(|left, right| {
        right
            .as_os_str()
            .len()
            .cmp(&left.as_os_str().len())
            .then_with(|| left.cmp(right))
    });
    targets.dedup();
    Ok(targets)
}

pub fn mount_subvolume(
    runner: &dyn CommandRunner,
    device: &str,
    subvolume: &str,
    target: &Path,
) -> Result<()> {
    let mut command = Command::new("mount");
    command
        .arg("-o")
        .arg(format!("subvol={subvolume}"))
        .arg(device)
        .arg(target);
    run_checked(runner, &mut command)
}

/// Recursive bind whose submounts do not propagate back to the host.
pub fn rbind(runner: &dyn CommandRunner, source: &Path, target: &Path) -> Result<()> {
    let mut command = Command::new("mount");
    command
        .arg("--rbind")
        .arg("--make-rslave")
        .arg(source)
        .arg(target);
    run_checked(runner, &mut command)
}

pub fn bind(runner: &dyn CommandRunner, source: &Path, target: &Path) -> Result<()> {
    let mut command = Command::new("mount");
    command
        .arg("--bind")
        .arg("--make-slave")
        .arg(source)
        .arg(target);
    run_checked(runner, &mut command)
}

/// Single unmount attempt. Returns whether the target was detached.
pub fn unmount(runner: &dyn CommandRunner, target: &Path) -> Result<bool> {
    let mut command = Command::new("umount");
    command.arg(target);
    let line = describe_command(&command);
    let output = runner
        .output(&mut command)
        .with_context(|| format!("failed running {line}"))?;
    if !output.success() {
        tracing::debug!(mountpoint = %target.display(), detail = %output.combined(), "unmount deferred");
    }
    Ok(output.success())
}

pub(crate) fn checked_stdout(runner: &dyn CommandRunner, command: &mut Command) -> Result<String> {
    let line = describe_command(command);
    let output = runner
        .output(command)
        .with_context(|| format!("failed running {line}"))?;
    if !output.success() {
        return Err(anyhow!(
            "{line} failed: status={} output='{}'",
            output.status,
            output.combined()
        ));
    }
    Ok(output.stdout)
}

pub(crate) fn run_checked(runner: &dyn CommandRunner, command: &mut Command) -> Result<()> {
    checked_stdout(runner, command).map(|_| ())
}
