//! Switching the running system to a new default snapshot without a reboot,
//! and delegating rollback to the snapshot store.
//!
//! After a live apply the host's `/boot` shows the new snapshot, while the
//! bootloader's own records may still describe the old one. Bootloader
//! updates issued before the next reboot therefore belong in a fresh
//! snapshot, not on the live system.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use atomic_update_core::{describe_command, CommandRunner, Config};
use atomic_update_host::{resolve_root_config, volumes, SnapperStore};
use tracing::{info, warn};

use crate::{unstage, Workspace};

/// Mounts `snapshot`'s `/usr`, `/etc` and `/boot` over the live system, then
/// has the init system pick up the new tree.
pub fn apply_live(
    runner: &dyn CommandRunner,
    config: &Config,
    snapshot: u32,
    device: &str,
) -> Result<()> {
    let workspace = Workspace::acquire(config)?;
    let applied = mount_live_tree(runner, config, &workspace, snapshot, device);
    let detached = unstage(runner, &workspace, &config.timeouts.unmount_policy());
    applied?;
    detached?;

    run_init_command(runner, Command::new("systemctl").arg("daemon-reexec"))?;
    let mut tmpfiles = Command::new("systemd-tmpfiles");
    tmpfiles.arg("--create");
    if let Err(err) = run_init_command(runner, &mut tmpfiles) {
        warn!("{err:#}");
    }
    info!("Applied snapshot {snapshot} to the running system");
    Ok(())
}

fn mount_live_tree(
    runner: &dyn CommandRunner,
    config: &Config,
    workspace: &Workspace,
    snapshot: u32,
    device: &str,
) -> Result<()> {
    let tree = workspace.mountpoint();
    let subvolume = config.snapshot_subvolume(snapshot);
    volumes::mount_subvolume(runner, device, &subvolume, tree)
        .with_context(|| format!("failed mounting snapshot {snapshot}"))?;
    let subvolumes = volumes::list_subvolumes(runner)?;

    volumes::bind(runner, &tree.join("usr"), Path::new("/usr"))?;
    mount_nested(runner, config, device, &subvolumes, "usr")?;

    volumes::bind(runner, &tree.join("etc"), Path::new("/etc"))?;

    let efi = Path::new("/boot/efi");
    let separate_efi = volumes::is_mountpoint(runner, efi)?;
    if separate_efi {
        volumes::bind(runner, efi, &tree.join("boot/efi"))?;
    }
    volumes::bind(runner, &tree.join("boot"), Path::new("/boot"))?;
    mount_nested(runner, config, device, &subvolumes, "boot")?;
    if separate_efi {
        volumes::bind(runner, &tree.join("boot/efi"), efi)?;
    }
    Ok(())
}

/// Mounts subvolumes living below `<root subvolume>/<dir>` over `/<dir>/...`;
/// they are shared between snapshots and not part of the snapshot itself.
fn mount_nested(
    runner: &dyn CommandRunner,
    config: &Config,
    device: &str,
    subvolumes: &[atomic_update_host::Subvolume],
    dir: &str,
) -> Result<()> {
    let parent = format!("{}/{dir}", config.root_subvolume);
    for relative in volumes::nested_subvolumes(subvolumes, &parent) {
        let target = Path::new("/").join(dir).join(&relative);
        volumes::mount_subvolume(runner, device, &format!("{parent}/{relative}"), &target)?;
    }
    Ok(())
}

fn run_init_command(runner: &dyn CommandRunner, command: &mut Command) -> Result<()> {
    let line = describe_command(command);
    let output = runner
        .output(command)
        .with_context(|| format!("failed running {line}"))?;
    if !output.success() {
        anyhow::bail!("{line} failed: {}", output.combined());
    }
    Ok(())
}

/// Asks the snapshot store to make `target` (or the running snapshot) the
/// default again.
pub fn rollback(runner: &dyn CommandRunner, target: Option<u32>) -> Result<()> {
    let config = resolve_root_config(runner)?;
    let report = SnapperStore::new(runner, &config).rollback_to(target)?;
    if !report.is_empty() {
        info!("{report}");
    }
    Ok(())
}

pub fn reboot(runner: &dyn CommandRunner) -> Result<()> {
    run_init_command(runner, Command::new("systemctl").arg("reboot"))
}
