use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use atomic_update_core::{CommandRunner, Config, RetryPolicy, UpdateError};
use atomic_update_host::volumes;
use tracing::{debug, warn};

/// Host pseudo-filesystems made visible inside the staged tree.
const PSEUDO_FILESYSTEMS: [&str; 4] = ["dev", "proc", "run", "sys"];

/// Filesystem types skipped when mounting the staged tree's fstab.
const FSTAB_TYPE_FILTER: &str = "nonfs,nfs4,cifs,smb3,sshfs";

/// Private scratch tree of one run: `root` is unique per run and
/// `mountpoint` (`root/rootfs`) receives the candidate snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
    mountpoint: PathBuf,
    machine_prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub failed_steps: Vec<String>,
}

impl StageReport {
    pub fn is_complete(&self) -> bool {
        self.failed_steps.is_empty()
    }
}

impl Workspace {
    /// Creates a fresh, owner-only directory pair under the configured
    /// temporary directory.
    pub fn acquire(config: &Config) -> Result<Self> {
        let root = tempfile::Builder::new()
            .prefix(&config.workspace_prefix)
            .tempdir_in(&config.tmp_dir)
            .map_err(|err| {
                UpdateError::ResourceExhausted(format!(
                    "failed creating workspace in {}: {err}",
                    config.tmp_dir.display()
                ))
            })?
            .keep();

        let workspace = Self::at(root);
        DirBuilder::new()
            .mode(0o700)
            .create(&workspace.mountpoint)
            .map_err(|err| {
                UpdateError::ResourceExhausted(format!(
                    "failed creating {}: {err}",
                    workspace.mountpoint.display()
                ))
            })?;
        debug!(root = %workspace.root.display(), "acquired workspace");
        Ok(workspace)
    }

    /// Describes an existing workspace root without touching the filesystem.
    pub fn at(root: PathBuf) -> Self {
        let basename = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let machine_prefix = sanitize_machine_name(&basename);
        Self {
            mountpoint: root.join("rootfs"),
            root,
            machine_prefix,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn machine_prefix(&self) -> &str {
        &self.machine_prefix
    }

    pub fn machine_name(&self, phase: Phase) -> String {
        format!("{}-{}", self.machine_prefix, phase.as_str())
    }

    /// Whether a registered machine was started from this workspace.
    pub fn owns_machine(&self, machine: &str) -> bool {
        machine
            .strip_prefix(&self.machine_prefix)
            .is_some_and(|rest| rest.starts_with('-'))
    }
}

/// Machine names must be valid hostnames.
fn sanitize_machine_name(raw: &str) -> String {
    let sanitized = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect::<String>();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "atomic-update".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Mounts `subvolume` at the workspace mountpoint, then the host's pseudo
/// filesystems and the tree's own local fstab entries. Only the first step
/// is fatal; later failures are reported for the caller to judge.
pub fn stage(
    runner: &dyn CommandRunner,
    workspace: &Workspace,
    device: &str,
    subvolume: &str,
) -> Result<StageReport> {
    let mountpoint = workspace.mountpoint();
    volumes::mount_subvolume(runner, device, subvolume, mountpoint).with_context(|| {
        format!(
            "failed mounting subvolume {subvolume} at {}",
            mountpoint.display()
        )
    })?;

    let mut report = StageReport::default();
    for name in PSEUDO_FILESYSTEMS {
        let source = Path::new("/").join(name);
        if let Err(err) = volumes::rbind(runner, &source, &mountpoint.join(name)) {
            warn!("Could not bind {} into the staged tree: {err:#}", source.display());
            report.failed_steps.push(format!("bind {}", source.display()));
        }
    }

    let mut fstab = std::process::Command::new("chroot");
    fstab
        .arg(mountpoint)
        .arg("mount")
        .arg("-a")
        .arg("-t")
        .arg(FSTAB_TYPE_FILTER)
        .arg("-O")
        .arg("no_netdev");
    match runner.output(&mut fstab) {
        Ok(output) if output.success() => {}
        Ok(output) => {
            warn!("Mounting the staged fstab failed: {}", output.combined());
            report.failed_steps.push("mount fstab".to_string());
        }
        Err(err) => return Err(err).context("failed mounting staged fstab"),
    }

    Ok(report)
}

/// Detaches everything mounted below the workspace root, innermost first,
/// sweeping until nothing is left, then removes the (now empty) directories.
pub fn unstage(
    runner: &dyn CommandRunner,
    workspace: &Workspace,
    policy: &RetryPolicy,
) -> Result<()> {
    let detached = policy.poll(|| {
        let targets = volumes::mounts_under(runner, workspace.root())?;
        if targets.is_empty() {
            return Ok(Some(()));
        }
        for target in &targets {
            volumes::unmount(runner, target)?;
        }
        Ok(None)
    })?;
    if detached.is_none() {
        return Err(anyhow!(
            "mounts below {} did not detach",
            workspace.root().display()
        ));
    }

    remove_empty_dir(workspace.mountpoint())?;
    remove_empty_dir(workspace.root())
}

fn remove_empty_dir(path: &Path) -> Result<()> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed removing {}", path.display())),
    }
}
