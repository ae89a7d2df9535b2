use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/atomic-update.toml";

/// Programs the tool shells out to. They are also health-checked inside
/// the staged tree before and after every update.
pub const REQUIRED_PROGRAMS: [&str; 15] = [
    "zypper",
    "snapper",
    "btrfs",
    "mount",
    "umount",
    "findmnt",
    "chroot",
    "bash",
    "systemd-nspawn",
    "systemd-run",
    "systemd-analyze",
    "systemctl",
    "systemd-tmpfiles",
    "machinectl",
    "journalctl",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub snapshot_subvolume_prefix: String,
    pub root_subvolume: String,
    pub tmp_dir: PathBuf,
    pub workspace_prefix: String,
    pub masked_units: Vec<String>,
    pub program_checklist: Vec<String>,
    pub unprivileged_user: String,
    pub engine_lock_file: PathBuf,
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    pub discovery_interval_ms: u64,
    pub discovery_attempts: u32,
    pub boot_interval_ms: u64,
    pub boot_deadline_secs: u64,
    pub unmount_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_subvolume_prefix: "@/.snapshots".to_string(),
            root_subvolume: "@".to_string(),
            tmp_dir: PathBuf::from("/tmp"),
            workspace_prefix: "atomic-update_".to_string(),
            masked_units: vec![
                "local-fs.target".to_string(),
                "auditd.service".to_string(),
                "kdump.service".to_string(),
            ],
            program_checklist: Vec::new(),
            unprivileged_user: "nobody".to_string(),
            engine_lock_file: PathBuf::from("/run/zypp.pid"),
            timeouts: Timeouts::default(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            discovery_interval_ms: 500,
            discovery_attempts: 60,
            boot_interval_ms: 1_000,
            boot_deadline_secs: 300,
            unmount_interval_ms: 10,
        }
    }
}

impl Config {
    /// Loads `path`, or the default location when `path` is `None`.
    /// Only the default location may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !required => {
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading config: {}", path.display()));
            }
        };

        Self::from_toml_str(&content)
            .with_context(|| format!("failed parsing config: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Subvolume path of snapshot `id` relative to the btrfs top level.
    pub fn snapshot_subvolume(&self, id: u32) -> String {
        format!("{}/{id}/snapshot", self.snapshot_subvolume_prefix)
    }

    /// Programs health-checked in the staged tree, deduplicated and sorted.
    pub fn checked_programs(&self) -> Vec<String> {
        let mut programs = REQUIRED_PROGRAMS
            .iter()
            .map(|program| program.to_string())
            .chain(self.program_checklist.iter().cloned())
            .collect::<Vec<_>>();
        programs.sort();
        programs.dedup();
        programs
    }
}

impl Timeouts {
    pub fn discovery_policy(&self) -> RetryPolicy {
        RetryPolicy::attempts(
            Duration::from_millis(self.discovery_interval_ms),
            self.discovery_attempts,
        )
    }

    pub fn boot_policy(&self) -> RetryPolicy {
        RetryPolicy::deadline(
            Duration::from_millis(self.boot_interval_ms),
            Duration::from_secs(self.boot_deadline_secs),
        )
    }

    pub fn unmount_policy(&self) -> RetryPolicy {
        RetryPolicy::unbounded(Duration::from_millis(self.unmount_interval_ms))
    }
}
