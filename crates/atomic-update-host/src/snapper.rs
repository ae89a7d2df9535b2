use std::collections::{BTreeMap, HashMap};
use std::process::Command;

use anyhow::{Context, Result};
use atomic_update_core::{
    describe_command, CommandOutput, CommandRunner, Snapshot, SnapshotTag, UpdateError,
    BASE_USERDATA_KEY, TAG_USERDATA_KEY,
};
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ConfigList {
    configs: Vec<ConfigRecord>,
}

#[derive(Debug, Deserialize)]
struct ConfigRecord {
    config: String,
    subvolume: String,
}

#[derive(Debug, Deserialize)]
struct SnapshotRecord {
    number: u32,
    default: bool,
    active: bool,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "read-only")]
    read_only: bool,
    #[serde(default)]
    userdata: Option<BTreeMap<String, String>>,
}

/// Typed view of one snapper configuration.
#[derive(Clone, Copy)]
pub struct SnapperStore<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a str,
}

/// Name of the snapper config whose subvolume is `/`.
pub fn resolve_root_config(runner: &dyn CommandRunner) -> Result<String> {
    let mut command = Command::new("snapper");
    command.arg("--jsonout").arg("list-configs");
    let output = run_store_command(runner, &mut command)?;
    let list: ConfigList = serde_json::from_str(&output.stdout).map_err(|err| {
        UpdateError::StoreUnavailable(format!("malformed list-configs output: {err}"))
    })?;

    let config = list
        .configs
        .into_iter()
        .find(|record| record.subvolume == "/")
        .map(|record| record.config)
        .ok_or(UpdateError::NoRootConfig)?;
    debug!(config = %config, "snapper root config");
    Ok(config)
}

impl<'a> SnapperStore<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a str) -> Self {
        Self { runner, config }
    }

    /// All snapshots, ascending by number.
    pub fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let mut command = self.command();
        command
            .arg("--jsonout")
            .arg("-c")
            .arg(self.config)
            .arg("list")
            .arg("--disable-used-space");
        let output = run_store_command(self.runner, &mut command)?;
        let mut listing: HashMap<String, Vec<SnapshotRecord>> =
            serde_json::from_str(&output.stdout).map_err(|err| {
                UpdateError::StoreUnavailable(format!("malformed snapshot list: {err}"))
            })?;
        let records = listing.remove(self.config).ok_or_else(|| {
            UpdateError::StoreUnavailable(format!(
                "snapshot list has no entry for config '{}'",
                self.config
            ))
        })?;

        let mut snapshots = records
            .into_iter()
            .map(snapshot_from_record)
            .collect::<Vec<_>>();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        Ok(snapshots)
    }

    /// Newest snapshot carrying `tag`.
    pub fn find_by_tag(&self, tag: SnapshotTag) -> Result<Option<Snapshot>> {
        Ok(self.find_all_by_tags(&[tag])?.into_iter().next())
    }

    /// Every snapshot carrying one of `tags`, newest first.
    pub fn find_all_by_tags(&self, tags: &[SnapshotTag]) -> Result<Vec<Snapshot>> {
        let mut matches = self
            .list_snapshots()?
            .into_iter()
            .filter(|snapshot| snapshot.tag.is_some_and(|tag| tags.contains(&tag)))
            .collect::<Vec<_>>();
        matches.reverse();
        Ok(matches)
    }

    /// Creates a read-write snapshot of `base` and returns its number.
    pub fn create(&self, base: u32, tag: SnapshotTag) -> Result<u32> {
        let mut command = self.command();
        command
            .arg("-c")
            .arg(self.config)
            .arg("create")
            .arg("-c")
            .arg("number")
            .arg("-d")
            .arg(format!("Atomic update of #{base}"))
            .arg("-u")
            .arg(format!(
                "{TAG_USERDATA_KEY}={tag},{BASE_USERDATA_KEY}={base}"
            ))
            .arg("--from")
            .arg(base.to_string())
            .arg("--read-write")
            .arg("--print-number");
        let output = run_store_command(self.runner, &mut command)?;
        let id = output.stdout.trim().parse::<u32>().map_err(|_| {
            UpdateError::StoreUnavailable(format!(
                "snapper create printed no snapshot number: '{}'",
                output.stdout.trim()
            ))
        })?;
        info!("Created read-write snapshot {id} from #{base}");
        Ok(id)
    }

    pub fn set_tag(&self, id: u32, tag: SnapshotTag) -> Result<()> {
        let mut command = self.command();
        command
            .arg("-c")
            .arg(self.config)
            .arg("modify")
            .arg("-u")
            .arg(format!("{TAG_USERDATA_KEY}={tag}"))
            .arg(id.to_string());
        run_store_command(self.runner, &mut command)?;
        debug!(snapshot = id, tag = %tag, "tagged snapshot");
        Ok(())
    }

    /// Makes `id` the snapshot booted next.
    pub fn promote(&self, id: u32) -> Result<()> {
        let mut command = self.command();
        command
            .arg("-c")
            .arg(self.config)
            .arg("modify")
            .arg("--default")
            .arg(id.to_string());
        run_store_command(self.runner, &mut command)?;
        Ok(())
    }

    pub fn delete(&self, id: u32) -> Result<()> {
        let mut command = self.command();
        command
            .arg("-c")
            .arg(self.config)
            .arg("delete")
            .arg(id.to_string());
        run_store_command(self.runner, &mut command)?;
        info!("Deleted snapshot {id}");
        Ok(())
    }

    /// Delegates to snapper's own rollback; `None` rolls back to the
    /// snapshot currently mounted as root.
    pub fn rollback_to(&self, target: Option<u32>) -> Result<String> {
        let mut command = self.command();
        command.arg("-c").arg(self.config).arg("rollback");
        if let Some(id) = target {
            command.arg(id.to_string());
        }
        let output = run_store_command(self.runner, &mut command)?;
        Ok(output.combined())
    }

    fn command(&self) -> Command {
        Command::new("snapper")
    }
}

/// The snapshot flagged active and the one flagged default.
pub fn active_and_default(snapshots: &[Snapshot]) -> Result<(&Snapshot, &Snapshot)> {
    let active = snapshots
        .iter()
        .find(|snapshot| snapshot.is_active)
        .ok_or_else(|| UpdateError::StoreUnavailable("no active snapshot listed".to_string()))?;
    let default = snapshots
        .iter()
        .find(|snapshot| snapshot.is_default)
        .ok_or_else(|| UpdateError::StoreUnavailable("no default snapshot listed".to_string()))?;
    Ok((active, default))
}

fn snapshot_from_record(record: SnapshotRecord) -> Snapshot {
    let userdata = record.userdata.unwrap_or_default();
    Snapshot {
        id: record.number,
        base: userdata
            .get(BASE_USERDATA_KEY)
            .and_then(|value| value.parse::<u32>().ok()),
        read_write: !record.read_only,
        tag: userdata
            .get(TAG_USERDATA_KEY)
            .and_then(|value| SnapshotTag::parse(value).ok()),
        is_default: record.default,
        is_active: record.active,
        description: record.description,
    }
}

fn run_store_command(runner: &dyn CommandRunner, command: &mut Command) -> Result<CommandOutput> {
    let line = describe_command(command);
    let output = runner
        .output(command)
        .with_context(|| format!("failed querying snapshot store: {line}"))?;
    if !output.success() {
        return Err(UpdateError::StoreUnavailable(format!(
            "{line} exited with status {}: {}",
            output.status,
            output.combined()
        ))
        .into());
    }
    Ok(output)
}
