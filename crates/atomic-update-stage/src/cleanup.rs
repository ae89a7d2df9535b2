use anyhow::{anyhow, Result};
use atomic_update_core::SnapshotTag;
use atomic_update_host::machines;
use tracing::{info, warn};

use crate::{unstage, TransactionContext};

impl TransactionContext {
    /// Tears down everything this run may have left behind: its containers,
    /// its mounts and directories, and every snapshot still tagged `created`
    /// or `pending`. Each step runs even when an earlier one failed, and the
    /// whole routine may be repeated.
    pub fn cleanup(&self) -> Result<()> {
        let _guard = self
            .cleanup_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.cleanup_held()
    }

    /// Cleanup for a transaction that will not commit. The candidate is
    /// deleted whatever its tag, unless it already became the default.
    pub fn discard(&self, candidate: Option<u32>) -> Result<()> {
        let _guard = self
            .cleanup_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cleaned = self.cleanup_held();
        let Some(id) = candidate else {
            return cleaned;
        };

        let store = self.host_store()?;
        let leftover = store
            .list_snapshots()?
            .into_iter()
            .find(|snapshot| snapshot.id == id && !snapshot.is_default);
        if leftover.is_some() {
            store.delete(id)?;
        }
        cleaned
    }

    fn cleanup_held(&self) -> Result<()> {
        info!("Cleaning up");
        let mut failures = Vec::new();
        if let Err(err) = self.stop_owned_machines() {
            failures.push(format!("{err:#}"));
        }
        if let Err(err) = unstage(
            self.host(),
            self.workspace(),
            &self.config().timeouts.unmount_policy(),
        ) {
            failures.push(format!("{err:#}"));
        }
        if let Err(err) = self.reap_unfinished_snapshots() {
            failures.push(format!("{err:#}"));
        }

        if failures.is_empty() {
            return Ok(());
        }
        for failure in &failures {
            warn!("Cleanup step failed: {failure}");
        }
        Err(anyhow!("cleanup incomplete: {}", failures.join("; ")))
    }

    fn stop_owned_machines(&self) -> Result<()> {
        let listed = machines::list_machines(self.host())?;
        for record in listed
            .iter()
            .filter(|record| self.workspace().owns_machine(&record.machine))
        {
            machines::terminate_machine(self.host(), &record.machine)?;
        }
        Ok(())
    }

    fn reap_unfinished_snapshots(&self) -> Result<()> {
        let store = self.host_store()?;
        let mut failures = Vec::new();
        for snapshot in store.find_all_by_tags(&SnapshotTag::unfinished())? {
            if let Err(err) = store.delete(snapshot.id) {
                failures.push(format!("snapshot {}: {err:#}", snapshot.id));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "failed deleting unfinished snapshots: {}",
                failures.join("; ")
            ))
        }
    }
}
