use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use anyhow::Result;
use atomic_update_core::{CommandOutput, CommandRunner, Config, UpdateError};
use atomic_update_host::{resolve_root_config, SnapperStore};
use tracing::warn;

use crate::Workspace;

/// Everything one transaction needs, shared between the main flow and the
/// interrupt handler.
///
/// The context is itself a [`CommandRunner`]: every command the main flow
/// issues through [`TransactionContext::runner`] is one step, run under the
/// step lock and refused once an interrupt arrived. Teardown bypasses the
/// gate and talks to the host directly.
pub struct TransactionContext {
    host: Arc<dyn CommandRunner>,
    config: Config,
    workspace: Workspace,
    store_config: OnceLock<String>,
    interrupted: AtomicBool,
    candidate: Mutex<Option<u32>>,
    step_lock: Mutex<()>,
    pub(crate) cleanup_lock: Mutex<()>,
}

impl TransactionContext {
    pub fn new(host: Arc<dyn CommandRunner>, config: Config, workspace: Workspace) -> Self {
        Self {
            host,
            config,
            workspace,
            store_config: OnceLock::new(),
            interrupted: AtomicBool::new(false),
            candidate: Mutex::new(None),
            step_lock: Mutex::new(()),
            cleanup_lock: Mutex::new(()),
        }
    }

    /// Runner for transaction steps.
    pub fn runner(&self) -> &dyn CommandRunner {
        self
    }

    /// Ungated runner used by teardown.
    pub(crate) fn host(&self) -> &dyn CommandRunner {
        self.host.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn mark_interrupted(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Fails with [`UpdateError::Interrupted`] once an interrupt arrived, so
    /// the main flow stops issuing new work while teardown runs.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_interrupted() {
            return Err(UpdateError::Interrupted.into());
        }
        Ok(())
    }

    /// Remembers the snapshot this transaction created, so teardown can
    /// discard it whatever its tag.
    pub fn record_candidate(&self, id: u32) {
        *lock(&self.candidate) = Some(id);
    }

    pub fn candidate(&self) -> Option<u32> {
        *lock(&self.candidate)
    }

    /// Interrupt handling: stop the main flow, wait for the step in flight,
    /// then discard the candidate and clean up. Returns once teardown is
    /// done; no further step of this transaction will run.
    pub fn interrupt(&self) -> Result<()> {
        self.mark_interrupted();
        drop(lock(&self.step_lock));
        warn!("Interrupted, discarding the transaction");
        self.discard(self.candidate())
    }

    /// Snapper config for `/`, resolved on first use.
    pub fn store_config(&self) -> Result<&str> {
        if let Some(config) = self.store_config.get() {
            return Ok(config);
        }
        let resolved = resolve_root_config(self.host())?;
        Ok(self.store_config.get_or_init(|| resolved))
    }

    pub fn store(&self) -> Result<SnapperStore<'_>> {
        let config = self.store_config()?;
        Ok(SnapperStore::new(self.runner(), config))
    }

    pub(crate) fn host_store(&self) -> Result<SnapperStore<'_>> {
        let config = self.store_config()?;
        Ok(SnapperStore::new(self.host(), config))
    }

    fn step(&self) -> Result<MutexGuard<'_, ()>> {
        let guard = lock(&self.step_lock);
        self.checkpoint()?;
        Ok(guard)
    }
}

impl CommandRunner for TransactionContext {
    fn output(&self, command: &mut Command) -> Result<CommandOutput> {
        let _step = self.step()?;
        self.host.output(command)
    }

    fn interactive(&self, command: &mut Command) -> Result<i32> {
        let _step = self.step()?;
        self.host.interactive(command)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
