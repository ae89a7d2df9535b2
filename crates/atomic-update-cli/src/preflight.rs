use std::path::Path;

use anyhow::Result;
use atomic_update_core::{Config, UpdateError, REQUIRED_PROGRAMS};
use atomic_update_host::engine_lock_holder;
use nix::unistd::geteuid;
use tracing::debug;

/// Checks that must pass before any snapshot is touched.
pub(crate) fn check(config: &Config) -> Result<()> {
    ensure_root(geteuid().is_root())?;
    ensure_programs(&REQUIRED_PROGRAMS, |program| which::which(program).is_ok())?;
    ensure_engine_unlocked(&config.engine_lock_file, Path::new("/proc"))?;
    debug!("preflight checks passed");
    Ok(())
}

pub(crate) fn ensure_root(is_root: bool) -> Result<()> {
    if !is_root {
        return Err(UpdateError::NotRoot.into());
    }
    Ok(())
}

pub(crate) fn ensure_programs<F>(programs: &[&str], mut available: F) -> Result<()>
where
    F: FnMut(&str) -> bool,
{
    if let Some(missing) = programs.iter().find(|program| !available(program)) {
        return Err(UpdateError::MissingDependency {
            program: missing.to_string(),
            required: programs.join(", "),
        }
        .into());
    }
    Ok(())
}

pub(crate) fn ensure_engine_unlocked(lock_file: &Path, proc_root: &Path) -> Result<()> {
    if let Some(holder) = engine_lock_holder(lock_file, proc_root)? {
        return Err(UpdateError::EngineLocked {
            pid: holder.pid,
            program: holder.program,
        }
        .into());
    }
    Ok(())
}
