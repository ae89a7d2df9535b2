use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    pub pid: u32,
    pub program: String,
}

/// Process currently holding the package engine lock. A lock file naming a
/// process that no longer exists is stale and reported as free.
pub fn engine_lock_holder(lock_file: &Path, proc_root: &Path) -> Result<Option<LockHolder>> {
    let raw = match fs::read_to_string(lock_file) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed reading lock file: {}", lock_file.display()));
        }
    };
    let Ok(pid) = raw.trim().parse::<u32>() else {
        return Ok(None);
    };

    let comm = proc_root.join(pid.to_string()).join("comm");
    match fs::read_to_string(&comm) {
        Ok(program) => Ok(Some(LockHolder {
            pid,
            program: program.trim().to_string(),
        })),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed reading {}", comm.display())),
    }
}
