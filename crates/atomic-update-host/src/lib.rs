//! Typed adapters over the host tools the update engine drives: the snapshot
//! store, the volume manager and mount table, the container manager, and the
//! package engine. Every adapter issues commands through a [`CommandRunner`]
//! and maps failures to [`UpdateError`] where callers need to branch on them.
//!
//! [`CommandRunner`]: atomic_update_core::CommandRunner
//! [`UpdateError`]: atomic_update_core::UpdateError

pub mod lock;
pub mod machines;
pub mod packages;
pub mod snapper;
pub mod volumes;

pub use lock::{engine_lock_holder, LockHolder};
pub use machines::{MachineRecord, UnitRecord};
pub use packages::{dist_upgrade_command, dist_upgrade_dry_run, parse_dry_run, DryRunReport};
pub use snapper::{active_and_default, resolve_root_config, SnapperStore};
pub use volumes::{MountEntry, Subvolume};
