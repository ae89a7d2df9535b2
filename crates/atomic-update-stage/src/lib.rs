mod apply;
mod cleanup;
mod context;
mod verify;
mod workspace;

pub use apply::{apply_live, reboot, rollback};
pub use context::TransactionContext;
pub use verify::{
    await_boot_completion, boot_isolated, collect_report, diff, stop, verify, InstanceHandle,
};
pub use workspace::{stage, unstage, Phase, StageReport, Workspace};
