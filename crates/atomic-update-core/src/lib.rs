mod config;
mod error;
mod retry;
mod runner;
mod types;

#[cfg(feature = "test-support")]
pub mod testing;

pub use config::{Config, Timeouts, DEFAULT_CONFIG_PATH, REQUIRED_PROGRAMS};
pub use error::{
    classify, exit_code_for, FailureClass, UpdateError, INTERRUPTED_EXIT_CODE,
};
pub use retry::{RetryLimit, RetryPolicy};
pub use runner::{command_line, describe_command, CommandOutput, CommandRunner, SystemRunner};
pub use types::{
    RegressionDiff, Snapshot, SnapshotTag, VerificationReport, BASE_USERDATA_KEY,
    TAG_USERDATA_KEY,
};
