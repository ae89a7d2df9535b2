use thiserror::Error;

pub const INTERRUPTED_EXIT_CODE: u8 = 130;
const GENERIC_FAILURE_EXIT_CODE: u8 = 1;

/// Where in the transaction a failure happened, which decides how much
/// teardown the failure requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Nothing was created yet; no cleanup needed.
    Precondition,
    /// The candidate snapshot exists and must be discarded.
    Stage,
    Verification,
    Payload,
    /// The candidate is already the default; nothing is discarded.
    Committed,
    Interrupted,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("bailing out, program must be run with root privileges")]
    NotRoot,

    #[error("bailing out, missing required dependency '{program}' in PATH; the following programs are required: {required}")]
    MissingDependency { program: String, required: String },

    #[error("zypper is already invoked by the application with pid {pid} ({program}); close this application before trying again")]
    EngineLocked { pid: u32, program: String },

    #[error("no snapper config found for root '/'; configure snapper and try again")]
    NoRootConfig,

    #[error("snapshot {0} does not exist")]
    UnknownSnapshot(u32),

    #[error("could not create read-write snapshot from #{base}: {detail}")]
    SnapshotCreation { base: u32, detail: String },

    #[error("could not find subvolume {subvolume} of snapshot {snapshot}")]
    SubvolumeNotFound { snapshot: u32, subvolume: String },

    #[error("could not find root filesystem device: {0}")]
    DeviceResolution(String),

    #[error("snapshot store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("could not create workspace: {0}")]
    ResourceExhausted(String),

    #[error("isolated instance {machine} failed to boot: {detail}")]
    BootTimeout { machine: String, detail: String },

    #[error("update introduced regressions (units: [{}], programs: [{}])", units.join(", "), programs.join(", "))]
    Regression {
        units: Vec<String>,
        programs: Vec<String>,
    },

    #[error("{command} returned exit code {status}")]
    PayloadFailed { command: String, status: i32 },

    #[error("transaction discarded: {0}")]
    Discarded(String),

    #[error("snapshot {snapshot} is the new default but could not be applied live: {detail}")]
    LiveApply { snapshot: u32, detail: String },

    #[error("interrupted")]
    Interrupted,
}

impl UpdateError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::UnknownSnapshot(_) => 1,
            Self::NotRoot => 2,
            Self::MissingDependency { .. } => 3,
            Self::EngineLocked { .. } => 4,
            Self::NoRootConfig => 5,
            Self::SnapshotCreation { .. } => 6,
            Self::SubvolumeNotFound { .. } => 7,
            Self::DeviceResolution(_) => 8,
            Self::BootTimeout { .. }
            | Self::Regression { .. }
            | Self::PayloadFailed { .. }
            | Self::Discarded(_) => 9,
            Self::StoreUnavailable(_) => 10,
            Self::ResourceExhausted(_) => 11,
            Self::LiveApply { .. } => 12,
            Self::Interrupted => INTERRUPTED_EXIT_CODE,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::NotRoot
            | Self::MissingDependency { .. }
            | Self::EngineLocked { .. }
            | Self::NoRootConfig
            | Self::UnknownSnapshot(_)
            | Self::ResourceExhausted(_) => FailureClass::Precondition,
            Self::SnapshotCreation { .. }
            | Self::SubvolumeNotFound { .. }
            | Self::DeviceResolution(_)
            | Self::StoreUnavailable(_)
            | Self::Discarded(_) => FailureClass::Stage,
            Self::BootTimeout { .. } | Self::Regression { .. } => FailureClass::Verification,
            Self::PayloadFailed { .. } => FailureClass::Payload,
            Self::LiveApply { .. } => FailureClass::Committed,
            Self::Interrupted => FailureClass::Interrupted,
        }
    }
}

/// Finds the first classified failure in an error chain.
pub fn classify(err: &anyhow::Error) -> Option<&UpdateError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<UpdateError>())
}

pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    classify(err)
        .map(UpdateError::exit_code)
        .unwrap_or(GENERIC_FAILURE_EXIT_CODE)
}
