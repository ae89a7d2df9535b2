use std::collections::BTreeSet;
use std::fmt;

use anyhow::{anyhow, Result};

/// Snapper userdata key holding the lifecycle tag.
pub const TAG_USERDATA_KEY: &str = "atomic-update";
/// Snapper userdata key holding the snapshot a candidate was branched from.
pub const BASE_USERDATA_KEY: &str = "atomic-update-base";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SnapshotTag {
    Created,
    Pending,
    Finished,
}

impl SnapshotTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "created" => Ok(Self::Created),
            "pending" => Ok(Self::Pending),
            "finished" => Ok(Self::Finished),
            _ => Err(anyhow!("invalid snapshot tag: {value}")),
        }
    }

    /// Tags of a candidate that never reached commit.
    pub fn unfinished() -> [Self; 2] {
        [Self::Created, Self::Pending]
    }
}

impl fmt::Display for SnapshotTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: u32,
    pub base: Option<u32>,
    pub read_write: bool,
    pub tag: Option<SnapshotTag>,
    pub is_default: bool,
    pub is_active: bool,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub all_units: BTreeSet<String>,
    pub failed_units: BTreeSet<String>,
    pub failed_programs: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegressionDiff {
    pub newly_failed_units: BTreeSet<String>,
    pub newly_failed_programs: BTreeSet<String>,
}

impl VerificationReport {
    /// Failures present in `self` but not in `baseline`. Units are only
    /// blamed when the baseline already knew them.
    pub fn regressions_since(&self, baseline: &VerificationReport) -> RegressionDiff {
        RegressionDiff {
            newly_failed_units: self
                .failed_units
                .difference(&baseline.failed_units)
                .filter(|unit| baseline.all_units.contains(*unit))
                .cloned()
                .collect(),
            newly_failed_programs: self
                .failed_programs
                .difference(&baseline.failed_programs)
                .cloned()
                .collect(),
        }
    }
}

impl RegressionDiff {
    pub fn is_empty(&self) -> bool {
        self.newly_failed_units.is_empty() && self.newly_failed_programs.is_empty()
    }
}
