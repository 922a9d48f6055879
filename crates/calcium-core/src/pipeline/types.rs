use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ImagingError, Result};
use crate::store::Table;

/// Pipeline stage, in dependency order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Processing,
    MotionCorrection,
    Segmentation,
    Fluorescence,
    Activity,
}

impl StageName {
    pub const ALL: [StageName; 5] = [
        Self::Processing,
        Self::MotionCorrection,
        Self::Segmentation,
        Self::Fluorescence,
        Self::Activity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::MotionCorrection => "motion_correction",
            Self::Segmentation => "segmentation",
            Self::Fluorescence => "fluorescence",
            Self::Activity => "activity",
        }
    }

    /// Table holding this stage's records.
    pub fn table(&self) -> Table {
        match self {
            Self::Processing => Table::Processing,
            Self::MotionCorrection => Table::MotionCorrection,
            Self::Segmentation => Table::Segmentation,
            Self::Fluorescence => Table::Fluorescence,
            Self::Activity => Table::Activity,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "Processing"),
            Self::MotionCorrection => write!(f, "Motion correction"),
            Self::Segmentation => write!(f, "Segmentation"),
            Self::Fluorescence => write!(f, "Fluorescence"),
            Self::Activity => write!(f, "Activity"),
        }
    }
}

impl FromStr for StageName {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| ImagingError::InvalidConfig(format!("unknown stage '{s}'")))
    }
}

/// Thread-safe progress reporting for populate runs.
///
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A stage has started. `total_items` is the number of pending keys.
    fn begin_stage(&self, _stage: StageName, _total_items: Option<usize>) {}

    /// `items_done` keys of the current stage have been attempted.
    fn advance(&self, _items_done: usize) {}

    fn finish_stage(&self) {}
}

pub struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// One key that failed during a populate run.
#[derive(Clone, Debug)]
pub struct KeyFailure {
    pub key: String,
    pub message: String,
    pub retryable: bool,
}

impl KeyFailure {
    pub fn new(key: impl fmt::Display, error: &ImagingError) -> Self {
        Self {
            key: key.to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Outcome of populating one stage.
#[derive(Clone, Debug)]
pub struct PopulateSummary {
    pub stage: StageName,
    /// Keys in the stage's key source.
    pub eligible: usize,
    pub inserted: usize,
    /// Keys already present, including races lost to another writer.
    pub skipped: usize,
    pub failed: Vec<KeyFailure>,
}

impl PopulateSummary {
    pub fn new(stage: StageName) -> Self {
        Self {
            stage,
            eligible: 0,
            inserted: 0,
            skipped: 0,
            failed: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Inserted,
    AlreadyPresent,
}
