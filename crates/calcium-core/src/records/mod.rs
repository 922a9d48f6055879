//! Normalized entities persisted by the pipeline stages.

pub mod motion;
pub mod segmentation;
pub mod traces;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ImagingError, Result};
use crate::keys::{CurationKey, TaskKey};

pub use motion::{
    Block, BlockExtent, MotionCorrectionRecord, NonRigidGrid, RigidCorrection, SummaryImages,
};
pub use segmentation::{ClassifiedMask, Mask, MaskClassification, MaskType, SegmentationRecord};
pub use traces::{ActivityRecord, ActivityTrace, FluorescenceRecord, Trace};

/// Whether a task ingests existing output or would run the tool itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    #[default]
    Load,
    Trigger,
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => write!(f, "load"),
            Self::Trigger => write!(f, "trigger"),
        }
    }
}

impl FromStr for TaskMode {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "load" => Ok(Self::Load),
            "trigger" => Ok(Self::Trigger),
            other => Err(ImagingError::InvalidConfig(format!("unknown task mode '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub key: TaskKey,
    /// Relative to the data roots, or absolute. Empty until inferred.
    pub output_dir: PathBuf,
    pub mode: TaskMode,
}

/// Marks a task whose output was found and accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub key: TaskKey,
    pub completed_at: DateTime<Utc>,
    pub package_version: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Curation {
    pub key: CurationKey,
    pub output_dir: PathBuf,
    pub is_manual: bool,
    pub note: String,
    pub created_at: DateTime<Utc>,
}
