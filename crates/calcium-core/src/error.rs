use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{backend} output at {} is missing: {}", .path.display(), .missing.join(", "))]
    BackendFileMissing {
        backend: String,
        path: PathBuf,
        missing: Vec<String>,
    },

    #[error("Unsupported processing backend: {0}")]
    UnsupportedBackend(String),

    #[error("Parameters already registered under id {existing}, refusing duplicate id {requested}")]
    ParameterSetConflict { existing: u32, requested: u32 },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("{stage} has no upstream record for {key}")]
    UpstreamNotReady { stage: String, key: String },

    #[error("Invalid array file: {0}")]
    InvalidArray(String),

    #[error("Invalid output layout: {0}")]
    InvalidLayout(String),

    #[error("Result store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cannot trigger {0} analysis; run it externally and switch the task to load mode")]
    TriggerUnsupported(String),

    #[error("Suite2p results are not supported for multi-ROI scans ({0})")]
    MultiRoiUnsupported(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),
}

impl ImagingError {
    /// Whether re-running the same key can succeed once the operator fixes
    /// the output directory or the store recovers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::BackendFileMissing { .. }
                | Self::ShapeMismatch(_)
                | Self::UpstreamNotReady { .. }
                | Self::InvalidArray(_)
                | Self::InvalidLayout(_)
                | Self::Store(_)
                | Self::NotFound(_)
        )
    }

    pub(crate) fn missing(
        backend: impl Into<String>,
        path: impl Into<PathBuf>,
        missing: Vec<String>,
    ) -> Self {
        Self::BackendFileMissing {
            backend: backend.into(),
            path: path.into(),
            missing,
        }
    }
}

impl From<serde_json::Error> for ImagingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for ImagingError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ImagingError>;
