//! Translation of loader output into the persisted records.

pub mod motion;
pub mod segmentation;
pub mod stats;
pub mod traces;

pub use motion::normalize_motion;
pub use segmentation::{normalize_segmentation, resolve_segmentation_channel};
pub use traces::{normalize_activity, normalize_fluorescence};
