pub mod config;
mod context;
mod orchestrator;
mod stage;
mod stages;
mod types;

pub use config::{PipelineConfig, PopulateConfig};
pub use context::PipelineContext;
pub use orchestrator::{populate_all, populate_stage};
pub use stage::{pending_keys, populate, run_key, Stage};
pub use stages::{
    ActivityStage, FluorescenceStage, MotionCorrectionStage, ProcessingStage, SegmentationStage,
};
pub use types::{
    KeyFailure, NoOpReporter, PopulateSummary, ProgressReporter, RunOutcome, StageName,
};
