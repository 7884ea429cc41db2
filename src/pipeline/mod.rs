//! # Analysis Pipeline
//!
//! Runs one upload from stored file to prediction, reporting progress along the way.
//!
//! ## Key Components:
//! - **PipelineOrchestrator**: sequences the stages and owns error handling
//! - **RunTracker / RunStage**: the stage state machine and its progress checkpoints
//! - **ProgressEvent / ProgressSender**: the ordered event stream sent to the caller
//! - **RunWorkspace**: per-run directory removed on drop
//! - **reduce**: per-segment probabilities to one decision

pub mod events;
pub mod orchestrator;
pub mod reducer;
pub mod run;
pub mod workspace;

pub use events::{Label, PredictionResult, ProgressEvent, ProgressSender};
pub use orchestrator::{PipelineOrchestrator, PipelineSettings};
pub use run::{RunStage, RunTracker};
pub use workspace::RunWorkspace;
