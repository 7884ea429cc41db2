//! # Run State Machine
//!
//! Every analysis run walks the same stages in order:
//!
//! ```text
//! Received → Validated → Segmenting → Resampling → Extracting → Classifying → Reducing → Completed
//!     └──────────┴────────────┴────────────┴────────────┴─────────────┴───────────┴──→ Failed
//! ```
//!
//! ## Progress checkpoints (emitted on entry):
//! | Stage       | Wire name            | % |
//! |-------------|----------------------|---|
//! | Validated   | `upload`             | 20 |
//! | Segmenting  | `splitting`          | 30 |
//! | Resampling  | `resampling`         | 50 |
//! | Extracting  | `feature_extraction` | 70 |
//! | Classifying | `analysis`           | 90 |
//! | Reducing    | `reducing`           | 95 |
//! | Completed   | `complete`           | 100 |
//!
//! `Received` emits nothing, so a run rejected during validation produces no progress
//! events at all, only its failure result.

use crate::error::PipelineError;
use crate::pipeline::events::{PredictionResult, ProgressEvent, ProgressSender};
use tracing::{debug, warn};
use uuid::Uuid;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Received,
    Validated,
    Segmenting,
    Resampling,
    Extracting,
    Classifying,
    Reducing,
    Completed,
    Failed,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Received => "received",
            RunStage::Validated => "validated",
            RunStage::Segmenting => "segmenting",
            RunStage::Resampling => "resampling",
            RunStage::Extracting => "extracting",
            RunStage::Classifying => "classifying",
            RunStage::Reducing => "reducing",
            RunStage::Completed => "completed",
            RunStage::Failed => "failed",
        }
    }

    /// Wire stage name and percentage announced on entry, if any.
    pub fn checkpoint(&self) -> Option<(&'static str, u8)> {
        match self {
            RunStage::Validated => Some(("upload", 20)),
            RunStage::Segmenting => Some(("splitting", 30)),
            RunStage::Resampling => Some(("resampling", 50)),
            RunStage::Extracting => Some(("feature_extraction", 70)),
            RunStage::Classifying => Some(("analysis", 90)),
            RunStage::Reducing => Some(("reducing", 95)),
            RunStage::Completed => Some(("complete", 100)),
            RunStage::Received | RunStage::Failed => None,
        }
    }

    /// The stage that follows on the success path.
    pub fn next(&self) -> Option<RunStage> {
        match self {
            RunStage::Received => Some(RunStage::Validated),
            RunStage::Validated => Some(RunStage::Segmenting),
            RunStage::Segmenting => Some(RunStage::Resampling),
            RunStage::Resampling => Some(RunStage::Extracting),
            RunStage::Extracting => Some(RunStage::Classifying),
            RunStage::Classifying => Some(RunStage::Reducing),
            RunStage::Reducing => Some(RunStage::Completed),
            RunStage::Completed | RunStage::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStage::Completed | RunStage::Failed)
    }

    pub fn can_transition_to(&self, to: RunStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == RunStage::Failed || self.next() == Some(to)
    }
}

/// Drives one run through its stages and owns the producer side of its event stream.
///
/// ## Guarantees:
/// - progress events are emitted in stage order, each at most once
/// - exactly one `Result` event is emitted, even if the tracker is dropped early
pub struct RunTracker {
    run_id: Uuid,
    stage: RunStage,
    sender: ProgressSender,
    finished: bool,
}

impl RunTracker {
    pub fn new(run_id: Uuid, sender: ProgressSender) -> Self {
        Self {
            run_id,
            stage: RunStage::Received,
            sender,
            finished: false,
        }
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    /// Move to the next stage and announce it.
    ///
    /// Returns `Cancelled` when nobody is listening any more.
    pub fn advance(&mut self, to: RunStage) -> Result<(), PipelineError> {
        if to.is_terminal() || !self.stage.can_transition_to(to) {
            return Err(PipelineError::IllegalTransition {
                from: self.stage.as_str(),
                to: to.as_str(),
            });
        }
        self.enter(to)
    }

    fn enter(&mut self, to: RunStage) -> Result<(), PipelineError> {
        debug!(run_id = %self.run_id, from = self.stage.as_str(), to = to.as_str(), "Stage transition");
        self.stage = to;
        if let Some((stage, percentage)) = to.checkpoint() {
            if !self.sender.send(ProgressEvent::Progress { stage, percentage }) {
                return Err(PipelineError::Cancelled);
            }
        }
        Ok(())
    }

    /// Enter `Completed` and emit the successful result.
    pub fn complete(&mut self, result: PredictionResult) -> Result<(), PipelineError> {
        if self.finished || !self.stage.can_transition_to(RunStage::Completed) {
            return Err(PipelineError::IllegalTransition {
                from: self.stage.as_str(),
                to: RunStage::Completed.as_str(),
            });
        }
        self.finished = true;
        self.enter(RunStage::Completed)?;
        if !self.sender.send(ProgressEvent::Result(result)) {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Enter `Failed` and emit the failure result. A no-op once a result was sent.
    pub fn fail(&mut self, error: &PipelineError) {
        self.fail_with(PredictionResult::from_error(error));
    }

    fn fail_with(&mut self, result: PredictionResult) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.stage = RunStage::Failed;
        if !self.sender.send(ProgressEvent::Result(result)) {
            debug!(run_id = %self.run_id, "Failure result dropped, receiver is gone");
        }
    }
}

impl Drop for RunTracker {
    fn drop(&mut self) {
        if !self.finished {
            warn!(run_id = %self.run_id, stage = self.stage.as_str(), "Run ended without a result");
            self.fail_with(PredictionResult::failure("Error processing file: analysis ended unexpectedly"));
        }
    }
}
