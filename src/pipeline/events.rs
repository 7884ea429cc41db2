//! # Progress Events
//!
//! A run reports to its caller through a one-way, ordered stream of events:
//! zero or more `Progress` events followed by exactly one `Result`.
//!
//! ## Wire format (one SSE frame per event):
//! ```text
//! data: {"type":"progress","stage":"splitting","percentage":30}
//!
//! data: {"type":"result","result":{"success":true,"label":"Positive",
//!        "prediction":"prediction: ADHD","probability":"Probability of ADHD: 88.33%",
//!        "percentage":88.33}}
//!
//! data: {"type":"result","result":{"success":false,"message":"Error processing file: ..."}}
//! ```

use crate::error::PipelineError;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;

/// Final decision of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Label {
    Positive,
    Negative,
}

/// Immutable outcome of one run.
///
/// ## Fields:
/// - `success`: false for every failure path
/// - `label`: present only on success
/// - `probability`: mean positive-class probability in `[0, 1]`
/// - `percentage`: `probability * 100`
/// - `message`: human-readable failure reason
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    success: bool,
    label: Option<Label>,
    probability: f64,
    percentage: f64,
    message: Option<String>,
}

impl PredictionResult {
    /// Successful result for a mean probability. `>= 0.5` is positive.
    pub fn from_probability(probability: f64) -> Self {
        let label = if probability >= 0.5 { Label::Positive } else { Label::Negative };
        Self {
            success: true,
            label: Some(label),
            probability,
            percentage: probability * 100.0,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            label: None,
            probability: 0.0,
            percentage: 0.0,
            message: Some(message.into()),
        }
    }

    /// Failure result for a pipeline error.
    ///
    /// Validation messages are shown as-is; anything that happened after the upload was
    /// accepted is prefixed so the caller can tell the two apart.
    pub fn from_error(error: &PipelineError) -> Self {
        match error {
            PipelineError::Validation(message) => Self::failure(message.clone()),
            PipelineError::Cancelled => Self::failure(error.to_string()),
            other => Self::failure(format!("Error processing file: {}", other)),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn label(&self) -> Option<Label> {
        self.label
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// JSON payload for the `result` field of the wire event.
    pub fn to_json(&self, condition: &str) -> Value {
        match self.label {
            Some(label) if self.success => {
                let prediction = match label {
                    Label::Positive => condition.to_string(),
                    Label::Negative => format!("Non-{}", condition),
                };
                json!({
                    "success": true,
                    "label": label,
                    "prediction": format!("prediction: {}", prediction),
                    "probability": format!("Probability of {}: {:.2}%", condition, self.percentage),
                    "percentage": (self.percentage * 100.0).round() / 100.0,
                })
            }
            _ => json!({
                "success": false,
                "message": self.message.clone().unwrap_or_default(),
            }),
        }
    }
}

/// One event on the progress stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress { stage: &'static str, percentage: u8 },
    Result(PredictionResult),
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Result(_))
    }

    pub fn to_json(&self, condition: &str) -> Value {
        match self {
            ProgressEvent::Progress { stage, percentage } => json!({
                "type": "progress",
                "stage": stage,
                "percentage": percentage,
            }),
            ProgressEvent::Result(result) => json!({
                "type": "result",
                "result": result.to_json(condition),
            }),
        }
    }

    /// `data: <json>\n\n`
    pub fn to_sse_frame(&self, condition: &str) -> String {
        format!("data: {}\n\n", self.to_json(condition))
    }
}

/// Producer half of a run's progress channel.
///
/// A failed send means the consumer is gone; callers treat that as cancellation.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// Returns false when the receiver has been dropped.
    pub fn send(&self, event: ProgressEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}
