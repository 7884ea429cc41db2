//! # Classifier Module
//!
//! Maps a run's feature table to one positive-class probability per segment using a
//! previously fitted scaler and model. Nothing here trains anything: artifacts are
//! produced offline and loaded once at startup.
//!
//! ## Key Components:
//! - **StandardScaler**: per-column `(x - mean) / scale` using the fitted statistics
//! - **LogisticRegression**: `sigmoid(w·x + b)` evaluated with candle tensors
//! - **ModelArtifacts**: the loaded pair, shared read-only by every run via `Arc`
//!
//! ## Artifact format (JSON):
//! ```json
//! // scaler.json
//! { "feature_names": ["loudness_db_amean", ...], "mean": [...], "scale": [...] }
//! // classifier.json
//! { "model_type": "logistic_regression", "feature_names": [...],
//!   "coefficients": [...], "intercept": -0.12 }
//! ```

pub mod model;
pub mod registry;
pub mod scaler;

use crate::error::PipelineError;
use crate::features::FeatureTable;
use candle_core::Tensor;

pub use model::{ClassifierArtifact, LogisticRegression};
pub use registry::{ModelArtifacts, ModelInfo};
pub use scaler::{ScalerArtifact, StandardScaler};

/// A feature table after scaling, as a `[rows, cols]` tensor.
#[derive(Debug, Clone)]
pub struct ScaledTable {
    labels: Vec<String>,
    values: Tensor,
}

impl ScaledTable {
    pub fn new(labels: Vec<String>, values: Tensor) -> Self {
        Self { labels, values }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn values(&self) -> &Tensor {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.labels.len()
    }
}

/// A fitted scaler + model pair.
///
/// ## Rust Concepts:
/// - **Send + Sync**: one instance is shared across runs on the blocking thread pool
/// - **&self only**: prediction never mutates the model, so no locking is needed
pub trait Classifier: Send + Sync {
    /// Column names the scaler was fitted on, in order.
    fn schema(&self) -> &[String];

    /// Apply the fitted scaler. Columns must match `schema()` exactly.
    fn scale(&self, table: &FeatureTable) -> Result<ScaledTable, PipelineError>;

    /// One probability in `[0, 1]` per row.
    fn predict_probabilities(&self, scaled: &ScaledTable) -> Result<Vec<f64>, PipelineError>;
}
