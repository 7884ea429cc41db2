//! # Logistic Regression
//!
//! The built-in classifier: `p = sigmoid(w·x + b)` for each scaled row.
//!
//! ## Rust Concepts:
//! - **candle Tensor ops**: `matmul` then `affine` for the intercept; the sigmoid is
//!   written as `1 / (1 + exp(-z))` from primitive ops so only candle-core is needed
//! - **Immutable after load**: nothing here takes `&mut self`

use crate::error::PipelineError;
use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

pub const LOGISTIC_REGRESSION: &str = "logistic_regression";

/// On-disk form of a fitted classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierArtifact {
    pub model_type: String,
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    /// `[n_features, 1]` column so a `[rows, n_features]` input yields `[rows, 1]`
    weights: Tensor,
    intercept: f64,
    n_features: usize,
}

impl LogisticRegression {
    pub fn from_artifact(artifact: &ClassifierArtifact, device: &Device, dtype: DType) -> Result<Self, PipelineError> {
        if artifact.model_type != LOGISTIC_REGRESSION {
            return Err(PipelineError::ModelLoad(format!(
                "unsupported model type '{}'",
                artifact.model_type
            )));
        }
        if artifact.coefficients.is_empty() {
            return Err(PipelineError::ModelLoad("classifier has no coefficients".to_string()));
        }
        if !artifact.intercept.is_finite() || artifact.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(PipelineError::ModelLoad("classifier contains non-finite weights".to_string()));
        }

        let n_features = artifact.coefficients.len();
        let weights = Tensor::from_vec(artifact.coefficients.clone(), (n_features, 1), device)
            .and_then(|t| t.to_dtype(dtype))
            .map_err(|e| PipelineError::ModelLoad(e.to_string()))?;

        Ok(Self { weights, intercept: artifact.intercept, n_features })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Positive-class probability for each row of a `[rows, n_features]` tensor.
    pub fn predict_proba(&self, x: &Tensor) -> Result<Vec<f64>, PipelineError> {
        let (_, cols) = x.dims2()?;
        if cols != self.n_features {
            return Err(PipelineError::SchemaMismatch(format!(
                "classifier expects {} features, got {}",
                self.n_features, cols
            )));
        }

        let logits = x.matmul(&self.weights)?.squeeze(1)?.affine(1.0, self.intercept)?;
        let probabilities = logits.neg()?.exp()?.affine(1.0, 1.0)?.recip()?;
        Ok(probabilities.to_dtype(DType::F64)?.to_vec1::<f64>()?)
    }
}
