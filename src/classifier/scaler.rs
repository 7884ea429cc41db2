//! Standard scaler applied before classification.

use crate::error::PipelineError;
use crate::features::schema::describe_column_difference;
use crate::features::FeatureTable;
use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

/// On-disk form of a fitted scaler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub feature_names: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// Fitted per-column standardisation.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    feature_names: Vec<String>,
    mean: Tensor,
    scale: Tensor,
    device: Device,
    dtype: DType,
}

impl StandardScaler {
    /// Build a scaler on `device`.
    ///
    /// A zero scale (a constant column at fit time) is treated as 1 so the column passes
    /// through centred instead of dividing by zero.
    pub fn from_artifact(artifact: ScalerArtifact, device: &Device, dtype: DType) -> Result<Self, PipelineError> {
        let n = artifact.feature_names.len();
        if n == 0 {
            return Err(PipelineError::ModelLoad("scaler has no features".to_string()));
        }
        if artifact.mean.len() != n || artifact.scale.len() != n {
            return Err(PipelineError::ModelLoad(format!(
                "scaler has {} names but {} means and {} scales",
                n,
                artifact.mean.len(),
                artifact.scale.len()
            )));
        }
        if artifact.mean.iter().chain(&artifact.scale).any(|v| !v.is_finite()) {
            return Err(PipelineError::ModelLoad("scaler contains non-finite statistics".to_string()));
        }

        let scale: Vec<f64> = artifact
            .scale
            .iter()
            .map(|&s| if s == 0.0 { 1.0 } else { s })
            .collect();

        let to_row = |values: Vec<f64>| -> Result<Tensor, PipelineError> {
            Tensor::from_vec(values, (1, n), device)
                .and_then(|t| t.to_dtype(dtype))
                .map_err(|e| PipelineError::ModelLoad(e.to_string()))
        };

        Ok(Self {
            mean: to_row(artifact.mean)?,
            scale: to_row(scale)?,
            feature_names: artifact.feature_names,
            device: device.clone(),
            dtype,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Standardise every row of `table`.
    pub fn transform(&self, table: &FeatureTable) -> Result<Tensor, PipelineError> {
        if let Some(difference) = describe_column_difference(&self.feature_names, table.column_names()) {
            return Err(PipelineError::SchemaMismatch(format!(
                "feature table does not match the fitted scaler: {}",
                difference
            )));
        }

        let x = Tensor::from_vec(table.to_flat(), (table.n_rows(), table.n_cols()), &self.device)?
            .to_dtype(self.dtype)?;
        Ok(x.broadcast_sub(&self.mean)?.broadcast_div(&self.scale)?)
    }
}
