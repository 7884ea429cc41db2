//! # Model Artifacts
//!
//! Loads the fitted scaler and classifier from disk once at startup and checks that they
//! agree with each other. The result is wrapped in an `Arc` and shared by every run; it
//! is never mutated after loading.
//!
//! ## Load-time checks:
//! - both files exist and parse as JSON
//! - the scaler's statistics line up with its feature names
//! - the classifier has one coefficient per scaler feature
//! - if the classifier lists feature names, they equal the scaler's exactly

use crate::classifier::{
    model::{ClassifierArtifact, LogisticRegression},
    scaler::{ScalerArtifact, StandardScaler},
    Classifier, ScaledTable,
};
use crate::config::ModelsConfig;
use crate::device::{create_device_from_string, device_label};
use crate::error::PipelineError;
use crate::features::schema::describe_column_difference;
use crate::features::FeatureTable;
use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Summary served by the model status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub feature_count: usize,
    pub device: String,
    pub scaler_path: Option<String>,
    pub classifier_path: Option<String>,
    pub loaded_at: String,
}

/// The loaded scaler and model pair.
#[derive(Debug)]
pub struct ModelArtifacts {
    scaler: StandardScaler,
    model: LogisticRegression,
    info: ModelInfo,
}

impl ModelArtifacts {
    /// Read both artifacts from the paths in `config`.
    pub fn load(config: &ModelsConfig) -> Result<Self, PipelineError> {
        let scaler: ScalerArtifact = read_json(Path::new(&config.scaler_path))?;
        let classifier: ClassifierArtifact = read_json(Path::new(&config.classifier_path))?;
        let device = create_device_from_string(&config.device);

        let mut artifacts = Self::from_parts(scaler, classifier, &device)?;
        artifacts.info.scaler_path = Some(config.scaler_path.clone());
        artifacts.info.classifier_path = Some(config.classifier_path.clone());

        info!(
            features = artifacts.info.feature_count,
            device = %artifacts.info.device,
            scaler = %config.scaler_path,
            classifier = %config.classifier_path,
            "Loaded model artifacts"
        );
        Ok(artifacts)
    }

    /// Build from already-parsed artifacts.
    pub fn from_parts(
        scaler: ScalerArtifact,
        classifier: ClassifierArtifact,
        device: &Device,
    ) -> Result<Self, PipelineError> {
        // Metal has no f64 kernels
        let dtype = if device.is_metal() { DType::F32 } else { DType::F64 };

        if let Some(names) = &classifier.feature_names {
            if let Some(difference) = describe_column_difference(&scaler.feature_names, names) {
                return Err(PipelineError::ModelLoad(format!(
                    "classifier and scaler disagree on features: {}",
                    difference
                )));
            }
        }

        let model = LogisticRegression::from_artifact(&classifier, device, dtype)?;
        let scaler = StandardScaler::from_artifact(scaler, device, dtype)?;
        if model.n_features() != scaler.feature_names().len() {
            return Err(PipelineError::ModelLoad(format!(
                "classifier has {} coefficients but the scaler has {} features",
                model.n_features(),
                scaler.feature_names().len()
            )));
        }

        let info = ModelInfo {
            model_type: classifier.model_type,
            feature_count: model.n_features(),
            device: device_label(device),
            scaler_path: None,
            classifier_path: None,
            loaded_at: chrono::Utc::now().to_rfc3339(),
        };

        Ok(Self { scaler, model, info })
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }
}

impl Classifier for ModelArtifacts {
    fn schema(&self) -> &[String] {
        self.scaler.feature_names()
    }

    fn scale(&self, table: &FeatureTable) -> Result<ScaledTable, PipelineError> {
        let values = self.scaler.transform(table)?;
        Ok(ScaledTable::new(table.labels().to_vec(), values))
    }

    fn predict_probabilities(&self, scaled: &ScaledTable) -> Result<Vec<f64>, PipelineError> {
        self.model.predict_proba(scaled.values())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::ModelLoad(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&contents)
        .map_err(|e| PipelineError::ModelLoad(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::model::LOGISTIC_REGRESSION;
    use crate::features::{aggregate, FeatureSchema, FeatureVector};
    use std::sync::Arc;

    fn names() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    fn scaler() -> ScalerArtifact {
        ScalerArtifact { feature_names: names(), mean: vec![0.0, 0.0], scale: vec![1.0, 1.0] }
    }

    fn classifier(coefficients: Vec<f64>, feature_names: Option<Vec<String>>) -> ClassifierArtifact {
        ClassifierArtifact {
            model_type: LOGISTIC_REGRESSION.to_string(),
            feature_names,
            coefficients,
            intercept: 0.0,
        }
    }

    #[test]
    fn test_scale_then_predict() {
        let artifacts = ModelArtifacts::from_parts(scaler(), classifier(vec![1.0, 1.0], Some(names())), &Device::Cpu).unwrap();
        let schema = Arc::new(FeatureSchema::new("test", names()));
        let table = aggregate(vec![
            (1, Ok(FeatureVector::new(1, schema.clone(), vec![0.0, 0.0]).unwrap())),
            (2, Ok(FeatureVector::new(2, schema, vec![10.0, 10.0]).unwrap())),
        ])
        .unwrap();

        let scaled = artifacts.scale(&table).unwrap();
        assert_eq!(scaled.labels(), &["segment_001", "segment_002"]);
        let p = artifacts.predict_probabilities(&scaled).unwrap();
        assert!((p[0] - 0.5).abs() < 1e-12);
        assert!(p[1] > 0.99);
    }

    #[test]
    fn test_coefficient_count_must_match_scaler() {
        let result = ModelArtifacts::from_parts(scaler(), classifier(vec![1.0], None), &Device::Cpu);
        assert!(matches!(result, Err(PipelineError::ModelLoad(_))));
    }

    #[test]
    fn test_classifier_feature_names_must_match_scaler() {
        let reversed = vec!["b".to_string(), "a".to_string()];
        let result = ModelArtifacts::from_parts(scaler(), classifier(vec![1.0, 1.0], Some(reversed)), &Device::Cpu);
        assert!(matches!(result, Err(PipelineError::ModelLoad(_))));
    }

    #[test]
    fn test_load_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let scaler_path = dir.path().join("scaler.json");
        let classifier_path = dir.path().join("classifier.json");
        let config = ModelsConfig {
            scaler_path: scaler_path.display().to_string(),
            classifier_path: classifier_path.display().to_string(),
            device: "cpu".to_string(),
        };

        assert!(matches!(ModelArtifacts::load(&config), Err(PipelineError::ModelLoad(_))));

        std::fs::write(&scaler_path, serde_json::to_string(&scaler()).unwrap()).unwrap();
        std::fs::write(&classifier_path, "{ not json").unwrap();
        assert!(matches!(ModelArtifacts::load(&config), Err(PipelineError::ModelLoad(_))));

        std::fs::write(&classifier_path, serde_json::to_string(&classifier(vec![0.3, -0.2], None)).unwrap()).unwrap();
        let artifacts = ModelArtifacts::load(&config).unwrap();
        assert_eq!(artifacts.info().feature_count, 2);
        assert_eq!(artifacts.info().device, "CPU");
    }

    #[test]
    fn test_bundled_artifacts_match_builtin_extractor() {
        let artifacts = ModelArtifacts::load(&crate::config::AppConfig::default().models).unwrap();
        assert_eq!(artifacts.schema(), crate::features::FunctionalsExtractor::feature_names().as_slice());
    }
}
