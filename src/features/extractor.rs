//! # Feature Extractor
//!
//! `FeatureExtractor` is the seam between the pipeline and whatever computes acoustic
//! features. The pipeline only relies on three things: the extractor's configuration
//! (so it can check the canonical rate and feature set up front), a stable schema of
//! feature names, and a per-segment `extract` call.
//!
//! ## Rust Concepts:
//! - **Trait objects (`Arc<dyn FeatureExtractor>`)**: one extractor instance is built at
//!   startup and shared by every run
//! - **Send + Sync bounds**: required because runs execute on tokio's blocking pool

use crate::audio::ResampledSegment;
use crate::features::descriptors::{
    equivalent_sound_level, functionals, FrameAnalyzer, DESCRIPTORS, EQUIVALENT_SOUND_LEVEL,
    FUNCTIONALS,
};
use crate::features::{FeatureSchema, FeatureVector, COMPACT_FUNCTIONALS_V1, FUNCTIONALS_LEVEL};
use std::sync::Arc;

/// Identity of an extractor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    pub feature_set: String,
    pub level: String,
    pub sample_rate: u32,
    pub frame_seconds: f64,
    pub hop_seconds: f64,
}

impl ExtractorConfig {
    /// The built-in configuration: 25 ms frames, 10 ms hop.
    pub fn compact_functionals(sample_rate: u32) -> Self {
        Self {
            feature_set: COMPACT_FUNCTIONALS_V1.to_string(),
            level: FUNCTIONALS_LEVEL.to_string(),
            sample_rate,
            frame_seconds: 0.025,
            hop_seconds: 0.010,
        }
    }
}

/// Per-segment extraction failures. The aggregator logs and skips these.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error("segment {ordinal} has {samples} samples, at least {required} are needed")]
    TooShort { ordinal: usize, samples: usize, required: usize },

    #[error("segment {ordinal} is at {actual} Hz, extractor expects {expected} Hz")]
    RateMismatch { ordinal: usize, expected: u32, actual: u32 },

    #[error("segment {ordinal} produced a non-finite value for {feature}")]
    NonFinite { ordinal: usize, feature: String },
}

/// Maps a fixed-rate segment to a fixed-length feature vector.
pub trait FeatureExtractor: Send + Sync {
    fn config(&self) -> &ExtractorConfig;

    /// Names of the produced features; identical for every call.
    fn feature_schema(&self) -> Arc<FeatureSchema>;

    fn extract(&self, segment: &ResampledSegment) -> Result<FeatureVector, ExtractionError>;
}

/// Built-in extractor producing `compact-functionals-v1`.
///
/// Five frame-level descriptors, six functionals each, plus the equivalent sound level:
/// 31 features per segment.
#[derive(Debug)]
pub struct FunctionalsExtractor {
    config: ExtractorConfig,
    schema: Arc<FeatureSchema>,
    analyzer: FrameAnalyzer,
}

impl FunctionalsExtractor {
    pub fn new(sample_rate: u32) -> Self {
        let config = ExtractorConfig::compact_functionals(sample_rate);
        let frame_len = (config.frame_seconds * sample_rate as f64).round() as usize;
        let hop_len = (config.hop_seconds * sample_rate as f64).round() as usize;
        Self {
            schema: Arc::new(FeatureSchema::new(&config.feature_set, Self::feature_names())),
            analyzer: FrameAnalyzer::new(sample_rate, frame_len, hop_len),
            config,
        }
    }

    /// `{descriptor}_{functional}` for every pair, then the equivalent sound level.
    pub fn feature_names() -> Vec<String> {
        DESCRIPTORS
            .iter()
            .flat_map(|lld| FUNCTIONALS.iter().map(move |f| format!("{}_{}", lld, f)))
            .chain(std::iter::once(EQUIVALENT_SOUND_LEVEL.to_string()))
            .collect()
    }

    /// Minimum number of samples a segment needs (one whole frame).
    pub fn min_samples(&self) -> usize {
        self.analyzer.frame_len()
    }
}

impl FeatureExtractor for FunctionalsExtractor {
    fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    fn feature_schema(&self) -> Arc<FeatureSchema> {
        Arc::clone(&self.schema)
    }

    fn extract(&self, segment: &ResampledSegment) -> Result<FeatureVector, ExtractionError> {
        if segment.sample_rate != self.config.sample_rate {
            return Err(ExtractionError::RateMismatch {
                ordinal: segment.ordinal,
                expected: self.config.sample_rate,
                actual: segment.sample_rate,
            });
        }
        if segment.samples.len() < self.min_samples() {
            return Err(ExtractionError::TooShort {
                ordinal: segment.ordinal,
                samples: segment.samples.len(),
                required: self.min_samples(),
            });
        }

        let series = self.analyzer.analyze(&segment.samples);
        let mut values = Vec::with_capacity(self.schema.len());
        for descriptor in series.in_order() {
            values.extend_from_slice(&functionals(descriptor));
        }
        values.push(equivalent_sound_level(&series.mean_square));

        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(ExtractionError::NonFinite {
                ordinal: segment.ordinal,
                feature: self.schema.names()[index].clone(),
            });
        }

        FeatureVector::new(segment.ordinal, Arc::clone(&self.schema), values).ok_or_else(|| {
            ExtractionError::NonFinite {
                ordinal: segment.ordinal,
                feature: "<schema length>".to_string(),
            }
        })
    }
}
