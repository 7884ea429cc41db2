//! # Acoustic Feature Extraction
//!
//! Turns each resampled segment into one fixed-length vector of named features, then
//! gathers those vectors into a `FeatureTable` that the classifier consumes.
//!
//! ## Key Components:
//! - **FeatureSchema / FeatureVector**: ordered feature names and the values that follow them
//! - **FeatureExtractor**: the seam for pluggable extractors, plus the built-in
//!   `FunctionalsExtractor`
//! - **descriptors**: frame-level measurements and the statistics computed over them
//! - **FeatureAggregator**: collects per-segment results into one table, skipping failures
//!
//! ## Feature naming:
//! Built-in names follow `{descriptor}_{functional}`, for example
//! `spectral_centroid_hz_pctl50`. The fitted scaler stores the same names, and the
//! classifier refuses a table whose columns differ from them in name or order.

pub mod aggregator;
pub mod descriptors;
pub mod extractor;
pub mod schema;

/// Identifier of the built-in feature set.
pub const COMPACT_FUNCTIONALS_V1: &str = "compact-functionals-v1";

/// Only level the built-in extractor produces: one row of statistics per segment.
pub const FUNCTIONALS_LEVEL: &str = "functionals";

pub use aggregator::{aggregate, FeatureTable};
pub use extractor::{ExtractionError, ExtractorConfig, FeatureExtractor, FunctionalsExtractor};
pub use schema::{FeatureSchema, FeatureVector};
