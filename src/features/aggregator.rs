//! # Feature Aggregation
//!
//! Collects per-segment extraction results into one `FeatureTable`.
//!
//! ## Rules:
//! - failed segments are skipped with a warning, never fatal on their own
//! - zero usable rows fails the run with `NoUsableSegments`
//! - every row must share the first row's schema
//! - rows are ordered by segment ordinal and labelled `segment_NNN`

use crate::audio::segmenter::segment_label;
use crate::error::PipelineError;
use crate::features::{ExtractionError, FeatureSchema, FeatureVector};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Feature vectors of one run, indexed by segment.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    schema: Arc<FeatureSchema>,
    ordinals: Vec<usize>,
    labels: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl FeatureTable {
    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn column_names(&self) -> &[String] {
        self.schema.names()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn ordinals(&self) -> &[usize] {
        &self.ordinals
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.schema.len()
    }

    /// Row-major copy of every value, ready for a `[rows, cols]` tensor.
    pub fn to_flat(&self) -> Vec<f64> {
        self.rows.iter().flatten().copied().collect()
    }

    /// Persist as CSV with header `segment,<feature names...>`.
    pub fn write_csv(&self, path: &Path) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        let mut out = std::io::BufWriter::new(file);

        write!(out, "segment")?;
        for name in self.schema.names() {
            write!(out, ",{}", name)?;
        }
        writeln!(out)?;

        for (label, row) in self.labels.iter().zip(&self.rows) {
            write!(out, "{}", label)?;
            for value in row {
                write!(out, ",{}", value)?;
            }
            writeln!(out)?;
        }

        out.flush()
    }
}

/// Build a table from `(ordinal, result)` pairs in any order.
pub fn aggregate(
    results: Vec<(usize, Result<FeatureVector, ExtractionError>)>,
) -> Result<FeatureTable, PipelineError> {
    let mut usable: Vec<FeatureVector> = Vec::with_capacity(results.len());
    for (ordinal, result) in results {
        match result {
            Ok(vector) => usable.push(vector),
            Err(error) => warn!(ordinal, %error, "Skipping segment after feature extraction failure"),
        }
    }

    usable.sort_by_key(|vector| vector.ordinal);

    let schema = match usable.first() {
        Some(first) => Arc::clone(first.schema()),
        None => return Err(PipelineError::NoUsableSegments),
    };

    let mut table = FeatureTable {
        schema,
        ordinals: Vec::with_capacity(usable.len()),
        labels: Vec::with_capacity(usable.len()),
        rows: Vec::with_capacity(usable.len()),
    };

    for vector in usable {
        if !Arc::ptr_eq(vector.schema(), &table.schema) && **vector.schema() != *table.schema {
            let detail = table
                .schema
                .describe_difference(vector.schema().names())
                .unwrap_or_else(|| format!("feature set '{}' differs", vector.schema().set_id()));
            return Err(PipelineError::SchemaMismatch(format!(
                "segment {}: {}",
                vector.ordinal, detail
            )));
        }
        table.ordinals.push(vector.ordinal);
        table.labels.push(segment_label(vector.ordinal));
        table.rows.push(vector.into_values());
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(names: &[&str]) -> Arc<FeatureSchema> {
        Arc::new(FeatureSchema::new(
            "test",
            names.iter().map(|s| s.to_string()).collect(),
        ))
    }

    fn vector(ordinal: usize, schema: &Arc<FeatureSchema>, value: f64) -> FeatureVector {
        FeatureVector::new(ordinal, Arc::clone(schema), vec![value; schema.len()]).unwrap()
    }

    fn too_short(ordinal: usize) -> ExtractionError {
        ExtractionError::TooShort { ordinal, samples: 1, required: 400 }
    }

    #[test]
    fn test_rows_sorted_and_labelled() {
        let s = schema(&["a", "b"]);
        let table = aggregate(vec![
            (3, Ok(vector(3, &s, 3.0))),
            (1, Ok(vector(1, &s, 1.0))),
            (2, Ok(vector(2, &s, 2.0))),
        ])
        .unwrap();

        assert_eq!(table.labels(), &["segment_001", "segment_002", "segment_003"]);
        assert_eq!(table.to_flat(), vec![1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_failed_segments_are_skipped() {
        let s = schema(&["a"]);
        let table = aggregate(vec![
            (1, Ok(vector(1, &s, 1.0))),
            (2, Err(too_short(2))),
            (3, Ok(vector(3, &s, 3.0))),
        ])
        .unwrap();
        assert_eq!(table.ordinals(), &[1, 3]);
    }

    #[test]
    fn test_all_failed_is_no_usable_segments() {
        let result = aggregate(vec![(1, Err(too_short(1))), (2, Err(too_short(2)))]);
        assert!(matches!(result, Err(PipelineError::NoUsableSegments)));
        assert!(matches!(aggregate(vec![]), Err(PipelineError::NoUsableSegments)));
    }

    #[test]
    fn test_mixed_schemas_rejected() {
        let a = schema(&["a", "b"]);
        let b = schema(&["a", "c"]);
        let result = aggregate(vec![(1, Ok(vector(1, &a, 1.0))), (2, Ok(vector(2, &b, 1.0)))]);
        assert!(matches!(result, Err(PipelineError::SchemaMismatch(_))));
    }

    #[test]
    fn test_write_csv() {
        let s = schema(&["a", "b"]);
        let table = aggregate(vec![(1, Ok(vector(1, &s, 0.5)))]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");
        table.write_csv(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "segment,a,b\nsegment_001,0.5,0.5\n");
    }
}
