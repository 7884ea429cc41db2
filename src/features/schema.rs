//! Feature names and the vectors that carry values for them.

use std::sync::Arc;

/// Ordered list of feature names produced by one extractor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    set_id: String,
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(set_id: impl Into<String>, names: Vec<String>) -> Self {
        Self { set_id: set_id.into(), names }
    }

    pub fn set_id(&self) -> &str {
        &self.set_id
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Human-readable description of the first column that differs, if any.
    pub fn describe_difference(&self, names: &[String]) -> Option<String> {
        describe_column_difference(&self.names, names)
    }
}

/// Describe how `found` differs from `expected`, or `None` when they are identical.
pub fn describe_column_difference(expected: &[String], found: &[String]) -> Option<String> {
    if expected.len() != found.len() {
        return Some(format!(
            "expected {} features, found {}",
            expected.len(),
            found.len()
        ));
    }
    expected
        .iter()
        .zip(found)
        .position(|(a, b)| a != b)
        .map(|index| {
            format!(
                "column {} is '{}' but '{}' was expected",
                index, found[index], expected[index]
            )
        })
}

/// Values for one segment, in schema order.
///
/// ## Invariant:
/// `values.len() == schema.len()`; `new()` rejects anything else.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    pub ordinal: usize,
    schema: Arc<FeatureSchema>,
    values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(ordinal: usize, schema: Arc<FeatureSchema>, values: Vec<f64>) -> Option<Self> {
        (values.len() == schema.len()).then_some(Self { ordinal, schema, values })
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_vector_length_must_match_schema() {
        let schema = Arc::new(FeatureSchema::new("test", names(&["a", "b"])));
        assert!(FeatureVector::new(1, schema.clone(), vec![1.0, 2.0]).is_some());
        assert!(FeatureVector::new(1, schema, vec![1.0]).is_none());
    }

    #[test]
    fn test_describe_difference() {
        let schema = FeatureSchema::new("test", names(&["a", "b", "c"]));
        assert!(schema.describe_difference(&names(&["a", "b", "c"])).is_none());
        assert!(schema.describe_difference(&names(&["a", "b"])).unwrap().contains("expected 3"));
        let reordered = schema.describe_difference(&names(&["a", "c", "b"])).unwrap();
        assert!(reordered.contains("column 1"));
    }
}
