//! Reduces per-segment probabilities to one decision.

use crate::error::PipelineError;
use crate::pipeline::events::PredictionResult;

/// Mean of the probabilities; `>= 0.5` is positive.
pub fn reduce(probabilities: &[f64]) -> Result<PredictionResult, PipelineError> {
    if probabilities.is_empty() {
        return Err(PipelineError::NoUsableSegments);
    }
    let mean = probabilities.iter().sum::<f64>() / probabilities.len() as f64;
    Ok(PredictionResult::from_probability(mean.clamp(0.0, 1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::events::Label;

    #[test]
    fn test_mean_of_segments() {
        let result = reduce(&[0.9, 0.8, 0.95]).unwrap();
        assert_eq!(result.label(), Some(Label::Positive));
        assert!((result.percentage() - 88.333_333).abs() < 1e-4);
    }

    #[test]
    fn test_threshold_boundaries() {
        assert_eq!(reduce(&[0.5]).unwrap().label(), Some(Label::Positive));
        assert_eq!(reduce(&[0.499_999]).unwrap().label(), Some(Label::Negative));
        assert_eq!(reduce(&[1.0]).unwrap().percentage(), 100.0);
        assert_eq!(reduce(&[0.0]).unwrap().percentage(), 0.0);
        assert_eq!(reduce(&[0.4, 0.6]).unwrap().label(), Some(Label::Positive));
    }

    #[test]
    fn test_empty_is_no_usable_segments() {
        assert!(matches!(reduce(&[]), Err(PipelineError::NoUsableSegments)));
    }
}
