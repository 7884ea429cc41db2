//! # Resampling
//!
//! Converts a segment to the canonical sample rate with rubato's sinc interpolator.
//!
//! ## Length contract:
//! The output always holds exactly `round(len * target / source)` samples. The sinc
//! filter delays and pads its output, so the result is truncated or zero-padded at the
//! tail to hit that length.

use crate::audio::Segment;
use crate::error::PipelineError;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const CHUNK_SIZE: usize = 1024;

/// A segment's samples at the canonical rate.
#[derive(Debug, Clone)]
pub struct ResampledSegment {
    pub ordinal: usize,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl ResampledSegment {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Expected output length when converting `input_len` samples between rates.
pub fn expected_len(input_len: usize, source_rate: u32, target_rate: u32) -> usize {
    (input_len as f64 * target_rate as f64 / source_rate as f64).round() as usize
}

/// Resample `segment` to `target_rate`.
///
/// A segment already at the target rate is copied unchanged.
pub fn resample(segment: &Segment, target_rate: u32) -> Result<ResampledSegment, PipelineError> {
    let fail = |reason: String| PipelineError::Resample { ordinal: segment.ordinal, reason };

    if target_rate == 0 || segment.sample_rate == 0 {
        return Err(fail("sample rates must be greater than 0".to_string()));
    }

    if segment.sample_rate == target_rate {
        return Ok(ResampledSegment {
            ordinal: segment.ordinal,
            sample_rate: target_rate,
            samples: segment.samples.clone(),
        });
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = target_rate as f64 / segment.sample_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1)
        .map_err(|e| fail(format!("failed to create resampler: {}", e)))?;

    let expected = expected_len(segment.samples.len(), segment.sample_rate, target_rate);
    let mut output = Vec::with_capacity(expected + CHUNK_SIZE);

    for chunk in segment.samples.chunks(CHUNK_SIZE) {
        let mut block = chunk.to_vec();
        block.resize(CHUNK_SIZE, 0.0);
        let resampled = resampler
            .process(&[block], None)
            .map_err(|e| fail(format!("resample failed: {}", e)))?;
        if let Some(channel) = resampled.first() {
            output.extend_from_slice(channel);
        }
    }

    output.resize(expected, 0.0);

    Ok(ResampledSegment {
        ordinal: segment.ordinal,
        sample_rate: target_rate,
        samples: output,
    })
}
