//! # Segmentation
//!
//! Splits a waveform into consecutive, non-overlapping windows of a fixed duration.
//! The final window keeps whatever is left over, so the segments always cover the
//! whole recording.
//!
//! ## Example:
//! 150 seconds at a 60 second window gives three segments of 60s, 60s and 30s.

use crate::audio::AudioWaveform;
use crate::error::PipelineError;

/// One window of the source recording.
///
/// ## Fields:
/// - `ordinal`: 1-based position in the recording
/// - `start` / `end`: sample offsets into the source (end exclusive)
#[derive(Debug, Clone)]
pub struct Segment {
    pub ordinal: usize,
    pub start: usize,
    pub end: usize,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Label used for files and feature table rows, e.g. `segment_007`.
    pub fn label(&self) -> String {
        segment_label(self.ordinal)
    }
}

/// Zero-padded label for a segment ordinal.
pub fn segment_label(ordinal: usize) -> String {
    format!("segment_{:03}", ordinal)
}

/// Cut `waveform` into windows of `window_seconds`.
///
/// ## Rules:
/// - `window_samples = round(window_seconds * rate)`, at least 1
/// - `count = ceil(total / window_samples)`
/// - the last segment holds `total - (count - 1) * window_samples` samples
///
/// The source waveform is only borrowed.
pub fn segment(waveform: &AudioWaveform, window_seconds: f64) -> Result<Vec<Segment>, PipelineError> {
    if !window_seconds.is_finite() || window_seconds <= 0.0 {
        return Err(PipelineError::InvalidWindow(window_seconds));
    }

    let window_samples = ((window_seconds * waveform.sample_rate() as f64).round() as usize).max(1);
    let samples = waveform.samples();

    let segments = samples
        .chunks(window_samples)
        .enumerate()
        .map(|(index, chunk)| {
            let start = index * window_samples;
            Segment {
                ordinal: index + 1,
                start,
                end: start + chunk.len(),
                sample_rate: waveform.sample_rate(),
                samples: chunk.to_vec(),
            }
        })
        .collect();

    Ok(segments)
}
