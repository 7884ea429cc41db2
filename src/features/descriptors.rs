//! # Frame Descriptors and Functionals
//!
//! Low-level descriptors (LLDs) are measured on short overlapping frames. Functionals
//! summarise each descriptor's series over the whole segment.
//!
//! ## Descriptors:
//! - **loudness_db**: frame energy in dB (mean square, floored)
//! - **zcr**: fraction of adjacent sample pairs that change sign
//! - **spectral_centroid_hz**: magnitude-weighted mean frequency
//! - **spectral_rolloff85_hz**: frequency below which 85% of spectral energy lies
//! - **spectral_flux**: L2 distance between consecutive normalised magnitude spectra
//!
//! ## Functionals:
//! mean, normalised standard deviation (coefficient of variation), 20th/50th/80th
//! percentiles and the 20-80 percentile range.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Descriptor names, in output order.
pub const DESCRIPTORS: [&str; 5] = [
    "loudness_db",
    "zcr",
    "spectral_centroid_hz",
    "spectral_rolloff85_hz",
    "spectral_flux",
];

/// Functional names, in output order.
pub const FUNCTIONALS: [&str; 6] = [
    "amean",
    "stddev_norm",
    "pctl20",
    "pctl50",
    "pctl80",
    "pctl_range_20_80",
];

/// Segment-level feature appended after the functionals.
pub const EQUIVALENT_SOUND_LEVEL: &str = "equivalent_sound_level_db";

const ENERGY_FLOOR: f64 = 1e-10;
const ROLLOFF_FRACTION: f64 = 0.85;

/// Per-frame descriptor series for one segment.
#[derive(Debug, Default, Clone)]
pub struct DescriptorSeries {
    pub loudness_db: Vec<f64>,
    pub zcr: Vec<f64>,
    pub centroid_hz: Vec<f64>,
    pub rolloff_hz: Vec<f64>,
    pub flux: Vec<f64>,
    /// Mean square of each frame, kept for the equivalent sound level
    pub mean_square: Vec<f64>,
}

impl DescriptorSeries {
    /// Series in `DESCRIPTORS` order.
    pub fn in_order(&self) -> [&[f64]; 5] {
        [
            &self.loudness_db,
            &self.zcr,
            &self.centroid_hz,
            &self.rolloff_hz,
            &self.flux,
        ]
    }

    pub fn frame_count(&self) -> usize {
        self.loudness_db.len()
    }
}

/// Frames a signal and measures every descriptor.
///
/// ## Rust Concepts:
/// - **Arc<dyn Fft<f32>>**: the planned FFT is shared and thread-safe, so one analyzer
///   can serve every run at once
/// - **Stateless `analyze(&self)`**: scratch buffers are allocated per call instead of
///   stored, which keeps the analyzer `Sync` without a lock
pub struct FrameAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    frame_len: usize,
    hop_len: usize,
    sample_rate: u32,
    window: Vec<f32>,
}

impl std::fmt::Debug for FrameAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAnalyzer")
            .field("fft_size", &self.fft_size)
            .field("frame_len", &self.frame_len)
            .field("hop_len", &self.hop_len)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl FrameAnalyzer {
    /// Frame and hop lengths are given in samples; both are at least 1.
    pub fn new(sample_rate: u32, frame_len: usize, hop_len: usize) -> Self {
        let frame_len = frame_len.max(1);
        let hop_len = hop_len.max(1);
        let fft_size = frame_len.next_power_of_two();
        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        // Periodic Hann over the frame; the FFT tail is zero-padded.
        let window = (0..frame_len)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / frame_len as f32).cos()))
            .collect();

        Self {
            fft,
            fft_size,
            frame_len,
            hop_len,
            sample_rate,
            window,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn hop_len(&self) -> usize {
        self.hop_len
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of whole frames that fit in `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        if len < self.frame_len {
            0
        } else {
            (len - self.frame_len) / self.hop_len + 1
        }
    }

    pub fn analyze(&self, samples: &[f32]) -> DescriptorSeries {
        let frames = self.frame_count(samples.len());
        let num_bins = self.fft_size / 2 + 1;
        let bin_hz = self.sample_rate as f64 / self.fft_size as f64;

        let mut series = DescriptorSeries::default();
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.fft_size];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];
        let mut previous: Option<Vec<f64>> = None;

        for frame_idx in 0..frames {
            let start = frame_idx * self.hop_len;
            let frame = &samples[start..start + self.frame_len];

            let mean_square =
                frame.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / frame.len() as f64;
            series.mean_square.push(mean_square);
            series.loudness_db.push(10.0 * (mean_square + ENERGY_FLOOR).log10());
            series.zcr.push(zero_crossing_rate(frame));

            for (slot, (sample, w)) in buffer.iter_mut().zip(frame.iter().zip(&self.window)) {
                *slot = Complex::new(sample * w, 0.0);
            }
            for slot in buffer.iter_mut().skip(self.frame_len) {
                *slot = Complex::new(0.0, 0.0);
            }
            self.fft.process_with_scratch(&mut buffer, &mut scratch);

            let magnitudes: Vec<f64> = buffer[..num_bins]
                .iter()
                .map(|c| ((c.re * c.re + c.im * c.im) as f64).sqrt())
                .collect();

            series.centroid_hz.push(spectral_centroid(&magnitudes, bin_hz));
            series.rolloff_hz.push(spectral_rolloff(&magnitudes, bin_hz, ROLLOFF_FRACTION));

            let normalised = normalise(&magnitudes);
            let flux = match &previous {
                Some(prev) => prev
                    .iter()
                    .zip(&normalised)
                    .map(|(a, b)| (b - a) * (b - a))
                    .sum::<f64>()
                    .sqrt(),
                None => 0.0,
            };
            series.flux.push(flux);
            previous = Some(normalised);
        }

        series
    }
}

fn zero_crossing_rate(frame: &[f32]) -> f64 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();
    crossings as f64 / (frame.len() - 1) as f64
}

fn spectral_centroid(magnitudes: &[f64], bin_hz: f64) -> f64 {
    let total: f64 = magnitudes.iter().sum();
    if total <= ENERGY_FLOOR {
        return 0.0;
    }
    magnitudes
        .iter()
        .enumerate()
        .map(|(k, m)| k as f64 * bin_hz * m)
        .sum::<f64>()
        / total
}

fn spectral_rolloff(magnitudes: &[f64], bin_hz: f64, fraction: f64) -> f64 {
    let total: f64 = magnitudes.iter().map(|m| m * m).sum();
    if total <= ENERGY_FLOOR {
        return 0.0;
    }
    let threshold = total * fraction;
    let mut cumulative = 0.0;
    for (k, m) in magnitudes.iter().enumerate() {
        cumulative += m * m;
        if cumulative >= threshold {
            return k as f64 * bin_hz;
        }
    }
    (magnitudes.len().saturating_sub(1)) as f64 * bin_hz
}

fn normalise(magnitudes: &[f64]) -> Vec<f64> {
    let total: f64 = magnitudes.iter().sum();
    if total <= ENERGY_FLOOR {
        return vec![0.0; magnitudes.len()];
    }
    magnitudes.iter().map(|m| m / total).collect()
}

/// The six functionals of one series, in `FUNCTIONALS` order.
///
/// An empty series yields zeros.
pub fn functionals(values: &[f64]) -> [f64; 6] {
    if values.is_empty() {
        return [0.0; 6];
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let stddev_norm = if mean.abs() > ENERGY_FLOOR {
        variance.sqrt() / mean.abs()
    } else {
        0.0
    };

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let p20 = percentile(&sorted, 0.20);
    let p50 = percentile(&sorted, 0.50);
    let p80 = percentile(&sorted, 0.80);

    [mean, stddev_norm, p20, p50, p80, p80 - p20]
}

/// Linear-interpolated percentile of an ascending, non-empty slice.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let position = q.clamp(0.0, 1.0) * (len - 1) as f64;
            let lower = position.floor() as usize;
            let upper = position.ceil() as usize;
            let weight = position - lower as f64;
            sorted[lower] * (1.0 - weight) + sorted[upper] * weight
        }
    }
}

/// Energy-averaged level across all frames, in dB.
pub fn equivalent_sound_level(mean_square: &[f64]) -> f64 {
    if mean_square.is_empty() {
        return 10.0 * ENERGY_FLOOR.log10();
    }
    let mean = mean_square.iter().sum::<f64>() / mean_square.len() as f64;
    10.0 * (mean + ENERGY_FLOOR).log10()
}
