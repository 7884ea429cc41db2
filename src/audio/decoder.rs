//! # Audio Decoding
//!
//! Decodes an uploaded recording into a mono `AudioWaveform` using symphonia.
//!
//! ## Rust Concepts:
//! - **Trait objects**: symphonia hands back `Box<dyn FormatReader>` and `Box<dyn Decoder>`,
//!   so one loop handles every container and codec we enable in Cargo.toml
//! - **Newtype with invariants**: `AudioWaveform` can only be built through `new()`,
//!   so every waveform in the program has a positive rate and at least one sample

use crate::error::PipelineError;
use std::fs::File;
use std::path::Path;
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error, formats::FormatOptions,
    io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use tracing::debug;

/// Mono audio samples at a known sample rate.
///
/// ## Invariants:
/// - `sample_rate > 0`
/// - `samples.len() >= 1`
#[derive(Debug, Clone)]
pub struct AudioWaveform {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioWaveform {
    /// Build a waveform, rejecting an empty buffer or a zero sample rate.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self, PipelineError> {
        if sample_rate == 0 {
            return Err(PipelineError::UnreadableInput(
                "sample rate must be greater than 0".to_string(),
            ));
        }
        if samples.is_empty() {
            return Err(PipelineError::UnreadableInput(
                "recording contains no audio samples".to_string(),
            ));
        }
        Ok(Self { samples, sample_rate })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always false for a constructed waveform; kept for API symmetry with `len()`.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode a WAV or MP3 file into a mono waveform.
///
/// Multi-channel audio is averaged frame by frame. Packets that fail to decode
/// mid-stream are skipped; a file that yields no samples at all is an error.
pub fn decode_file(path: &Path) -> Result<AudioWaveform, PipelineError> {
    let (interleaved, sample_rate, channels) = decode_with_symphonia(path)
        .map_err(PipelineError::UnreadableInput)?;

    let mono = downmix(&interleaved, channels);
    debug!(
        path = %path.display(),
        sample_rate,
        channels,
        frames = mono.len(),
        "Decoded upload"
    );
    AudioWaveform::new(mono, sample_rate)
}

/// Average interleaved frames into a single channel.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

fn decode_with_symphonia(path: &Path) -> Result<(Vec<f32>, u32, usize), String> {
    let file = File::open(path).map_err(|err| format!("open {}: {err}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|err| format!("unsupported or corrupt audio container: {err}"))?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| "no audio track found".to_string())?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| "missing sample rate".to_string())?;
    let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|err| format!("unsupported codec: {err}"))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(_)) => break,
            Err(err) => return Err(format!("packet read failed: {err}")),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let audio_buf = match decoder.decode(&packet) {
            Ok(audio_buf) => audio_buf,
            Err(Error::DecodeError(_)) => continue,
            Err(err) => return Err(format!("decode failed: {err}")),
        };
        let spec = *audio_buf.spec();
        channels = spec.channels.count();
        let mut sample_buf = SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(audio_buf);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        return Err("decoded 0 samples".to_string());
    }

    Ok((samples, sample_rate, channels.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, channels: u16, sample_rate: u32, frames: &[Vec<f32>]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for frame in frames {
            for sample in frame {
                writer.write_sample(*sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_waveform_invariants() {
        assert!(AudioWaveform::new(vec![], 16000).is_err());
        assert!(AudioWaveform::new(vec![0.0], 0).is_err());
        let waveform = AudioWaveform::new(vec![0.0; 8000], 16000).unwrap();
        assert_eq!(waveform.duration_seconds(), 0.5);
    }

    #[test]
    fn test_downmix_averages_channels() {
        let mono = downmix(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_decode_stereo_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let frames: Vec<Vec<f32>> = (0..800).map(|_| vec![0.25, 0.75]).collect();
        write_wav(&path, 2, 8000, &frames);

        let waveform = decode_file(&path).unwrap();
        assert_eq!(waveform.sample_rate(), 8000);
        assert_eq!(waveform.len(), 800);
        assert!((waveform.samples()[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_garbage_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not a riff header").unwrap();
        assert!(matches!(decode_file(&path), Err(PipelineError::UnreadableInput(_))));
    }
}
