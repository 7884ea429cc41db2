//! # Segment Store
//!
//! Persists segments inside a run workspace and reads them back:
//!
//! ```text
//! <run dir>/split/segment_001.wav      original rate
//! <run dir>/resampled/segment_001.wav  canonical rate
//! ```
//!
//! Files are 32-bit float mono WAVs written with hound. They live only as long as the
//! run workspace and are removed with it.

use crate::audio::segmenter::segment_label;
use crate::audio::{ResampledSegment, Segment};
use crate::error::PipelineError;
use std::path::{Path, PathBuf};

const SPLIT_DIR: &str = "split";
const RESAMPLED_DIR: &str = "resampled";

/// Reads and writes per-segment WAV files under one run directory.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    split_dir: PathBuf,
    resampled_dir: PathBuf,
}

impl SegmentStore {
    /// Create the `split/` and `resampled/` directories under `root`.
    pub fn create(root: &Path) -> Result<Self, PipelineError> {
        let split_dir = root.join(SPLIT_DIR);
        let resampled_dir = root.join(RESAMPLED_DIR);
        std::fs::create_dir_all(&split_dir)?;
        std::fs::create_dir_all(&resampled_dir)?;
        Ok(Self { split_dir, resampled_dir })
    }

    pub fn split_path(&self, ordinal: usize) -> PathBuf {
        self.split_dir.join(format!("{}.wav", segment_label(ordinal)))
    }

    pub fn resampled_path(&self, ordinal: usize) -> PathBuf {
        self.resampled_dir.join(format!("{}.wav", segment_label(ordinal)))
    }

    /// Write a segment at its original rate. Returns the file path.
    pub fn write_split(&self, segment: &Segment) -> Result<PathBuf, PipelineError> {
        let path = self.split_path(segment.ordinal);
        write_wav(&path, segment.sample_rate, &segment.samples)?;
        Ok(path)
    }

    /// Read a split segment back. Source offsets are not stored, so `start`/`end`
    /// describe the samples within the file.
    pub fn read_split(&self, ordinal: usize) -> Result<Segment, PipelineError> {
        let (sample_rate, samples) = read_wav(&self.split_path(ordinal), ordinal)?;
        Ok(Segment {
            ordinal,
            start: 0,
            end: samples.len(),
            sample_rate,
            samples,
        })
    }

    pub fn write_resampled(&self, segment: &ResampledSegment) -> Result<PathBuf, PipelineError> {
        let path = self.resampled_path(segment.ordinal);
        write_wav(&path, segment.sample_rate, &segment.samples)?;
        Ok(path)
    }

    pub fn read_resampled(&self, ordinal: usize) -> Result<ResampledSegment, PipelineError> {
        let (sample_rate, samples) = read_wav(&self.resampled_path(ordinal), ordinal)?;
        Ok(ResampledSegment { ordinal, sample_rate, samples })
    }
}

fn write_wav(path: &Path, sample_rate: u32, samples: &[f32]) -> Result<(), PipelineError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let to_io = |e: hound::Error| match e {
        hound::Error::IoError(io) => PipelineError::Io(io),
        other => PipelineError::Io(std::io::Error::new(std::io::ErrorKind::Other, other)),
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(to_io)?;
    for sample in samples {
        writer.write_sample(*sample).map_err(to_io)?;
    }
    writer.finalize().map_err(to_io)
}

/// Any failure to read a segment file back is a decode failure for that ordinal.
fn read_wav(path: &Path, ordinal: usize) -> Result<(u32, Vec<f32>), PipelineError> {
    let decode_error = |reason: String| PipelineError::Decode { ordinal, reason };

    let mut reader = hound::WavReader::open(path).map_err(|e| decode_error(e.to_string()))?;
    let spec = reader.spec();
    if spec.channels != 1 || spec.sample_format != hound::SampleFormat::Float {
        return Err(decode_error(format!(
            "unexpected format: {} channels, {:?}",
            spec.channels, spec.sample_format
        )));
    }

    let samples = reader
        .samples::<f32>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| decode_error(e.to_string()))?;
    if samples.is_empty() {
        return Err(decode_error("segment file contains no samples".to_string()));
    }

    Ok((spec.sample_rate, samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(ordinal: usize, samples: Vec<f32>) -> Segment {
        Segment {
            ordinal,
            start: 0,
            end: samples.len(),
            sample_rate: 8000,
            samples,
        }
    }

    #[test]
    fn test_split_files_use_padded_labels() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(dir.path()).unwrap();

        let path = store.write_split(&segment(7, vec![0.25; 100])).unwrap();
        assert!(path.ends_with("split/segment_007.wav"));

        let back = store.read_split(7).unwrap();
        assert_eq!(back.sample_rate, 8000);
        assert_eq!(back.samples, vec![0.25; 100]);
    }

    #[test]
    fn test_resampled_files_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(dir.path()).unwrap();
        let resampled = ResampledSegment { ordinal: 2, sample_rate: 16000, samples: vec![0.5; 32] };

        let path = store.write_resampled(&resampled).unwrap();
        assert!(path.ends_with("resampled/segment_002.wav"));
        assert_eq!(store.read_resampled(2).unwrap().sample_rate, 16000);
    }

    #[test]
    fn test_corrupt_file_is_decode_error_for_that_ordinal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(dir.path()).unwrap();
        store.write_split(&segment(3, vec![0.1; 10])).unwrap();
        std::fs::write(store.split_path(3), b"garbage").unwrap();

        assert!(matches!(
            store.read_split(3),
            Err(PipelineError::Decode { ordinal: 3, .. })
        ));
        assert!(matches!(
            store.read_split(4),
            Err(PipelineError::Decode { ordinal: 4, .. })
        ));
    }
}
