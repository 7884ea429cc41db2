//! # Audio Module
//!
//! Everything that touches raw samples before feature extraction:
//!
//! ## Key Components:
//! - **Decoder**: turns an uploaded WAV/MP3 file into a mono `AudioWaveform`
//! - **Segmenter**: cuts a waveform into consecutive fixed-duration windows
//! - **Resampler**: converts one window to the canonical sample rate
//! - **SegmentStore**: writes windows to the run workspace as WAV files and reads them back
//!
//! ## Audio Format Conventions:
//! - **Samples**: `f32` in the range -1.0..=1.0
//! - **Channels**: always mono after decoding (channels are averaged)
//! - **Canonical rate**: 16kHz unless configured otherwise

pub mod decoder;    // symphonia decoding and downmixing
pub mod resampler;  // rubato sinc resampling
pub mod segmenter;  // fixed-window segmentation
pub mod store;      // transient WAV files per segment

pub use decoder::{decode_file, AudioWaveform};
pub use resampler::{resample, ResampledSegment};
pub use segmenter::{segment, Segment};
pub use store::SegmentStore;
