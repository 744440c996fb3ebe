//! Core audio data types
//!
//! Defines the encoded chunk handed in by producers and the decoded buffer
//! handed on to the sink.

use std::sync::Arc;

/// Position on the playback clock, in seconds
///
/// Same unit as buffer durations, so `start + duration` is the next free slot.
pub type Timestamp = f64;

/// One self-contained unit of encoded audio
///
/// Immutable once created. The sequence number is assigned by the scheduler at
/// enqueue time and defines playback order.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    sequence: u64,
    bytes: Arc<[u8]>,
}

impl EncodedChunk {
    /// Wrap encoded bytes with their arrival sequence number
    pub fn new(sequence: u64, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            sequence,
            bytes: bytes.into(),
        }
    }

    /// Arrival sequence number
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Encoded bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle to the encoded bytes
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    /// Encoded size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the chunk carries no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Sample rate and channel layout of the output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
        }
    }
}

/// Decoded audio ready for the sink
///
/// **Format:**
/// - Samples are f32 (-1.0 to 1.0)
/// - Interleaved: [ch0, ch1, ..., ch0, ch1, ...]
#[derive(Debug, Clone)]
pub struct DecodedBuffer {
    /// Sequence number of the chunk this buffer was decoded from
    pub sequence: u64,

    /// Interleaved PCM samples
    pub samples: Vec<f32>,

    /// Sample rate
    pub sample_rate: u32,

    /// Channel count
    pub channels: u16,

    /// Number of frames (samples.len() / channels)
    pub frames: usize,
}

impl DecodedBuffer {
    /// Create a buffer from interleaved samples
    pub fn new(sequence: u64, samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let frames = if channels == 0 {
            0
        } else {
            samples.len() / channels as usize
        };

        Self {
            sequence,
            samples,
            sample_rate,
            channels,
            frames,
        }
    }

    /// Silent buffer of (approximately) `duration` seconds
    pub fn silence(sequence: u64, duration: f64, sample_rate: u32, channels: u16) -> Self {
        let frames = (duration * sample_rate as f64).round() as usize;
        Self::new(
            sequence,
            vec![0.0; frames * channels as usize],
            sample_rate,
            channels,
        )
    }

    /// Duration in seconds, derived from frame count and sample rate
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    /// Output format this buffer is in
    pub fn format(&self) -> OutputFormat {
        OutputFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}
