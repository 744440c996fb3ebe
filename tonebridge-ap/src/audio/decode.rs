//! Chunk decoder using symphonia
//!
//! # Supported Formats
//!
//! Per Cargo.toml symphonia features:
//! - WAV / raw PCM (wav, pcm)
//! - MP3 (mp3)
//! - FLAC (flac)
//! - AAC, MP4/M4A (aac, isomp4)
//! - Vorbis (vorbis)
//!
//! # Sample Format
//!
//! Output is interleaved f32. When an output format is configured the decoder
//! also maps channels (mono duplicated, multichannel downmixed) and resamples
//! with rubato so the sink can render the buffer frame-for-frame.

use crate::audio::resampler::Resampler;
use crate::audio::types::{DecodedBuffer, EncodedChunk, OutputFormat};
use crate::error::{DecodeError, Error, Result};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

/// Turns one encoded chunk into a decoded buffer
///
/// Implementations must be stateless with respect to the scheduler: safe to
/// call repeatedly and from several threads.
pub trait ChunkDecoder: Send + Sync {
    /// Decode a complete, self-contained chunk
    fn decode(&self, chunk: &EncodedChunk) -> std::result::Result<DecodedBuffer, DecodeError>;
}

/// Symphonia-backed decoder for self-contained chunks
#[derive(Debug, Clone, Default)]
pub struct SymphoniaDecoder {
    output: Option<OutputFormat>,
}

impl SymphoniaDecoder {
    /// Decoder that keeps each chunk's native sample rate and channel count
    pub fn new() -> Self {
        Self { output: None }
    }

    /// Decoder that converts every chunk to the given output format
    pub fn with_output(output: OutputFormat) -> Self {
        Self {
            output: Some(output),
        }
    }

    /// Configured output format, if any
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    fn decode_source(
        &self,
        sequence: u64,
        bytes: Arc<[u8]>,
        hint: &Hint,
    ) -> std::result::Result<DecodedBuffer, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Probe(e.to_string()))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoTrack)?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let mut sample_rate = codec_params.sample_rate;
        let mut channels = codec_params.channels.map(|c| c.count());

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedCodec(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break; // end of chunk
                }
                Err(e) => return Err(DecodeError::Malformed(e.to_string())),
            };

            // Skip packets from other tracks
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = decoder
                .decode(&packet)
                .map_err(|e| DecodeError::Malformed(e.to_string()))?;

            let spec = *decoded.spec();
            sample_rate = Some(spec.rate);
            channels = Some(spec.channels.count());

            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
        }

        let native_rate = sample_rate
            .ok_or_else(|| DecodeError::Malformed("sample rate unknown".to_string()))?;
        let native_channels = channels
            .ok_or_else(|| DecodeError::Malformed("channel layout unknown".to_string()))?
            as u16;

        if samples.is_empty() || native_channels == 0 {
            return Err(DecodeError::NoFrames);
        }

        let (samples, sample_rate, channels) = match self.output {
            Some(output) => {
                let remixed = remix(&samples, native_channels, output.channels);
                let resampled = Resampler::resample(
                    &remixed,
                    native_rate,
                    output.sample_rate,
                    output.channels,
                )?;
                (resampled, output.sample_rate, output.channels)
            }
            None => (samples, native_rate, native_channels),
        };

        let buffer = DecodedBuffer::new(sequence, samples, sample_rate, channels);
        if buffer.frames == 0 {
            return Err(DecodeError::NoFrames);
        }

        trace!(
            "Decoded chunk {}: {} frames, {}Hz, {} ch ({:.3}s)",
            sequence,
            buffer.frames,
            buffer.sample_rate,
            buffer.channels,
            buffer.duration_seconds()
        );

        Ok(buffer)
    }
}

impl ChunkDecoder for SymphoniaDecoder {
    fn decode(&self, chunk: &EncodedChunk) -> std::result::Result<DecodedBuffer, DecodeError> {
        self.decode_source(chunk.sequence(), chunk.shared_bytes(), &Hint::new())
    }
}

/// Decode a whole audio file into one buffer
///
/// Used by producers that cut a local file into chunks.
pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<DecodedBuffer> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let buffer = SymphoniaDecoder::new()
        .decode_source(0, Arc::from(bytes), &hint)
        .map_err(Error::Decode)?;

    debug!(
        "Decoded {}: {:.2}s at {}Hz, {} channels",
        path.display(),
        buffer.duration_seconds(),
        buffer.sample_rate,
        buffer.channels
    );
    Ok(buffer)
}

/// Map interleaved samples between channel counts
///
/// - Same count: unchanged
/// - To mono: average of all channels
/// - From mono: duplicated to every channel
/// - Fewer channels: input channel `i` folds into output `i % to` (averaged)
/// - More channels: extra output channels are silent
fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let from = from as usize;
    let to = to as usize;
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);

    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else if from > to {
            for out_ch in 0..to {
                let (sum, count) = frame
                    .iter()
                    .enumerate()
                    .filter(|(in_ch, _)| in_ch % to == out_ch)
                    .fold((0.0f32, 0u32), |(s, c), (_, &v)| (s + v, c + 1));
                out.push(if count == 0 { 0.0 } else { sum / count as f32 });
            }
        } else {
            for out_ch in 0..to {
                out.push(if out_ch < from { frame[out_ch] } else { 0.0 });
            }
        }
    }
    out
}
