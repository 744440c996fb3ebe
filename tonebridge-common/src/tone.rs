//! WAV chunk encoding and sine-tone generation
//!
//! Producers hand the service self-contained WAV chunks. The tone generator
//! keeps its oscillator phase across chunks, so consecutive chunks join
//! without a discontinuity when played back-to-back.

use crate::{Error, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::f64::consts::TAU;
use std::io::Cursor;
use std::time::Duration;

/// Default producer sample rate (44.1 kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Lowest frequency the generator accepts
pub const MIN_FREQUENCY_HZ: f64 = 100.0;

/// Highest frequency the generator accepts
pub const MAX_FREQUENCY_HZ: f64 = 1000.0;

/// Default tone (A4)
pub const DEFAULT_FREQUENCY_HZ: f64 = 440.0;

/// Default amplitude (50% of full scale)
pub const DEFAULT_AMPLITUDE: f64 = 0.5;

/// Encode interleaved 16-bit samples as a complete in-memory WAV file
pub fn encode_wav_i16(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    if channels == 0 {
        return Err(Error::InvalidInput("channel count must be at least 1".to_string()));
    }
    if samples.len() % channels as usize != 0 {
        return Err(Error::InvalidInput(format!(
            "{} samples is not a whole number of {}-channel frames",
            samples.len(),
            channels
        )));
    }

    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Encode interleaved f32 samples (-1.0..=1.0) as a 16-bit WAV file
pub fn encode_wav_f32(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let converted: Vec<i16> = samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect();
    encode_wav_i16(&converted, sample_rate, channels)
}

/// Phase-continuous mono sine generator
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    frequency_hz: f64,
    amplitude: f64,
    sample_rate: u32,
    phase: f64,
}

impl ToneGenerator {
    /// Create a generator; frequency is clamped to the accepted range
    pub fn new(frequency_hz: f64, amplitude: f64, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidInput("sample rate must be positive".to_string()));
        }
        Ok(Self {
            frequency_hz: clamp_frequency(frequency_hz),
            amplitude: amplitude.clamp(0.0, 1.0),
            sample_rate,
            phase: 0.0,
        })
    }

    /// Current frequency in Hz
    pub fn frequency(&self) -> f64 {
        self.frequency_hz
    }

    /// Change frequency without resetting phase
    pub fn set_frequency(&mut self, frequency_hz: f64) {
        self.frequency_hz = clamp_frequency(frequency_hz);
    }

    /// Sample rate of produced audio
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Produce the next `frames` samples, advancing the phase
    pub fn next_samples(&mut self, frames: usize) -> Vec<i16> {
        let step = TAU * self.frequency_hz / self.sample_rate as f64;
        let scale = self.amplitude * i16::MAX as f64;

        let mut samples = Vec::with_capacity(frames);
        for _ in 0..frames {
            samples.push((self.phase.sin() * scale) as i16);
            self.phase = (self.phase + step) % TAU;
        }
        samples
    }

    /// Produce the next chunk of `duration` as a WAV file
    pub fn next_chunk(&mut self, duration: Duration) -> Result<Vec<u8>> {
        let frames = (duration.as_secs_f64() * self.sample_rate as f64).round() as usize;
        if frames == 0 {
            return Err(Error::InvalidInput(format!(
                "chunk duration {:?} is shorter than one frame",
                duration
            )));
        }
        let samples = self.next_samples(frames);
        encode_wav_i16(&samples, self.sample_rate, 1)
    }
}

impl Default for ToneGenerator {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            amplitude: DEFAULT_AMPLITUDE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            phase: 0.0,
        }
    }
}

fn clamp_frequency(frequency_hz: f64) -> f64 {
    if frequency_hz.is_nan() {
        return DEFAULT_FREQUENCY_HZ;
    }
    frequency_hz.clamp(MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wav_header_and_length() {
        let wav = encode_wav_i16(&[0, 1, 2, 3], 8000, 2).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte canonical header + 4 samples * 2 bytes
        assert_eq!(wav.len(), 44 + 8);
    }

    #[test]
    fn test_encode_rejects_partial_frame() {
        assert!(encode_wav_i16(&[0, 1, 2], 8000, 2).is_err());
        assert!(encode_wav_i16(&[0], 8000, 0).is_err());
    }

    #[test]
    fn test_chunk_read_back_with_hound() {
        let mut tone = ToneGenerator::default();
        let wav = tone.next_chunk(Duration::from_millis(500)).unwrap();

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 44100);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.duration(), 22050);
    }

    #[test]
    fn test_frequency_clamped() {
        let mut tone = ToneGenerator::new(20.0, 0.5, 44100).unwrap();
        assert_eq!(tone.frequency(), MIN_FREQUENCY_HZ);
        tone.set_frequency(5000.0);
        assert_eq!(tone.frequency(), MAX_FREQUENCY_HZ);
    }

    #[test]
    fn test_phase_continuous_across_chunks() {
        // Two halves must equal one uninterrupted run
        let mut split = ToneGenerator::new(440.0, 0.5, 8000).unwrap();
        let mut first = split.next_samples(300);
        first.extend(split.next_samples(300));

        let mut whole = ToneGenerator::new(440.0, 0.5, 8000).unwrap();
        let reference = whole.next_samples(600);

        for (a, b) in first.iter().zip(reference.iter()) {
            assert!((a - b).abs() <= 1, "sample mismatch: {} vs {}", a, b);
        }
    }

    #[test]
    fn test_zero_length_chunk_rejected() {
        let mut tone = ToneGenerator::default();
        assert!(tone.next_chunk(Duration::from_micros(1)).is_err());
    }
}
