//! Audio resampling using rubato
//!
//! Converts decoded chunks to the output device sample rate so the sink can
//! render them frame-for-frame.

use crate::error::DecodeError;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::trace;

/// Frames of odd-reflected signal added at each chunk edge before resampling
///
/// Covers the interpolator's reach (8 taps) with margin, so the filter never
/// sees the zero padding rubato uses for its history and flush.
const EDGE_PAD_FRAMES: usize = 16;

/// Audio resampler using rubato for sample rate conversion.
pub struct Resampler;

impl Resampler {
    /// Resample interleaved audio from `input_rate` to `output_rate`.
    ///
    /// Returns a copy when the rates already match. Each chunk is resampled
    /// as a whole and no filter state carries over, so the output is placed
    /// on a grid fixed by the rates alone:
    /// - exactly `round(frames * output_rate / input_rate)` frames
    /// - rubato's output delay removed
    /// - the same sub-sample offset for every chunk
    ///
    /// Consecutive chunks of a continuous signal therefore join without a
    /// step at the boundary.
    pub fn resample(
        input: &[f32],
        input_rate: u32,
        output_rate: u32,
        channels: u16,
    ) -> Result<Vec<f32>, DecodeError> {
        if input_rate == output_rate {
            return Ok(input.to_vec());
        }
        if input_rate == 0 || output_rate == 0 || channels == 0 {
            return Err(DecodeError::Resample(format!(
                "invalid conversion {}Hz -> {}Hz with {} channels",
                input_rate, output_rate, channels
            )));
        }

        // De-interleave samples for rubato (which expects planar format)
        let planar_input = Self::deinterleave(input, channels);
        let input_frames = planar_input[0].len();
        if input_frames == 0 {
            return Ok(Vec::new());
        }

        let ratio = output_rate as f64 / input_rate as f64;
        let target_frames = Self::output_frames(input_frames, input_rate, output_rate);

        let padded: Vec<Vec<f32>> = planar_input
            .iter()
            .map(|channel| Self::extend_edges(channel, EDGE_PAD_FRAMES))
            .collect();
        let padded_frames = padded[0].len();

        let mut resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // no runtime ratio changes
            PolynomialDegree::Septic,
            padded_frames,
            channels as usize,
        )
        .map_err(|e| DecodeError::Resample(format!("failed to create resampler: {}", e)))?;

        // First output frame that lines up with input frame 0
        let skip = resampler.output_delay() + (EDGE_PAD_FRAMES as f64 * ratio).round() as usize;

        let mut planar_output = resampler
            .process(&padded, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;

        // Flush the filter tail
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        for (channel, rest) in planar_output.iter_mut().zip(tail) {
            channel.extend(rest);
        }

        let trimmed: Vec<Vec<f32>> = planar_output
            .into_iter()
            .map(|channel| Self::window(channel, skip, target_frames))
            .collect();

        let interleaved_output = Self::interleave(trimmed);

        trace!(
            "Resampled {} frames at {}Hz to {} frames at {}Hz",
            input_frames,
            input_rate,
            interleaved_output.len() / channels as usize,
            output_rate
        );

        Ok(interleaved_output)
    }

    /// Frame count of a chunk after conversion
    pub fn output_frames(input_frames: usize, input_rate: u32, output_rate: u32) -> usize {
        if input_rate == output_rate || input_rate == 0 {
            return input_frames;
        }
        (input_frames as f64 * output_rate as f64 / input_rate as f64).round() as usize
    }

    /// Extend a channel by `pad` frames on each side, reflected through the
    /// edge sample (`2*x[0] - x[k]`), keeping value and slope continuous.
    fn extend_edges(channel: &[f32], pad: usize) -> Vec<f32> {
        let n = channel.len();
        let last = n - 1;
        let first = channel[0];
        let end = channel[last];

        let mut out = Vec::with_capacity(n + 2 * pad);
        for k in (1..=pad).rev() {
            out.push(2.0 * first - channel[k.min(last)]);
        }
        out.extend_from_slice(channel);
        for k in 1..=pad {
            out.push(2.0 * end - channel[last - k.min(last)]);
        }
        out
    }

    /// Take `len` frames starting at `start`, holding the last value if short
    fn window(channel: Vec<f32>, start: usize, len: usize) -> Vec<f32> {
        let mut out: Vec<f32> = channel.iter().skip(start).take(len).copied().collect();
        let hold = out.last().copied().unwrap_or(0.0);
        out.resize(len, hold);
        out
    }

    /// Convert interleaved samples to planar format.
    ///
    /// Input:  [L, R, L, R, L, R, ...]
    /// Output: [[L, L, L, ...], [R, R, R, ...]]
    fn deinterleave(samples: &[f32], channels: u16) -> Vec<Vec<f32>> {
        let num_channels = channels as usize;
        let num_frames = samples.len() / num_channels;

        let mut planar = vec![Vec::with_capacity(num_frames); num_channels];
        for frame in samples.chunks_exact(num_channels) {
            for (ch_idx, &sample) in frame.iter().enumerate() {
                planar[ch_idx].push(sample);
            }
        }
        planar
    }

    /// Convert planar samples to interleaved format.
    fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
        if planar.is_empty() {
            return Vec::new();
        }

        let num_channels = planar.len();
        let num_frames = planar[0].len();
        let mut interleaved = Vec::with_capacity(num_frames * num_channels);

        for frame_idx in 0..num_frames {
            for channel in &planar {
                interleaved.push(channel[frame_idx]);
            }
        }
        interleaved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deinterleave() {
        let interleaved = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let planar = Resampler::deinterleave(&interleaved, 2);

        assert_eq!(planar.len(), 2);
        assert_eq!(planar[0], vec![1.0, 3.0, 5.0]);
        assert_eq!(planar[1], vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_interleave() {
        let planar = vec![vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]];
        assert_eq!(
            Resampler::interleave(planar),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
    }

    #[test]
    fn test_resample_same_rate() {
        let input = vec![0.1, 0.2, 0.3, 0.4];
        let output = Resampler::resample(&input, 48000, 48000, 2).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_resample_changes_length() {
        let input_rate = 48000;
        let frames = 4800;
        let mut input = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let t = i as f32 / input_rate as f32;
            let sample = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
            input.push(sample);
            input.push(sample);
        }

        let output = Resampler::resample(&input, input_rate, 44100, 2).unwrap();

        assert_eq!(output.len() / 2, 4410);
    }

    #[test]
    fn test_resample_keeps_timing() {
        // 1 kHz sine, 44.1k -> 48k: output frame j must sit at t = j / 48000
        let tone = |t: f64| (std::f64::consts::TAU * 1000.0 * t).sin() as f32 * 0.5;
        let input: Vec<f32> = (0..4410).map(|i| tone(i as f64 / 44100.0)).collect();

        let output = Resampler::resample(&input, 44100, 48000, 1).unwrap();
        assert_eq!(output.len(), 4800);

        for (j, &sample) in output.iter().enumerate() {
            let expected = tone(j as f64 / 48000.0);
            assert!(
                (sample - expected).abs() < 0.05,
                "frame {}: got {}, expected {}",
                j,
                sample,
                expected
            );
        }
    }

    #[test]
    fn test_extend_edges_reflects_slope() {
        let padded = Resampler::extend_edges(&[0.0, 0.1, 0.2], 2);
        let expected = [-0.2, -0.1, 0.0, 0.1, 0.2, 0.3, 0.4];
        assert_eq!(padded.len(), expected.len());
        for (got, want) in padded.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_extend_edges_single_frame() {
        assert_eq!(Resampler::extend_edges(&[0.3], 2), vec![0.3; 5]);
    }

    #[test]
    fn test_output_frames() {
        assert_eq!(Resampler::output_frames(22050, 44100, 48000), 24000);
        assert_eq!(Resampler::output_frames(100, 48000, 48000), 100);
        assert_eq!(Resampler::output_frames(1, 44100, 48000), 1);
    }

    #[test]
    fn test_resample_rejects_zero_rate() {
        assert!(Resampler::resample(&[0.0, 0.0], 0, 44100, 2).is_err());
    }
}
