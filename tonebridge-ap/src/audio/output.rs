//! Audio output using cpal
//!
//! `CpalOutput` is both the sink and the playback clock. The clock is the
//! number of frames the device callback has rendered, so scheduled start times
//! and "now" come from the same hardware timeline.
//!
//! The cpal `Stream` is not `Send`, so it is built and owned by a dedicated
//! thread. Scheduled buffers reach the callback through a lock-free ring of
//! voices; the callback mixes each voice in at its start frame.

use crate::audio::types::{DecodedBuffer, OutputFormat, Timestamp};
use crate::error::{Error, Result, SinkError};
use crate::playback::clock::PlaybackClock;
use crate::playback::sink::{AudioSink, SinkLease};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tonebridge_common::config::OutputSettings;
use tracing::{debug, error, info, warn};

/// Scheduled-but-not-yet-mixed buffers the callback can hold
const VOICE_QUEUE_CAPACITY: usize = 256;

/// Preferred device rate when the device supports it
const PREFERRED_SAMPLE_RATE: u32 = 44100;

/// A scheduled buffer as seen by the audio callback
struct Voice {
    start_frame: u64,
    samples: Vec<f32>,
    /// Frames already mixed
    position: usize,
    frames: usize,
}

impl Voice {
    fn is_done(&self) -> bool {
        self.position >= self.frames
    }
}

/// State shared between the owner and the audio thread
#[derive(Default)]
struct OutputShared {
    frames_rendered: AtomicU64,
    failed: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl OutputShared {
    fn fail(&self, message: String) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
        self.failed.store(true, Ordering::Release);
    }

    fn failure(&self) -> Option<String> {
        if !self.failed.load(Ordering::Acquire) {
            return None;
        }
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Mixes voices into device buffers; lives inside the stream callback
struct Renderer {
    incoming: HeapCons<Voice>,
    active: Vec<Voice>,
    scratch: Vec<f32>,
    channels: usize,
    shared: Arc<OutputShared>,
}

impl Renderer {
    fn new(incoming: HeapCons<Voice>, channels: usize, shared: Arc<OutputShared>) -> Self {
        Self {
            incoming,
            active: Vec::with_capacity(VOICE_QUEUE_CAPACITY),
            scratch: Vec::new(),
            channels: channels.max(1),
            shared,
        }
    }

    /// Fill `out` (interleaved f32) and advance the clock
    fn render(&mut self, out: &mut [f32]) {
        let channels = self.channels;
        let frames = out.len() / channels;
        out.fill(0.0);

        while let Some(voice) = self.incoming.try_pop() {
            self.active.push(voice);
        }

        let base = self.shared.frames_rendered.load(Ordering::Acquire);
        let end = base + frames as u64;

        for voice in &mut self.active {
            if voice.start_frame >= end {
                continue;
            }
            // Frame k of a voice always plays at start_frame + k; a voice that
            // reached the callback late drops what already elapsed, so it
            // cannot run into the voice scheduled after it.
            let elapsed = base.saturating_sub(voice.start_frame);
            let due = usize::try_from(elapsed).unwrap_or(usize::MAX).min(voice.frames);
            voice.position = voice.position.max(due);

            let offset = (voice.start_frame.max(base) - base) as usize;
            let count = (frames - offset).min(voice.frames - voice.position);

            let from = voice.position * channels;
            let src = &voice.samples[from..from + count * channels];
            let dst = &mut out[offset * channels..(offset + count) * channels];
            for (d, s) in dst.iter_mut().zip(src) {
                *d += *s;
            }
            voice.position += count;
        }
        self.active.retain(|v| !v.is_done());

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.shared.frames_rendered.store(end, Ordering::Release);
    }

    /// Render into a device buffer of any supported sample type
    fn render_into<T: SizedSample + FromSample<f32>>(&mut self, data: &mut [T]) {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(data.len(), 0.0);
        self.render(&mut scratch);
        for (d, s) in data.iter_mut().zip(&scratch) {
            *d = T::from_sample(*s);
        }
        self.scratch = scratch;
    }
}

/// Audio device output and hardware clock
pub struct CpalOutput {
    format: OutputFormat,
    device_name: String,
    shared: Arc<OutputShared>,
    voices: Mutex<HeapProd<Voice>>,
    lease: SinkLease,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// List available audio output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open the configured device and start its stream
    ///
    /// Falls back to the default device if the named one is missing. Returns
    /// once the stream is playing, or with the setup error.
    pub fn open(settings: &OutputSettings) -> Result<Self> {
        let shared = Arc::new(OutputShared::default());
        let (producer, consumer) = HeapRb::<Voice>::new(VOICE_QUEUE_CAPACITY).split();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(OutputFormat, String)>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let device_name = settings.device.clone();
        let buffer_frames = settings.buffer_frames;
        let thread_shared = Arc::clone(&shared);

        let thread = std::thread::Builder::new()
            .name("tonebridge-audio".to_string())
            .spawn(move || {
                let opened = open_device(device_name.as_deref(), buffer_frames).and_then(
                    |(device, config, sample_format, name)| {
                        let format = OutputFormat {
                            sample_rate: config.sample_rate.0,
                            channels: config.channels,
                        };
                        let renderer =
                            Renderer::new(consumer, config.channels as usize, thread_shared);
                        let stream = match sample_format {
                            SampleFormat::F32 => build_stream::<f32>(&device, &config, renderer)?,
                            SampleFormat::I16 => build_stream::<i16>(&device, &config, renderer)?,
                            SampleFormat::U16 => build_stream::<u16>(&device, &config, renderer)?,
                            other => {
                                return Err(Error::AudioOutput(format!(
                                    "Unsupported sample format: {:?}",
                                    other
                                )))
                            }
                        };
                        stream.play().map_err(|e| {
                            Error::AudioOutput(format!("Failed to start stream: {}", e))
                        })?;
                        Ok((stream, format, name))
                    },
                );

                let stream = match opened {
                    Ok((stream, format, name)) => {
                        let _ = ready_tx.send(Ok((format, name)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until the owner drops; the stream dies with this thread
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Audio thread exiting");
            })?;

        let (format, device_name) = ready_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Audio thread exited during setup".to_string()))??;

        info!(
            "Audio output on '{}': {}Hz, {} channels",
            device_name, format.sample_rate, format.channels
        );

        Ok(Self {
            format,
            device_name,
            shared,
            voices: Mutex::new(producer),
            lease: SinkLease::new(),
            stop_tx: Mutex::new(Some(stop_tx)),
            thread: Some(thread),
        })
    }

    /// Device sample rate and channel count; decoders must produce this
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Name of the opened device
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stream error reported by the device, if any
    pub fn failure(&self) -> Option<String> {
        self.shared.failure()
    }
}

impl PlaybackClock for CpalOutput {
    fn now(&self) -> Timestamp {
        self.shared.frames_rendered.load(Ordering::Acquire) as f64 / self.format.sample_rate as f64
    }
}

impl AudioSink for CpalOutput {
    fn schedule(
        &self,
        buffer: DecodedBuffer,
        start: Timestamp,
    ) -> std::result::Result<(), SinkError> {
        if let Some(message) = self.shared.failure() {
            return Err(SinkError::DeviceLost(message));
        }
        if buffer.format() != self.format {
            return Err(SinkError::Rejected(format!(
                "buffer is {}Hz/{}ch, device is {}Hz/{}ch",
                buffer.sample_rate, buffer.channels, self.format.sample_rate, self.format.channels
            )));
        }

        let voice = Voice {
            start_frame: (start.max(0.0) * self.format.sample_rate as f64).round() as u64,
            frames: buffer.frames,
            samples: buffer.samples,
            position: 0,
        };

        self.voices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_push(voice)
            .map_err(|_| SinkError::Rejected("voice queue full".to_string()))
    }

    fn lease(&self) -> &SinkLease {
        &self.lease
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(tx) = self
            .stop_tx
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio thread panicked");
            }
        }
    }
}

/// Find the device and pick a stream configuration
fn open_device(
    name: Option<&str>,
    buffer_frames: Option<u32>,
) -> Result<(Device, StreamConfig, SampleFormat, String)> {
    let host = cpal::default_host();

    let named = match name {
        Some(name) => {
            let found = host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
                .find(|d| d.name().ok().as_deref() == Some(name));
            if found.is_none() {
                warn!("Requested device '{}' not found, falling back to default device", name);
            }
            found
        }
        None => None,
    };

    let device = match named {
        Some(device) => device,
        None => host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let (mut config, sample_format) = best_config(&device)?;
    if let Some(frames) = buffer_frames {
        config.buffer_size = cpal::BufferSize::Fixed(frames);
        debug!("Using requested buffer size: {} frames", frames);
    }

    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}, buffer_size={:?}",
        config.sample_rate.0, config.channels, sample_format, config.buffer_size
    );
    Ok((device, config, sample_format, device_name))
}

/// Prefer 44.1kHz stereo f32, else the device default
fn best_config(device: &Device) -> Result<(StreamConfig, SampleFormat)> {
    let mut supported = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?;

    let preferred = supported.find(|c| {
        c.channels() == 2
            && c.min_sample_rate().0 <= PREFERRED_SAMPLE_RATE
            && c.max_sample_rate().0 >= PREFERRED_SAMPLE_RATE
            && c.sample_format() == SampleFormat::F32
    });

    if let Some(c) = preferred {
        let sample_format = c.sample_format();
        let config = c.with_sample_rate(cpal::SampleRate(PREFERRED_SAMPLE_RATE)).config();
        return Ok((config, sample_format));
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
    Ok((fallback.config(), fallback.sample_format()))
}

fn build_stream<T>(device: &Device, config: &StreamConfig, mut renderer: Renderer) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let shared = Arc::clone(&renderer.shared);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| renderer.render_into(data),
            move |err| {
                error!("Audio stream error: {}", err);
                shared.fail(err.to_string());
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(channels: usize) -> (HeapProd<Voice>, Renderer, Arc<OutputShared>) {
        let shared = Arc::new(OutputShared::default());
        let (prod, cons) = HeapRb::<Voice>::new(8).split();
        (prod, Renderer::new(cons, channels, Arc::clone(&shared)), shared)
    }

    fn voice(start_frame: u64, samples: Vec<f32>, channels: usize) -> Voice {
        Voice {
            start_frame,
            frames: samples.len() / channels,
            samples,
            position: 0,
        }
    }

    #[test]
    fn test_voice_starts_at_its_frame() {
        let (mut prod, mut renderer, shared) = renderer(1);
        assert!(prod.try_push(voice(2, vec![0.5; 3], 1)).is_ok());

        let mut out = [0.0f32; 4];
        renderer.render(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.5]);

        renderer.render(&mut out);
        assert_eq!(out, [0.5, 0.0, 0.0, 0.0]);
        assert_eq!(shared.frames_rendered.load(Ordering::Acquire), 8);
        assert!(renderer.active.is_empty());
    }

    #[test]
    fn test_adjacent_voices_abut() {
        let (mut prod, mut renderer, _) = renderer(2);
        assert!(prod.try_push(voice(0, vec![0.25; 4], 2)).is_ok());
        assert!(prod.try_push(voice(2, vec![-0.25; 4], 2)).is_ok());

        let mut out = [0.0f32; 8];
        renderer.render(&mut out);
        assert_eq!(out, [0.25, 0.25, 0.25, 0.25, -0.25, -0.25, -0.25, -0.25]);
    }

    #[test]
    fn test_late_voice_skips_elapsed_frames() {
        let (mut prod, mut renderer, _) = renderer(1);
        let mut out = [0.0f32; 4];
        renderer.render(&mut out);

        // Slot was frames 2..6; frames 2 and 3 already went out
        assert!(prod.try_push(voice(2, vec![0.1, 0.2, 0.3, 0.4], 1)).is_ok());
        renderer.render(&mut out);
        assert_eq!(out, [0.3, 0.4, 0.0, 0.0]);
        assert!(renderer.active.is_empty());
    }

    #[test]
    fn test_late_voice_does_not_overlap_next() {
        let (mut prod, mut renderer, _) = renderer(1);
        let mut out = [0.0f32; 4];
        renderer.render(&mut out);

        // Both arrive after the first one's slot began
        assert!(prod.try_push(voice(3, vec![0.25; 3], 1)).is_ok());
        assert!(prod.try_push(voice(6, vec![-0.5; 2], 1)).is_ok());
        renderer.render(&mut out);
        assert_eq!(out, [0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn test_voice_entirely_in_the_past_is_dropped() {
        let (mut prod, mut renderer, _) = renderer(1);
        let mut out = [0.0f32; 4];
        renderer.render(&mut out);
        renderer.render(&mut out);

        assert!(prod.try_push(voice(1, vec![0.5; 2], 1)).is_ok());
        renderer.render(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert!(renderer.active.is_empty());
    }

    #[test]
    fn test_mix_is_clamped() {
        let (mut prod, mut renderer, _) = renderer(1);
        assert!(prod.try_push(voice(0, vec![0.75; 2], 1)).is_ok());
        assert!(prod.try_push(voice(0, vec![0.75; 2], 1)).is_ok());

        let mut out = [0.0f32; 2];
        renderer.render(&mut out);
        assert_eq!(out, [1.0, 1.0]);
    }

    #[test]
    fn test_render_into_i16() {
        let (mut prod, mut renderer, _) = renderer(1);
        assert!(prod.try_push(voice(0, vec![1.0, -1.0], 1)).is_ok());

        let mut out = [0i16; 2];
        renderer.render_into(&mut out);
        assert!(out[0] > 32000);
        assert!(out[1] < -32000);
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_devices() {
        let devices = CpalOutput::list_devices().unwrap();
        assert!(!devices.is_empty());
    }
}
