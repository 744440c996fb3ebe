//! Test helpers for tonebridge-ap integration tests
//!
//! - `ManualClock`: playback clock the test moves by hand
//! - `ScriptedDecoder`: decodes synthetic chunks whose bytes carry a duration
//! - WAV fixtures built with hound
//! - `Harness`: scheduler wired to the above plus a `NullSink`

#![allow(dead_code)]

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tonebridge_ap::audio::{ChunkDecoder, DecodedBuffer, EncodedChunk, Timestamp};
use tonebridge_ap::error::DecodeError;
use tonebridge_ap::playback::{NullSink, PlaybackClock, Scheduler, SchedulerConfig};
use tonebridge_common::events::{EventBus, StreamEvent};

/// Sample rate of synthetic buffers; 1 frame = 1 ms
pub const SCRIPT_RATE: u32 = 1000;

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn set(&self, t: Timestamp) {
        *self.now.lock().unwrap() = t;
    }

    pub fn advance(&self, dt: f64) {
        *self.now.lock().unwrap() += dt;
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

/// Synthetic chunk lasting `ms` milliseconds
pub fn chunk(ms: u32) -> Vec<u8> {
    ms.to_le_bytes().to_vec()
}

/// Synthetic chunk the decoder rejects
pub fn bad_chunk() -> Vec<u8> {
    b"bad".to_vec()
}

/// Decodes `chunk(ms)` payloads into silence of that length
///
/// Optionally advances a `ManualClock` per decode to model decode latency;
/// latencies are taken from `latencies` in order, cycling. A gated decoder
/// parks every decode until the test releases it.
pub struct ScriptedDecoder {
    latency_clock: Option<Arc<ManualClock>>,
    latencies: Vec<f64>,
    calls: AtomicUsize,
    gate: Option<(Mutex<Sender<()>>, Mutex<Receiver<()>>)>,
}

/// Test side of a gated decoder
pub struct DecodeGate {
    /// One message per decode that has started
    pub entered: Receiver<()>,
    /// One message lets one decode finish
    pub release: Sender<()>,
}

impl ScriptedDecoder {
    pub fn new() -> Self {
        Self {
            latency_clock: None,
            latencies: Vec::new(),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn gated() -> (Self, DecodeGate) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let decoder = Self {
            gate: Some((Mutex::new(entered_tx), Mutex::new(release_rx))),
            ..Self::new()
        };
        (
            decoder,
            DecodeGate {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }

    pub fn with_latency(clock: Arc<ManualClock>, latencies: Vec<f64>) -> Self {
        Self {
            latency_clock: Some(clock),
            latencies,
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChunkDecoder for ScriptedDecoder {
    fn decode(&self, chunk: &EncodedChunk) -> Result<DecodedBuffer, DecodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            let _ = entered.lock().unwrap().send(());
            let _ = release.lock().unwrap().recv();
        }
        if let Some(clock) = &self.latency_clock {
            if !self.latencies.is_empty() {
                clock.advance(self.latencies[call % self.latencies.len()]);
            }
        }

        let bytes: [u8; 4] = chunk
            .bytes()
            .try_into()
            .map_err(|_| DecodeError::Malformed("not a scripted chunk".to_string()))?;
        let ms = u32::from_le_bytes(bytes);
        if ms == 0 {
            return Err(DecodeError::NoFrames);
        }
        Ok(DecodedBuffer::new(
            chunk.sequence(),
            vec![0.0; ms as usize],
            SCRIPT_RATE,
            1,
        ))
    }
}

/// Scheduler over a manual clock and a recording sink
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub sink: Arc<NullSink>,
    pub scheduler: Scheduler,
    pub events: broadcast::Receiver<StreamEvent>,
}

impl Harness {
    pub fn new(max_lookahead: f64, max_queue_depth: usize) -> Self {
        let clock = ManualClock::new(0.0);
        Self::with_decoder(clock, ScriptedDecoder::new(), max_lookahead, max_queue_depth)
    }

    pub fn with_decoder(
        clock: Arc<ManualClock>,
        decoder: ScriptedDecoder,
        max_lookahead: f64,
        max_queue_depth: usize,
    ) -> Self {
        let sink = Arc::new(NullSink::new());
        let events = Arc::new(EventBus::new(1024));
        let rx = events.subscribe();
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_lookahead,
                max_queue_depth,
                ..SchedulerConfig::default()
            },
            Arc::clone(&clock) as Arc<dyn PlaybackClock>,
            Arc::clone(&sink) as _,
            Arc::new(decoder),
            events,
        )
        .expect("scheduler");

        Self {
            clock,
            sink,
            scheduler,
            events: rx,
        }
    }

    /// Events emitted so far
    pub fn drain_events(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// (start, duration) of every scheduled buffer
    pub fn schedule(&self) -> Vec<(u64, f64, f64)> {
        self.sink
            .history()
            .iter()
            .map(|e| (e.sequence, e.start, e.duration))
            .collect()
    }
}

pub fn count_events(events: &[StreamEvent], event_type: &str) -> usize {
    events.iter().filter(|e| e.event_type() == event_type).count()
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// In-memory 16-bit WAV sine chunk
pub fn sine_wav(duration_ms: u64, frequency_hz: f32, sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).expect("wav writer");
        let frames = sample_rate as u64 * duration_ms / 1000;
        for n in 0..frames {
            let t = n as f32 / sample_rate as f32;
            let sample = ((2.0 * PI * frequency_hz * t).sin() * 0.5 * i16::MAX as f32) as i16;
            for _ in 0..channels {
                writer.write_sample(sample).expect("write sample");
            }
        }
        writer.finalize().expect("finalize wav");
    }
    cursor.into_inner()
}
