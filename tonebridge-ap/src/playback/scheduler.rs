//! Gap-free chunk scheduler
//!
//! Owns the chunk queue and the schedule cursor ("next available start time")
//! and programs the sink so that consecutive buffers abut exactly on the
//! playback clock:
//!
//! ```text
//! start  = max(cursor, clock.now())     // clock read after decode
//! cursor = start + buffer.duration
//! ```
//!
//! # Concurrency
//!
//! Drains are serialized by their own mutex, held for a whole pass. Cursor,
//! state and latches sit behind a second mutex that a drain takes only to pop
//! and to schedule, never across a decode, so `start`, `stop` and `status`
//! do not wait behind one. `start`, `stop` and a sink failure bump an epoch;
//! a drain that sees the epoch move while it was decoding drops the buffer
//! and ends the pass. The queue has its own lock and `enqueue` only touches
//! that, so producers never wait for a decode.
//!
//! # Failure handling
//!
//! - Decode failure: chunk dropped, `DecodeError` event, drain continues
//! - Queue full: oldest chunk dropped, `BacklogOverflow` event
//! - Clock overtook cursor: cursor reset to now, one `Underrun` event per gap
//! - Sink rejection: stream stopped, `Fatal` event, `Error::SinkFatal` returned

use crate::audio::decode::ChunkDecoder;
use crate::audio::types::Timestamp;
use crate::error::{Error, Result, SinkError};
use crate::playback::clock::PlaybackClock;
use crate::playback::queue::{ChunkQueue, PushResult};
use crate::playback::sink::AudioSink;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::futures::Notified;
use tonebridge_common::config::SchedulerSettings;
use tonebridge_common::events::{EventBus, StreamEvent, StreamState};
use tracing::{debug, error, info, trace, warn};

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How far ahead of the clock audio may be scheduled (seconds)
    pub max_lookahead: f64,
    /// Backlog cap before the oldest chunk is dropped
    pub max_queue_depth: usize,
    /// Nominal producer chunk length; informational only
    pub chunk_duration: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            max_lookahead: settings.max_lookahead_secs,
            max_queue_depth: settings.max_queue_depth,
            chunk_duration: settings.chunk_duration(),
        }
    }
}

/// What happened to an enqueued chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    /// Queued
    Queued { sequence: u64 },
    /// Queued; the oldest queued chunk was dropped to make room
    Overflowed { sequence: u64, dropped_sequence: u64 },
    /// Not accepted because the stream is stopped
    Refused,
}

/// Summary of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Buffers handed to the sink
    pub scheduled: usize,
    /// Chunks dropped because they failed to decode
    pub decode_failures: usize,
    /// Whether this pass detected an underrun
    pub underrun: bool,
}

/// Point-in-time view of the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: StreamState,
    /// Next available start time; 0.0 until a baseline exists
    pub cursor: Timestamp,
    pub clock: Timestamp,
    /// Audio scheduled beyond the clock (seconds)
    pub lookahead: f64,
    pub max_lookahead: f64,
    pub queue_depth: usize,
    pub max_queue_depth: usize,
    pub enqueued_total: u64,
    pub scheduled_total: u64,
    pub dropped_total: u64,
    pub decode_errors_total: u64,
    pub underruns_total: u64,
    pub scheduled_seconds: f64,
    pub failure: Option<String>,
}

#[derive(Default)]
struct SchedulerStats {
    enqueued: AtomicU64,
    scheduled: AtomicU64,
    dropped: AtomicU64,
    decode_errors: AtomicU64,
    underruns: AtomicU64,
}

struct SchedulerCore {
    state: StreamState,
    /// None until the first buffer sets the baseline
    next_start: Option<Timestamp>,
    /// Set when an underrun was reported; cleared by the next scheduled buffer
    underrun_latched: bool,
    failure: Option<String>,
    scheduled_seconds: f64,
    /// Bumped by start, stop and failure
    epoch: u64,
}

const STATE_IDLE: u8 = 0;
const STATE_STREAMING: u8 = 1;
const STATE_STOPPED: u8 = 2;

fn encode_state(state: StreamState) -> u8 {
    match state {
        StreamState::Idle => STATE_IDLE,
        StreamState::Streaming => STATE_STREAMING,
        StreamState::Stopped => STATE_STOPPED,
    }
}

fn decode_state(raw: u8) -> StreamState {
    match raw {
        STATE_STREAMING => StreamState::Streaming,
        STATE_STOPPED => StreamState::Stopped,
        _ => StreamState::Idle,
    }
}

/// Chunk scheduler bound to one sink
pub struct Scheduler {
    config: SchedulerConfig,
    queue: ChunkQueue,
    /// Held for a whole drain pass
    drain: Mutex<()>,
    core: Mutex<SchedulerCore>,
    /// Lock-free mirror of `core.state`
    state: AtomicU8,
    stats: SchedulerStats,
    clock: Arc<dyn PlaybackClock>,
    sink: Arc<dyn AudioSink>,
    decoder: Arc<dyn ChunkDecoder>,
    events: Arc<EventBus>,
}

impl Scheduler {
    /// Bind a scheduler to `sink`
    ///
    /// Fails with `Error::SinkBusy` if another scheduler holds the sink, and
    /// with `Error::Config` for a non-positive lookahead or zero queue depth.
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn PlaybackClock>,
        sink: Arc<dyn AudioSink>,
        decoder: Arc<dyn ChunkDecoder>,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        if !config.max_lookahead.is_finite() || config.max_lookahead <= 0.0 {
            return Err(Error::Config(format!(
                "max_lookahead must be positive, got {}",
                config.max_lookahead
            )));
        }
        if config.max_queue_depth == 0 {
            return Err(Error::Config("max_queue_depth must be at least 1".to_string()));
        }
        if !sink.lease().try_acquire() {
            return Err(Error::SinkBusy);
        }

        debug!(
            "Scheduler created: lookahead={:.2}s, queue depth={}, nominal chunk={:?}",
            config.max_lookahead, config.max_queue_depth, config.chunk_duration
        );

        Ok(Self {
            queue: ChunkQueue::new(config.max_queue_depth),
            config,
            drain: Mutex::new(()),
            core: Mutex::new(SchedulerCore {
                state: StreamState::Idle,
                next_start: None,
                underrun_latched: false,
                failure: None,
                scheduled_seconds: 0.0,
                epoch: 0,
            }),
            state: AtomicU8::new(STATE_IDLE),
            stats: SchedulerStats::default(),
            clock,
            sink,
            decoder,
            events,
        })
    }

    fn lock_core(&self) -> MutexGuard<'_, SchedulerCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, core: &mut SchedulerCore, new_state: StreamState) {
        let old_state = core.state;
        if old_state == new_state {
            return;
        }
        core.state = new_state;
        self.state.store(encode_state(new_state), Ordering::Release);
        info!("Stream state: {} -> {}", old_state, new_state);
        self.events.emit_lossy(StreamEvent::StreamStateChanged {
            old_state,
            new_state,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Begin streaming with a fresh cursor
    ///
    /// Idempotent while streaming. Refused after a sink failure: the owner must
    /// build a new pipeline.
    pub fn start(&self) -> Result<()> {
        let mut core = self.lock_core();
        if let Some(failure) = &core.failure {
            return Err(Error::InvalidState(format!(
                "sink failed ({}); rebuild the pipeline to restart",
                failure
            )));
        }
        if core.state == StreamState::Streaming {
            return Ok(());
        }

        core.next_start = None;
        core.underrun_latched = false;
        core.epoch += 1;
        self.queue.open();
        self.set_state(&mut core, StreamState::Streaming);
        Ok(())
    }

    /// Stop streaming
    ///
    /// Clears the queue and resets the cursor. Buffers already handed to the
    /// sink play out.
    pub fn stop(&self) {
        let mut core = self.lock_core();
        let discarded = self.queue.close_and_clear();
        core.next_start = None;
        core.underrun_latched = false;
        core.epoch += 1;
        if discarded > 0 {
            debug!("Discarded {} queued chunks on stop", discarded);
        }
        self.set_state(&mut core, StreamState::Stopped);
    }

    /// Append an encoded chunk; never blocks on a drain in progress
    pub fn enqueue(&self, bytes: impl Into<Arc<[u8]>>) -> EnqueueOutcome {
        let outcome = match self.queue.push(bytes) {
            PushResult::Queued { sequence } => EnqueueOutcome::Queued { sequence },
            PushResult::Displaced { sequence, dropped } => {
                let dropped_sequence = dropped.sequence();
                let queue_depth = self.queue.len();
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Backlog overflow: dropped chunk {} (queue depth {})",
                    dropped_sequence, queue_depth
                );
                self.events.emit_lossy(StreamEvent::BacklogOverflow {
                    dropped_sequence,
                    queue_depth,
                    timestamp: chrono::Utc::now(),
                });
                EnqueueOutcome::Overflowed {
                    sequence,
                    dropped_sequence,
                }
            }
            PushResult::Refused => {
                debug!("Chunk refused: stream stopped");
                return EnqueueOutcome::Refused;
            }
        };

        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    /// Decode and schedule queued chunks until the queue is empty or the
    /// lookahead budget is used up
    ///
    /// No-op unless streaming. Returns `Error::SinkFatal` if the sink rejects a
    /// buffer; the stream is stopped at that point.
    pub fn drain_and_schedule(&self) -> Result<DrainReport> {
        let _pass = self.drain.lock().unwrap_or_else(PoisonError::into_inner);
        let mut report = DrainReport::default();

        let epoch = {
            let mut core = self.lock_core();
            if core.state != StreamState::Streaming {
                return Ok(report);
            }

            if self.queue.is_empty() {
                if let Some(cursor) = core.next_start {
                    let now = self.clock.now();
                    if now > cursor {
                        if self.report_underrun(&mut core, cursor, now) {
                            report.underrun = true;
                        }
                        core.next_start = Some(now);
                    }
                }
                return Ok(report);
            }
            core.epoch
        };

        loop {
            let chunk = {
                let core = self.lock_core();
                if core.epoch != epoch {
                    break;
                }
                if let Some(cursor) = core.next_start {
                    if cursor - self.clock.now() >= self.config.max_lookahead {
                        trace!("Lookahead budget full at cursor {:.4}s", cursor);
                        break;
                    }
                }
                match self.queue.pop() {
                    Some(chunk) => chunk,
                    None => break,
                }
            };

            let buffer = match self.decoder.decode(&chunk) {
                Ok(buffer) => buffer,
                Err(e) => {
                    report.decode_failures += 1;
                    self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Dropping chunk {}: {}", chunk.sequence(), e);
                    self.events.emit_lossy(StreamEvent::DecodeError {
                        sequence: chunk.sequence(),
                        message: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                    continue;
                }
            };

            let mut core = self.lock_core();
            if core.epoch != epoch {
                debug!(
                    "Discarding chunk {}: stream stopped or restarted during decode",
                    buffer.sequence
                );
                break;
            }

            // Clock read after decode: decode latency must not leak into start times
            let now = self.clock.now();
            let start = match core.next_start {
                Some(cursor) => {
                    if now > cursor && self.report_underrun(&mut core, cursor, now) {
                        report.underrun = true;
                    }
                    cursor.max(now)
                }
                None => now,
            };

            let sequence = buffer.sequence;
            let duration = buffer.duration_seconds();

            if let Err(e) = self.sink.schedule(buffer, start) {
                self.fail(&mut core, &e);
                return Err(Error::SinkFatal(e));
            }

            core.next_start = Some(start + duration);
            core.underrun_latched = false;
            core.scheduled_seconds += duration;
            report.scheduled += 1;
            self.stats.scheduled.fetch_add(1, Ordering::Relaxed);

            debug!(
                "Scheduled chunk {} at {:.4}s ({:.4}s, lead {:.3}s)",
                sequence,
                start,
                duration,
                start + duration - now
            );
            self.events.emit_lossy(StreamEvent::ChunkScheduled {
                sequence,
                start_time: start,
                duration,
                timestamp: chrono::Utc::now(),
            });
        }

        Ok(report)
    }

    /// Emit an underrun unless this gap was already reported
    fn report_underrun(&self, core: &mut SchedulerCore, cursor: Timestamp, now: Timestamp) -> bool {
        if core.underrun_latched {
            return false;
        }
        core.underrun_latched = true;
        self.stats.underruns.fetch_add(1, Ordering::Relaxed);
        info!(
            "Underrun: clock {:.4}s passed cursor {:.4}s ({:.3}s gap)",
            now,
            cursor,
            now - cursor
        );
        self.events.emit_lossy(StreamEvent::Underrun {
            cursor,
            clock: now,
            timestamp: chrono::Utc::now(),
        });
        true
    }

    fn fail(&self, core: &mut SchedulerCore, e: &SinkError) {
        error!("Sink rejected buffer, stopping stream: {}", e);
        core.failure = Some(e.to_string());
        core.next_start = None;
        core.underrun_latched = false;
        core.epoch += 1;
        self.queue.close_and_clear();
        self.events.emit_lossy(StreamEvent::Fatal {
            message: e.to_string(),
            timestamp: chrono::Utc::now(),
        });
        self.set_state(core, StreamState::Stopped);
    }

    /// Current state without taking the scheduler lock
    pub fn state(&self) -> StreamState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    /// True while streaming
    pub fn is_streaming(&self) -> bool {
        self.state() == StreamState::Streaming
    }

    /// Current cursor; 0.0 when no baseline is established
    pub fn cursor(&self) -> Timestamp {
        self.lock_core().next_start.unwrap_or(0.0)
    }

    /// Sink failure that stopped the stream, if any
    pub fn failure(&self) -> Option<String> {
        self.lock_core().failure.clone()
    }

    /// Queued chunk count
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Queued sequence numbers, head first
    pub fn queued_sequences(&self) -> Vec<u64> {
        self.queue.sequences()
    }

    /// Resolves when a chunk is enqueued
    pub fn chunk_arrived(&self) -> Notified<'_> {
        self.queue.arrival()
    }

    /// Subscribe to scheduler events
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Snapshot of state, timing and counters
    pub fn status(&self) -> SchedulerStatus {
        let core = self.lock_core();
        let clock = self.clock.now();
        let cursor = core.next_start.unwrap_or(0.0);
        let lookahead = match core.next_start {
            Some(next) => (next - clock).max(0.0),
            None => 0.0,
        };

        SchedulerStatus {
            state: core.state,
            cursor,
            clock,
            lookahead,
            max_lookahead: self.config.max_lookahead,
            queue_depth: self.queue.len(),
            max_queue_depth: self.queue.capacity(),
            enqueued_total: self.stats.enqueued.load(Ordering::Relaxed),
            scheduled_total: self.stats.scheduled.load(Ordering::Relaxed),
            dropped_total: self.stats.dropped.load(Ordering::Relaxed),
            decode_errors_total: self.stats.decode_errors.load(Ordering::Relaxed),
            underruns_total: self.stats.underruns.load(Ordering::Relaxed),
            scheduled_seconds: core.scheduled_seconds,
            failure: core.failure.clone(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.sink.lease().release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::{DecodedBuffer, EncodedChunk};
    use crate::error::DecodeError;
    use crate::playback::sink::NullSink;

    struct FixedClock(Timestamp);

    impl PlaybackClock for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    /// First byte = duration in tenths of a second; 0 = malformed
    struct TenthsDecoder;

    impl ChunkDecoder for TenthsDecoder {
        fn decode(&self, chunk: &EncodedChunk) -> std::result::Result<DecodedBuffer, DecodeError> {
            match chunk.bytes().first() {
                Some(&tenths) if tenths > 0 => Ok(DecodedBuffer::silence(
                    chunk.sequence(),
                    tenths as f64 / 10.0,
                    1000,
                    1,
                )),
                _ => Err(DecodeError::Malformed("test".to_string())),
            }
        }
    }

    fn scheduler(sink: Arc<NullSink>, now: Timestamp) -> Scheduler {
        Scheduler::new(
            SchedulerConfig {
                max_lookahead: 1.5,
                max_queue_depth: 4,
                chunk_duration: Duration::from_millis(500),
            },
            Arc::new(FixedClock(now)),
            sink,
            Arc::new(TenthsDecoder),
            Arc::new(EventBus::new(64)),
        )
        .unwrap()
    }

    #[test]
    fn test_drain_is_noop_when_idle() {
        let sink = Arc::new(NullSink::new());
        let sched = scheduler(Arc::clone(&sink), 0.0);
        sched.enqueue(vec![5u8]);

        assert_eq!(sched.drain_and_schedule().unwrap(), DrainReport::default());
        assert_eq!(sched.queue_depth(), 1);
    }

    #[test]
    fn test_first_buffer_starts_at_now() {
        let sink = Arc::new(NullSink::new());
        let sched = scheduler(Arc::clone(&sink), 3.0);
        sched.start().unwrap();
        sched.enqueue(vec![5u8]);

        let report = sched.drain_and_schedule().unwrap();
        assert_eq!(report.scheduled, 1);
        assert!(!report.underrun);
        assert_eq!(sink.history()[0].start, 3.0);
        assert_eq!(sched.cursor(), 3.5);
    }

    #[test]
    fn test_lookahead_budget_limits_drain() {
        let sink = Arc::new(NullSink::new());
        let sched = scheduler(Arc::clone(&sink), 0.0);
        sched.start().unwrap();
        for _ in 0..4 {
            sched.enqueue(vec![5u8]);
        }

        // 0.0, 0.5, 1.0 fit; cursor reaches 1.5 and the budget is full
        let report = sched.drain_and_schedule().unwrap();
        assert_eq!(report.scheduled, 3);
        assert_eq!(sched.queue_depth(), 1);
    }

    #[test]
    fn test_second_scheduler_on_same_sink_is_refused() {
        let sink = Arc::new(NullSink::new());
        let first = scheduler(Arc::clone(&sink), 0.0);

        let second = Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(FixedClock(0.0)),
            Arc::clone(&sink) as Arc<dyn AudioSink>,
            Arc::new(TenthsDecoder),
            Arc::new(EventBus::new(8)),
        );
        assert!(matches!(second, Err(Error::SinkBusy)));

        drop(first);
        assert!(!sink.lease().is_held());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let sink = Arc::new(NullSink::new());
        let result = Scheduler::new(
            SchedulerConfig {
                max_lookahead: 0.0,
                ..SchedulerConfig::default()
            },
            Arc::new(FixedClock(0.0)),
            Arc::clone(&sink) as Arc<dyn AudioSink>,
            Arc::new(TenthsDecoder),
            Arc::new(EventBus::new(8)),
        );
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(!sink.lease().is_held());
    }

    #[test]
    fn test_sink_failure_is_fatal() {
        let sink = Arc::new(NullSink::new());
        let sched = scheduler(Arc::clone(&sink), 0.0);
        sched.start().unwrap();
        sink.close();
        sched.enqueue(vec![5u8]);
        sched.enqueue(vec![5u8]);

        let result = sched.drain_and_schedule();
        assert!(matches!(result, Err(Error::SinkFatal(_))));
        assert_eq!(sched.state(), StreamState::Stopped);
        assert_eq!(sched.queue_depth(), 0);
        assert!(sched.failure().is_some());
        assert!(matches!(sched.start(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_enqueue_refused_after_stop() {
        let sink = Arc::new(NullSink::new());
        let sched = scheduler(sink, 0.0);
        sched.start().unwrap();
        sched.stop();

        assert_eq!(sched.enqueue(vec![5u8]), EnqueueOutcome::Refused);
        sched.start().unwrap();
        assert!(matches!(
            sched.enqueue(vec![5u8]),
            EnqueueOutcome::Queued { .. }
        ));
    }

    #[test]
    fn test_status_reports_counters() {
        let sink = Arc::new(NullSink::new());
        let sched = scheduler(Arc::clone(&sink), 1.0);
        sched.start().unwrap();
        sched.enqueue(vec![5u8]);
        sched.enqueue(vec![0u8]);
        sched.drain_and_schedule().unwrap();

        let status = sched.status();
        assert_eq!(status.state, StreamState::Streaming);
        assert_eq!(status.enqueued_total, 2);
        assert_eq!(status.scheduled_total, 1);
        assert_eq!(status.decode_errors_total, 1);
        assert_eq!(status.cursor, 1.5);
        assert_eq!(status.lookahead, 0.5);
        assert_eq!(status.scheduled_seconds, 0.5);
    }
}
