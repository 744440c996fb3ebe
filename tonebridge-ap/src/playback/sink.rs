//! Audio sink abstraction
//!
//! A sink renders a decoded buffer starting at an exact playback-clock time.
//! Scheduling is fire-and-forget; a start time already in the past renders as
//! soon as possible.

use crate::audio::types::{DecodedBuffer, Timestamp};
use crate::error::SinkError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};

/// Platform audio output
pub trait AudioSink: Send + Sync {
    /// Render `buffer` beginning at `start`
    fn schedule(&self, buffer: DecodedBuffer, start: Timestamp) -> Result<(), SinkError>;

    /// Exclusive-use token; one scheduler per sink
    fn lease(&self) -> &SinkLease;
}

/// Exclusive-use token embedded in every sink
///
/// A scheduler acquires the lease on construction and releases it when
/// dropped, so two schedulers can never program the same output.
#[derive(Debug, Default)]
pub struct SinkLease {
    held: AtomicBool,
}

impl SinkLease {
    /// Create an unheld lease
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease; false if already held
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give the lease back
    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    /// Whether a scheduler currently holds the lease
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// One schedule call as seen by the headless sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEntry {
    /// Source chunk sequence number
    pub sequence: u64,
    /// Requested start time
    pub start: Timestamp,
    /// Buffer duration in seconds
    pub duration: f64,
}

/// Headless sink: accepts buffers and records what would have played
///
/// Pairs with `SystemClock` when no audio device is wanted. Keeps the most
/// recent `history_limit` schedule calls for inspection.
pub struct NullSink {
    lease: SinkLease,
    history: Mutex<VecDeque<ScheduledEntry>>,
    history_limit: usize,
    scheduled_total: AtomicU64,
    closed: AtomicBool,
}

impl NullSink {
    /// Default number of remembered schedule calls
    pub const DEFAULT_HISTORY: usize = 1024;

    /// Create a sink remembering the last `DEFAULT_HISTORY` calls
    pub fn new() -> Self {
        Self::with_history(Self::DEFAULT_HISTORY)
    }

    /// Create a sink remembering the last `history_limit` calls
    pub fn with_history(history_limit: usize) -> Self {
        Self {
            lease: SinkLease::new(),
            history: Mutex::new(VecDeque::with_capacity(history_limit.min(4096))),
            history_limit,
            scheduled_total: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Recorded schedule calls, oldest first
    pub fn history(&self) -> Vec<ScheduledEntry> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Total buffers accepted since construction
    pub fn scheduled_total(&self) -> u64 {
        self.scheduled_total.load(Ordering::Relaxed)
    }

    /// Refuse all further buffers, as a vanished device would
    pub fn close(&self) {
        debug!("Null sink closed");
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for NullSink {
    fn schedule(&self, buffer: DecodedBuffer, start: Timestamp) -> Result<(), SinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("sink closed".to_string()));
        }

        let entry = ScheduledEntry {
            sequence: buffer.sequence,
            start,
            duration: buffer.duration_seconds(),
        };
        trace!(
            "Null sink: chunk {} at {:.4}s for {:.4}s",
            entry.sequence,
            entry.start,
            entry.duration
        );

        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if self.history_limit > 0 {
            if history.len() == self.history_limit {
                history.pop_front();
            }
            history.push_back(entry);
        }
        self.scheduled_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn lease(&self) -> &SinkLease {
        &self.lease
    }
}
