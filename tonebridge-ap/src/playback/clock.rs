//! Playback clock abstraction
//!
//! The scheduler never keeps time itself. It asks the clock of the device it
//! is feeding, so start times and "now" are always on the same timeline.

use crate::audio::types::Timestamp;
use std::time::Instant;

/// Monotonic playback position of the audio output, in seconds
pub trait PlaybackClock: Send + Sync {
    /// Current playback position
    fn now(&self) -> Timestamp;
}

/// Wall-clock time since construction
///
/// Used with the headless sink, where no hardware position exists.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Start a clock at 0.0
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for SystemClock {
    fn now(&self) -> Timestamp {
        self.origin.elapsed().as_secs_f64()
    }
}
