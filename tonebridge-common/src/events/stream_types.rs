//! Stream lifecycle type definitions

use serde::{Deserialize, Serialize};

/// Scheduler stream state
///
/// `Idle` until the first `start()`. `Stopped` after `stop()` or after the
/// sink failed; a failed stream stays `Stopped` until the pipeline is rebuilt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum StreamState {
    /// Constructed, never started
    #[default]
    Idle,
    /// Draining the queue into the sink
    Streaming,
    /// Stopped by the owner or by a fatal sink error
    Stopped,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamState::Idle => write!(f, "Idle"),
            StreamState::Streaming => write!(f, "Streaming"),
            StreamState::Stopped => write!(f, "Stopped"),
        }
    }
}
