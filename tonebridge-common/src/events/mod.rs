//! Event types for the Tonebridge event system
//!
//! Provides the stream event definitions and the EventBus used to fan them out
//! to the owning application (SSE clients, logs, tests).

mod stream_types;

pub use stream_types::StreamState;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Tonebridge event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
/// Per-chunk problems (decode failure, overflow, underrun) are reported here
/// instead of being returned as errors from the scheduling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Stream state changed (Idle → Streaming, Streaming → Stopped, ...)
    StreamStateChanged {
        /// State before change
        old_state: StreamState,
        /// State after change
        new_state: StreamState,
        /// When state changed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A decoded chunk was handed to the sink
    ChunkScheduled {
        /// Arrival sequence number of the chunk
        sequence: u64,
        /// Playback clock time (seconds) at which the buffer starts
        start_time: f64,
        /// Buffer duration in seconds
        duration: f64,
        /// When the chunk was scheduled
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A chunk could not be decoded and was dropped
    DecodeError {
        /// Arrival sequence number of the dropped chunk
        sequence: u64,
        /// Decoder message
        message: String,
        /// When the failure occurred
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The queue was full; the oldest unscheduled chunk was dropped
    BacklogOverflow {
        /// Sequence number of the dropped chunk
        dropped_sequence: u64,
        /// Queue depth after the new chunk was appended
        queue_depth: usize,
        /// When the drop occurred
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The playback clock overtook the schedule cursor
    ///
    /// Fires once per gap in supply. The cursor is reset to `clock`.
    Underrun {
        /// Cursor value before the reset (seconds)
        cursor: f64,
        /// Playback clock when the underrun was detected (seconds)
        clock: f64,
        /// When the underrun was detected
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The sink rejected a buffer; the stream is stopped and must be rebuilt
    Fatal {
        /// Sink failure description
        message: String,
        /// When the failure occurred
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl StreamEvent {
    /// Variant name, used as the SSE event field
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::StreamStateChanged { .. } => "StreamStateChanged",
            StreamEvent::ChunkScheduled { .. } => "ChunkScheduled",
            StreamEvent::DecodeError { .. } => "DecodeError",
            StreamEvent::BacklogOverflow { .. } => "BacklogOverflow",
            StreamEvent::Underrun { .. } => "Underrun",
            StreamEvent::Fatal { .. } => "Fatal",
        }
    }
}

/// One-to-many event distribution built on `tokio::sync::broadcast`
///
/// Slow subscribers lag and lose the oldest events rather than blocking the
/// emitter; the scheduling loop must never wait on a listener.
pub struct EventBus {
    tx: broadcast::Sender<StreamEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use tonebridge_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    ///
    /// # Examples
    ///
    /// ```
    /// use tonebridge_common::events::{EventBus, StreamEvent, StreamState};
    ///
    /// let event_bus = EventBus::new(16);
    /// let event = StreamEvent::StreamStateChanged {
    ///     old_state: StreamState::Idle,
    ///     new_state: StreamState::Streaming,
    ///     timestamp: chrono::Utc::now(),
    /// };
    ///
    /// // Nobody is listening yet
    /// assert!(event_bus.emit(event).is_err());
    /// ```
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: StreamEvent,
    ) -> Result<usize, broadcast::error::SendError<StreamEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eventbus_subscribe_counts() {
        let bus = EventBus::new(8);
        assert_eq!(bus.subscriber_count(), 0);

        let _rx = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_eventbus_emit_with_subscriber() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(StreamEvent::Underrun {
            cursor: 1.0,
            clock: 2.5,
            timestamp: chrono::Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            StreamEvent::Underrun { cursor, clock, .. } => {
                assert_eq!(cursor, 1.0);
                assert_eq!(clock, 2.5);
            }
            other => panic!("Wrong event received: {:?}", other),
        }
    }

    #[test]
    fn test_emit_lossy_without_subscribers() {
        let bus = EventBus::new(8);
        bus.emit_lossy(StreamEvent::Fatal {
            message: "device gone".to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = StreamEvent::BacklogOverflow {
            dropped_sequence: 7,
            queue_depth: 32,
            timestamp: chrono::Utc::now(),
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BacklogOverflow");
        assert_eq!(json["dropped_sequence"], 7);
        assert_eq!(event.event_type(), "BacklogOverflow");
    }

    #[test]
    fn test_stream_state_display() {
        assert_eq!(StreamState::default(), StreamState::Idle);
        assert_eq!(StreamState::Streaming.to_string(), "Streaming");
        let json = serde_json::to_string(&StreamState::Stopped).unwrap();
        assert_eq!(json, "\"Stopped\"");
    }
}
