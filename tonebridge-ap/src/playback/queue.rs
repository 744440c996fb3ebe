//! Bounded FIFO of arrived, not yet scheduled chunks
//!
//! Producers push from any task while the drain loop pops, so the queue has its
//! own lock, separate from the scheduler's state. Sequence numbers are assigned
//! under that lock: arrival order, sequence order and queue order always agree.

use crate::audio::types::EncodedChunk;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Result of pushing a chunk
#[derive(Debug)]
pub enum PushResult {
    /// Appended with this sequence number
    Queued { sequence: u64 },
    /// Appended, but the queue was full and the oldest chunk was displaced
    Displaced { sequence: u64, dropped: EncodedChunk },
    /// Queue is closed (stream stopped); nothing was appended
    Refused,
}

struct QueueInner {
    chunks: VecDeque<EncodedChunk>,
    accepting: bool,
    next_sequence: u64,
}

/// Concurrency-safe bounded chunk queue
pub struct ChunkQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    arrivals: Notify,
}

impl ChunkQueue {
    /// Create an open queue holding at most `capacity` chunks (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                chunks: VecDeque::with_capacity(capacity),
                accepting: true,
                next_sequence: 0,
            }),
            capacity,
            arrivals: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append encoded bytes at the tail, dropping the head if full
    pub fn push(&self, bytes: impl Into<Arc<[u8]>>) -> PushResult {
        let result = {
            let mut inner = self.lock();
            if !inner.accepting {
                return PushResult::Refused;
            }

            let sequence = inner.next_sequence;
            inner.next_sequence += 1;

            let dropped = if inner.chunks.len() >= self.capacity {
                inner.chunks.pop_front()
            } else {
                None
            };
            inner.chunks.push_back(EncodedChunk::new(sequence, bytes));

            match dropped {
                Some(dropped) => PushResult::Displaced { sequence, dropped },
                None => PushResult::Queued { sequence },
            }
        };

        self.arrivals.notify_one();
        result
    }

    /// Take the head chunk
    pub fn pop(&self) -> Option<EncodedChunk> {
        self.lock().chunks.pop_front()
    }

    /// Stop accepting and discard everything queued; returns how many were discarded
    pub fn close_and_clear(&self) -> usize {
        let mut inner = self.lock();
        inner.accepting = false;
        let discarded = inner.chunks.len();
        inner.chunks.clear();
        discarded
    }

    /// Accept chunks again
    pub fn open(&self) {
        self.lock().accepting = true;
    }

    /// Whether pushes are currently accepted
    pub fn is_accepting(&self) -> bool {
        self.lock().accepting
    }

    /// Number of queued chunks
    pub fn len(&self) -> usize {
        self.lock().chunks.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.lock().chunks.is_empty()
    }

    /// Maximum queued chunks
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence numbers currently queued, head first
    pub fn sequences(&self) -> Vec<u64> {
        self.lock().chunks.iter().map(EncodedChunk::sequence).collect()
    }

    /// Resolves after the next push (or immediately if one happened unobserved)
    pub fn arrival(&self) -> Notified<'_> {
        self.arrivals.notified()
    }
}
