//! Per-Session Output Queue
//!
//! Translated chunks land here in completion order and are drained by the
//! delivery loop. The queue is bounded; when it is full the oldest chunk is
//! dropped so a stalled consumer never holds back a live session.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// A translated chunk ready for delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslatedChunk {
    /// Sequence id of the source chunk
    pub sequence: u64,
    /// Translated audio bytes
    pub audio: Vec<u8>,
    /// When the translation finished
    pub created_at: DateTime<Utc>,
}

impl TranslatedChunk {
    /// Stamp a translation result with the current time
    #[must_use]
    pub fn new(sequence: u64, audio: Vec<u8>) -> Self {
        Self {
            sequence,
            audio,
            created_at: Utc::now(),
        }
    }
}

/// Bounded, drop-oldest queue with an async bounded wait
#[derive(Debug)]
pub struct OutputQueue {
    items: Mutex<VecDeque<TranslatedChunk>>,
    capacity: usize,
    notify: Notify,
}

impl OutputQueue {
    /// Create a queue holding at most `capacity` chunks
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Enqueue a chunk, returning the chunk evicted to make room, if any
    pub fn push(&self, chunk: TranslatedChunk) -> Option<TranslatedChunk> {
        let dropped = {
            let mut items = self.items.lock();
            let dropped = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(chunk);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Take the oldest chunk without waiting
    pub fn try_pop(&self) -> Option<TranslatedChunk> {
        self.items.lock().pop_front()
    }

    /// Wait up to `timeout` for a chunk; `None` on timeout
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<TranslatedChunk> {
        let wait = async {
            loop {
                // Register interest before checking so a push in between is not lost.
                let notified = self.notify.notified();
                if let Some(chunk) = self.try_pop() {
                    return chunk;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// Number of queued chunks
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Drop every queued chunk
    pub fn clear(&self) {
        self.items.lock().clear();
    }
}
