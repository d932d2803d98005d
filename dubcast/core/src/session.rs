//! Stream Sessions
//!
//! A session is one live source being translated into one target language.
//! Its shared state is read by status queries and the delivery loop while the
//! owning processor and per-chunk tasks mutate it.
//!
//! # Lifecycle
//!
//! ```text
//!              resolve + select + decoder launched
//!   starting ─────────────────────────────────────► active
//!      │  │                                          │  │
//!      │  └── resolution / format error ──► error ◄──┘  │ decode pipeline failure
//!      │                                                │
//!      └──────────── stop() ─────────► stopped ◄────────┘ stop()
//! ```
//!
//! `stopped` and `error` are terminal. Transitions go through a
//! `tokio::sync::watch` channel so waiters (the delivery loop) observe them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::decode::DecodeError;
use crate::languages::TargetLanguage;
use crate::queue::{OutputQueue, TranslatedChunk};
use crate::source::{FormatError, ResolutionError};

// ============================================================================
// Identity
// ============================================================================

/// Unique session identifier: `<language>_<8 hex chars>`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh id for a language key
    #[must_use]
    pub fn generate(language: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{language}_{}", &suffix[..8]))
    }

    /// The id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Lifecycle state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Resolving the source and launching the decoder
    Starting,
    /// Decoding and dispatching chunks
    Active,
    /// Stopped on request
    Stopped,
    /// Failed; see the error message
    Error,
}

impl SessionStatus {
    /// Whether no further transition is possible
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Whether moving to `next` is a legal transition
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Active | Self::Stopped | Self::Error)
                | (Self::Active, Self::Stopped | Self::Error)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Errors that end a session in the `error` state
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Source resolution failed
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// No usable format
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The decode pipeline broke
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

// ============================================================================
// Options and snapshots
// ============================================================================

/// Per-session knobs fixed at creation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Nominal chunk duration in seconds
    pub chunk_duration_secs: u32,
    /// Translator model profile
    pub model_profile: String,
    /// Source language passed to the translator
    pub origin_language: String,
}

/// Mutable progress counters
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SessionCounters {
    /// Chunks sliced and dispatched
    pub chunks_processed: u64,
    /// Nominal seconds dispatched
    pub total_duration: f64,
    /// Chunks whose translation failed
    pub failed_chunks: u64,
    /// Translated chunks evicted from a full output queue
    pub dropped_chunks: u64,
}

/// Read-only view of a session, as reported by status and listing
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Session id
    pub stream_id: SessionId,
    /// Lifecycle state
    pub status: SessionStatus,
    /// Language key
    pub language: String,
    /// Language label handed to the translator
    pub target_language: String,
    /// Reference as given at creation
    pub source_reference: String,
    /// Nominal chunk duration
    pub chunk_duration: u32,
    /// Chunks sliced and dispatched
    pub chunks_processed: u64,
    /// Nominal seconds dispatched
    pub total_duration: f64,
    /// Chunks lost to translator failures
    pub failed_chunks: u64,
    /// Chunks lost to queue overflow
    pub dropped_chunks: u64,
    /// Chunks waiting for delivery
    pub queued_chunks: usize,
    /// Why the session failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Broadcast title once resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Shared session state
// ============================================================================

/// State shared between a processor, its chunk tasks and readers
#[derive(Debug)]
pub struct StreamSession {
    id: SessionId,
    language: TargetLanguage,
    source_reference: String,
    options: SessionOptions,
    created_at: DateTime<Utc>,
    status: watch::Sender<SessionStatus>,
    counters: Mutex<SessionCounters>,
    error_message: Mutex<Option<String>>,
    title: Mutex<Option<String>>,
    cancelled: AtomicBool,
    evicted: AtomicBool,
    queue: OutputQueue,
}

impl StreamSession {
    /// Create a session in the `starting` state
    #[must_use]
    pub fn new(
        id: SessionId,
        language: TargetLanguage,
        source_reference: String,
        options: SessionOptions,
        max_queued_chunks: usize,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::Starting);
        Self {
            id,
            language,
            source_reference,
            options,
            created_at: Utc::now(),
            status,
            counters: Mutex::new(SessionCounters::default()),
            error_message: Mutex::new(None),
            title: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
            queue: OutputQueue::new(max_queued_chunks),
        }
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Target language
    #[must_use]
    pub fn language(&self) -> TargetLanguage {
        self.language
    }

    /// Reference as given at creation
    #[must_use]
    pub fn source_reference(&self) -> &str {
        &self.source_reference
    }

    /// Creation options
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch status changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Apply a transition if legal; returns whether it was applied
    pub fn transition(&self, next: SessionStatus) -> bool {
        let applied = self.status.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if applied {
            tracing::info!(session_id = %self.id, status = %next, "Session status changed");
        }
        applied
    }

    /// Move to `error`, recording why
    ///
    /// Ignored if the session already reached a terminal state.
    pub fn fail(&self, err: &SessionError) -> bool {
        let message = err.to_string();
        let applied = self.status.send_if_modified(|current| {
            if current.can_transition_to(SessionStatus::Error) {
                *self.error_message.lock() = Some(message.clone());
                *current = SessionStatus::Error;
                true
            } else {
                false
            }
        });
        if applied {
            tracing::error!(session_id = %self.id, error = %message, "Session failed");
        }
        applied
    }

    /// Request a cooperative stop
    ///
    /// Sets the cancellation flag and moves `starting`/`active` to `stopped`.
    /// Returns the status after the call.
    pub fn request_stop(&self) -> SessionStatus {
        self.cancelled.store(true, Ordering::SeqCst);
        self.transition(SessionStatus::Stopped);
        self.status()
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Mark as removed from the registry; late results are discarded
    pub fn mark_evicted(&self) {
        self.evicted.store(true, Ordering::SeqCst);
        self.queue.clear();
    }

    /// Whether the registry has evicted this session
    #[must_use]
    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::SeqCst)
    }

    /// Record the resolved broadcast title
    pub fn set_title(&self, title: String) {
        *self.title.lock() = Some(title);
    }

    /// Count one dispatched chunk of nominal duration
    pub fn record_chunk(&self) {
        let mut counters = self.counters.lock();
        counters.chunks_processed += 1;
        counters.total_duration += f64::from(self.options.chunk_duration_secs);
    }

    /// Count one chunk lost to a translator failure
    pub fn record_failed_chunk(&self) {
        self.counters.lock().failed_chunks += 1;
    }

    /// Enqueue a translated chunk for delivery
    ///
    /// Discards the chunk if the session was evicted; counts overflow drops.
    pub fn deliver(&self, chunk: TranslatedChunk) {
        if self.is_evicted() {
            tracing::debug!(session_id = %self.id, sequence = chunk.sequence, "Discarding result for evicted session");
            return;
        }
        if let Some(dropped) = self.queue.push(chunk) {
            self.counters.lock().dropped_chunks += 1;
            tracing::warn!(
                session_id = %self.id,
                sequence = dropped.sequence,
                "Output queue full, dropped oldest chunk"
            );
        }
    }

    /// Wait up to `timeout` for the next translated chunk
    pub async fn next_chunk(&self, timeout: Duration) -> Option<TranslatedChunk> {
        self.queue.pop_timeout(timeout).await
    }

    /// Current counters
    #[must_use]
    pub fn counters(&self) -> SessionCounters {
        *self.counters.lock()
    }

    /// Read-only snapshot for status queries
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        let counters = self.counters();
        StatusSnapshot {
            stream_id: self.id.clone(),
            status: self.status(),
            language: self.language.key.to_string(),
            target_language: self.language.label.to_string(),
            source_reference: self.source_reference.clone(),
            chunk_duration: self.options.chunk_duration_secs,
            chunks_processed: counters.chunks_processed,
            total_duration: counters.total_duration,
            failed_chunks: counters.failed_chunks,
            dropped_chunks: counters.dropped_chunks,
            queued_chunks: self.queue.len(),
            error_message: self.error_message.lock().clone(),
            title: self.title.lock().clone(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages;

    fn session(max_queued: usize) -> StreamSession {
        StreamSession::new(
            SessionId::generate("tamil"),
            languages::lookup("tamil").unwrap(),
            "@news".into(),
            SessionOptions {
                chunk_duration_secs: 30,
                model_profile: "base".into(),
                origin_language: "Automatic detection".into(),
            },
            max_queued,
        )
    }

    #[test]
    fn test_session_id_format() {
        let id = SessionId::generate("hindi");
        let (lang, suffix) = id.as_str().split_once('_').unwrap();
        assert_eq!(lang, "hindi");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(SessionId::generate("hindi"), id);
    }

    #[test]
    fn test_transition_table() {
        use SessionStatus::*;
        assert!(Starting.can_transition_to(Active));
        assert!(Starting.can_transition_to(Stopped));
        assert!(Starting.can_transition_to(Error));
        assert!(Active.can_transition_to(Error));
        assert!(Active.can_transition_to(Stopped));
        assert!(!Active.can_transition_to(Starting));
        assert!(!Error.can_transition_to(Active));
        assert!(!Stopped.can_transition_to(Active));
        assert!(!Stopped.can_transition_to(Error));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SessionStatus::Active).unwrap(), "\"active\"");
        assert_eq!(SessionStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_stop_from_starting() {
        let s = session(4);
        assert_eq!(s.request_stop(), SessionStatus::Stopped);
        assert!(s.is_cancelled());
        assert!(!s.transition(SessionStatus::Active));
    }

    #[test]
    fn test_fail_records_message_once() {
        let s = session(4);
        assert!(s.transition(SessionStatus::Active));
        let err = SessionError::from(DecodeError::PipelineBroken {
            reason: "unexpected end of input".into(),
        });
        assert!(s.fail(&err));
        assert!(!s.fail(&SessionError::from(FormatError::NoAudioFormat)));

        let snap = s.snapshot();
        assert_eq!(snap.status, SessionStatus::Error);
        assert_eq!(
            snap.error_message.as_deref(),
            Some("decode pipeline broken: unexpected end of input")
        );
    }

    #[test]
    fn test_fail_after_stop_is_ignored() {
        let s = session(4);
        s.request_stop();
        assert!(!s.fail(&SessionError::from(FormatError::NoAudioFormat)));
        assert!(s.snapshot().error_message.is_none());
    }

    #[test]
    fn test_snapshot_is_read_only() {
        let s = session(4);
        s.record_chunk();
        s.record_chunk();
        let first = s.snapshot();
        let second = s.snapshot();
        assert_eq!(first, second);
        assert_eq!(first.chunks_processed, 2);
        assert_eq!(first.total_duration, 60.0);
    }

    #[test]
    fn test_overflow_counts_dropped_chunks() {
        let s = session(1);
        s.deliver(TranslatedChunk::new(0, vec![]));
        s.deliver(TranslatedChunk::new(1, vec![]));
        let snap = s.snapshot();
        assert_eq!(snap.dropped_chunks, 1);
        assert_eq!(snap.queued_chunks, 1);
    }

    #[test]
    fn test_evicted_session_discards_results() {
        let s = session(4);
        s.mark_evicted();
        s.deliver(TranslatedChunk::new(0, vec![1]));
        assert_eq!(s.snapshot().queued_chunks, 0);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let s = session(4);
        let json = serde_json::to_value(s.snapshot()).unwrap();
        assert_eq!(json["status"], "starting");
        assert_eq!(json["language"], "tamil");
        assert_eq!(json["target_language"], "Tamil (ta)");
        assert!(json.get("error_message").is_none());
    }
}
