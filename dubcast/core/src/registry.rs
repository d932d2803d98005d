//! Stream Registry
//!
//! The one piece of cross-session mutable state: a map from session id to the
//! processor driving it. Every create/stop/list/remove goes through the same
//! mutex.
//!
//! ```text
//!                       StreamRegistry
//!        ┌───────────────────────────────────────────────┐
//!        │ Mutex<HashMap<SessionId, RegistryEntry>>      │
//!        │   entry = Arc<StreamProcessor> + JoinHandle   │
//!        └──────────────┬────────────────────────────────┘
//!                       │ create() spawns processor.run()
//!        ┌──────────────┼──────────────────┐
//!        ▼              ▼                  ▼
//!   tamil_1a2b3c4d  hindi_9f8e7d6c   tamil_0a1b2c3d
//!        │              │                  │
//!        └──────── shared PipelineContext ─┘
//!                 (resolver, decoder, pool)
//! ```
//!
//! Removing a session stops it and evicts it at once; its in-flight chunk
//! translations finish on the pool and their results are discarded.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::languages;
use crate::processor::{PipelineContext, StreamProcessor};
use crate::session::{SessionId, SessionOptions, StatusSnapshot, StreamSession};

/// Registry-level request failures
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No session with this id
    #[error("unknown stream id: {id}")]
    UnknownSessionId {
        /// The id that was looked up
        id: String,
    },

    /// Language key not in the supported table
    #[error("unsupported language: {language}")]
    UnsupportedLanguage {
        /// The requested key
        language: String,
    },

    /// Request options out of range
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Too many live sessions
    #[error("session limit reached ({limit} live sessions)")]
    CapacityReached {
        /// Configured maximum
        limit: usize,
    },
}

/// Body of a start request
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct StartRequest {
    /// Channel URL, video URL or handle
    #[serde(alias = "youtube_url")]
    pub source_reference: String,
    /// Chunk duration in seconds
    #[serde(default)]
    pub chunk_duration: Option<u32>,
    /// Translator model profile
    #[serde(default, alias = "transcriber_model")]
    pub model_profile: Option<String>,
    /// Source language, or "Automatic detection"
    #[serde(default)]
    pub origin_language: Option<String>,
}

impl StartRequest {
    /// Request with only a source reference
    #[must_use]
    pub fn new(source_reference: impl Into<String>) -> Self {
        Self {
            source_reference: source_reference.into(),
            ..Self::default()
        }
    }

    /// Set the chunk duration
    #[must_use]
    pub fn with_chunk_duration(mut self, secs: u32) -> Self {
        self.chunk_duration = Some(secs);
        self
    }

    /// Set the model profile
    #[must_use]
    pub fn with_model_profile(mut self, profile: impl Into<String>) -> Self {
        self.model_profile = Some(profile.into());
        self
    }
}

struct RegistryEntry {
    processor: Arc<StreamProcessor>,
    task: JoinHandle<()>,
}

/// Owns every live session
pub struct StreamRegistry {
    sessions: Mutex<HashMap<SessionId, RegistryEntry>>,
    ctx: Arc<PipelineContext>,
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("sessions", &self.len())
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl StreamRegistry {
    /// Create an empty registry over a shared pipeline context
    #[must_use]
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ctx: Arc::new(ctx),
        }
    }

    /// Shared pipeline context
    #[must_use]
    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// Create a session and launch its processor in the background
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnsupportedLanguage`], [`RegistryError::InvalidOptions`]
    /// or [`RegistryError::CapacityReached`].
    pub fn create(
        &self,
        language: &str,
        request: StartRequest,
    ) -> Result<Arc<StreamProcessor>, RegistryError> {
        let target = languages::lookup(language).ok_or_else(|| RegistryError::UnsupportedLanguage {
            language: language.to_string(),
        })?;
        let options = self.options_for(&request)?;

        let mut sessions = self.sessions.lock();

        let limit = self.ctx.pipeline.max_sessions;
        let live = sessions
            .values()
            .filter(|e| !e.processor.session().status().is_terminal())
            .count();
        if live >= limit {
            tracing::warn!(live, limit, "Refusing new session");
            return Err(RegistryError::CapacityReached { limit });
        }

        let mut id = SessionId::generate(target.key);
        while sessions.contains_key(&id) {
            id = SessionId::generate(target.key);
        }

        let session = Arc::new(StreamSession::new(
            id.clone(),
            target,
            request.source_reference,
            options,
            self.ctx.pipeline.max_queued_chunks,
        ));
        let processor = Arc::new(StreamProcessor::new(session, Arc::clone(&self.ctx)));

        let span = tracing::info_span!("session", session_id = %id);
        let runner = Arc::clone(&processor);
        let task = tokio::spawn(async move { runner.run().await }.instrument(span));

        sessions.insert(
            id.clone(),
            RegistryEntry {
                processor: Arc::clone(&processor),
                task,
            },
        );

        tracing::info!(
            session_id = %id,
            language = target.key,
            source = processor.session().source_reference(),
            total = sessions.len(),
            "Session created"
        );
        Ok(processor)
    }

    fn options_for(&self, request: &StartRequest) -> Result<SessionOptions, RegistryError> {
        if request.source_reference.trim().is_empty() {
            return Err(RegistryError::InvalidOptions(
                "source_reference must not be empty".to_string(),
            ));
        }

        let pipeline = &self.ctx.pipeline;
        let chunk = request
            .chunk_duration
            .unwrap_or(pipeline.default_chunk_duration_secs);
        if chunk < pipeline.min_chunk_duration_secs || chunk > pipeline.max_chunk_duration_secs {
            return Err(RegistryError::InvalidOptions(format!(
                "chunk_duration must be between {} and {} seconds, got {chunk}",
                pipeline.min_chunk_duration_secs, pipeline.max_chunk_duration_secs
            )));
        }

        Ok(SessionOptions {
            chunk_duration_secs: chunk,
            model_profile: request
                .model_profile
                .clone()
                .unwrap_or_else(|| self.ctx.default_model_profile.clone()),
            origin_language: request
                .origin_language
                .clone()
                .unwrap_or_else(|| self.ctx.default_origin_language.clone()),
        })
    }

    /// Look up a session's processor
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Arc<StreamProcessor>> {
        self.sessions
            .lock()
            .get(id)
            .map(|e| Arc::clone(&e.processor))
    }

    /// Status of one session
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownSessionId`] if the id is not registered.
    pub fn status(&self, id: &SessionId) -> Result<StatusSnapshot, RegistryError> {
        self.get(id)
            .map(|p| p.status())
            .ok_or_else(|| unknown(id))
    }

    /// Consistent snapshot of all sessions, oldest first
    #[must_use]
    pub fn list(&self) -> Vec<StatusSnapshot> {
        let mut snapshots: Vec<StatusSnapshot> = self
            .sessions
            .lock()
            .values()
            .map(|e| e.processor.status())
            .collect();
        snapshots.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.stream_id.cmp(&b.stream_id))
        });
        snapshots
    }

    /// Stop a session and evict it
    ///
    /// Returns the final snapshot.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownSessionId`] if the id is not registered.
    pub fn remove(&self, id: &SessionId) -> Result<StatusSnapshot, RegistryError> {
        let entry = self.sessions.lock().remove(id).ok_or_else(|| unknown(id))?;
        let status = entry.processor.stop();
        entry.processor.session().mark_evicted();
        tracing::info!(session_id = %id, status = %status, "Session removed");
        Ok(entry.processor.status())
    }

    /// Registered sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no sessions are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Sessions not yet stopped or failed
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|e| !e.processor.session().status().is_terminal())
            .count()
    }

    /// Stop and evict every session, then drain and close the worker pool
    pub async fn shutdown(&self) {
        let entries: Vec<(SessionId, RegistryEntry)> = self.sessions.lock().drain().collect();
        tracing::info!(sessions = entries.len(), "Shutting down registry");

        for (_, entry) in &entries {
            entry.processor.stop();
            entry.processor.session().mark_evicted();
        }
        for (id, entry) in entries {
            if let Err(e) = entry.task.await {
                tracing::warn!(session_id = %id, error = %e, "Session task ended abnormally");
            }
        }

        self.ctx.pool.drain().await;
    }
}

fn unknown(id: &SessionId) -> RegistryError {
    RegistryError::UnknownSessionId {
        id: id.to_string(),
    }
}
