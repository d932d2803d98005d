//! Delivery Loop
//!
//! Pulls translated chunks off one session's output queue and turns them
//! into a stream of multipart frames.
//!
//! ```text
//!   wait for starting ─► active (bounded by activation_timeout)
//!        │
//!        ▼
//!   ┌─► active and not cancelled? ── no ──► end of stream
//!   │        │ yes
//!   │        ▼
//!   │   next_chunk(poll_timeout)
//!   │     ├─ chunk ──► Chunk frame
//!   │     └─ none  ──► KeepAlive frame
//!   │        │
//!   └─ sleep(pacing)
//! ```
//!
//! Frames arrive in completion order; consumers reassemble by sequence id.

pub mod frame;

pub use frame::{encode, DeliveryFrame, FrameError, MultipartDecoder, BOUNDARY, CONTENT_TYPE};

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::config::DeliveryConfig;
use crate::session::{SessionStatus, StreamSession};

/// Pull loop bound to one session
#[derive(Clone, Debug)]
pub struct DeliveryLoop {
    session: Arc<StreamSession>,
    config: DeliveryConfig,
}

impl DeliveryLoop {
    /// Bind a loop to a session
    #[must_use]
    pub fn new(session: Arc<StreamSession>, config: DeliveryConfig) -> Self {
        Self { session, config }
    }

    /// Wait for a `starting` session to become `active`
    ///
    /// Returns `false` if it failed, stopped or did not activate in time.
    pub async fn wait_until_active(&self) -> bool {
        let mut status = self.session.subscribe();
        let waited = tokio::time::timeout(
            self.config.activation_timeout,
            status.wait_for(|s| *s != SessionStatus::Starting),
        )
        .await;
        match waited {
            Ok(Ok(current)) => *current == SessionStatus::Active,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::info!(
                    session_id = %self.session.id(),
                    timeout_secs = self.config.activation_timeout.as_secs(),
                    "Session did not become active in time"
                );
                false
            }
        }
    }

    fn is_streaming(&self) -> bool {
        self.session.status() == SessionStatus::Active && !self.session.is_cancelled()
    }

    async fn next_frame(&self) -> Option<DeliveryFrame> {
        if !self.is_streaming() {
            tracing::debug!(session_id = %self.session.id(), "Delivery loop finished");
            return None;
        }
        match self.session.next_chunk(self.config.poll_timeout).await {
            Some(chunk) => Some(chunk.into()),
            None if self.is_streaming() => Some(DeliveryFrame::KeepAlive),
            None => None,
        }
    }

    /// Frames until the session leaves `active`
    pub fn frames(self) -> impl Stream<Item = DeliveryFrame> + Send + 'static {
        stream::unfold((self, false), |(this, started)| async move {
            if started {
                tokio::time::sleep(this.config.pacing).await;
            } else if !this.wait_until_active().await {
                return None;
            }
            let frame = this.next_frame().await?;
            Some((frame, (this, true)))
        })
    }

    /// Encoded frames, ready to be used as a response body
    pub fn into_body_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        self.frames().map(|frame| Ok(encode(&frame)))
    }
}
