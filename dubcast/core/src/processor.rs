//! Stream Processor
//!
//! Owns one session's work: resolve the source, pick a format, launch the
//! decoder, then slice PCM into chunks and hand each to the translation pool.
//!
//! ```text
//!  run() ─► resolve ─► select format ─► decoder.open ─► [active]
//!                                                         │
//!        ┌──────────────── decode loop ◄──────────────────┘
//!        │  read (bounded wait) ─► accumulate ─► slice chunk
//!        │        ▲                                  │
//!        │        └── cancelled? stalled? EOF? ◄─────┤
//!        │                                           ▼ tokio::spawn
//!        │                               pool.run(translate_chunk)
//!        │                                           │
//!        │                    ok ─► session.deliver  │  err ─► failed_chunks
//! ```
//!
//! Dispatch never blocks the decode loop; per-chunk tasks run on the shared
//! [`TranslationPool`] and finish on their own even after the session stops.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;

use crate::config::{DubcastConfig, PipelineConfig};
use crate::decode::{AudioChunk, ChunkAccumulator, DecodeError, FfmpegDecoder, PcmDecoder, PcmFormat, PcmStream};
use crate::queue::TranslatedChunk;
use crate::session::{SessionError, SessionId, SessionStatus, StatusSnapshot, StreamSession};
use crate::source::{self, ExtractorError, FormatError, LiveSourceDescriptor, Resolver, YtDlpExtractor};
use crate::translator::{translate_chunk, ChunkJob, CommandTranslator, TranslationPool, Translator};

// ============================================================================
// Shared pipeline context
// ============================================================================

/// Collaborators and settings shared by every session
pub struct PipelineContext {
    /// Source resolver
    pub resolver: Resolver,
    /// PCM decoder
    pub decoder: Arc<dyn PcmDecoder>,
    /// Translation capability
    pub translator: Arc<dyn Translator>,
    /// Shared worker pool
    pub pool: TranslationPool,
    /// Chunking and limits
    pub pipeline: PipelineConfig,
    /// Model profile when a request omits one
    pub default_model_profile: String,
    /// Source language when a request omits one
    pub default_origin_language: String,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("pool", &self.pool)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    /// Assemble a context with default pipeline settings
    #[must_use]
    pub fn new(
        resolver: Resolver,
        decoder: Arc<dyn PcmDecoder>,
        translator: Arc<dyn Translator>,
        pool: TranslationPool,
    ) -> Self {
        Self {
            resolver,
            decoder,
            translator,
            pool,
            pipeline: PipelineConfig::default(),
            default_model_profile: "base".to_string(),
            default_origin_language: "Automatic detection".to_string(),
        }
    }

    /// Build the production context: yt-dlp, ffmpeg and the translator command
    ///
    /// # Errors
    ///
    /// Returns an error if the extractor's HTTP client cannot be built.
    pub fn from_config(config: &DubcastConfig) -> Result<Self, ExtractorError> {
        let extractor = Arc::new(YtDlpExtractor::new(&config.extractor)?);
        Ok(Self::new(
            Resolver::new(extractor),
            Arc::new(FfmpegDecoder::new(config.decoder_program.clone())),
            Arc::new(CommandTranslator::from_config(&config.translator)),
            TranslationPool::new(config.max_workers),
        )
        .with_pipeline(config.pipeline.clone())
        .with_defaults(
            config.translator.default_model_profile.clone(),
            config.translator.default_origin_language.clone(),
        ))
    }

    /// Replace the pipeline settings
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Replace the request defaults
    #[must_use]
    pub fn with_defaults(mut self, model_profile: String, origin_language: String) -> Self {
        self.default_model_profile = model_profile;
        self.default_origin_language = origin_language;
        self
    }

    /// PCM layout requested from the decoder
    #[must_use]
    pub fn pcm_format(&self) -> PcmFormat {
        PcmFormat::mono(self.pipeline.sample_rate)
    }
}

// ============================================================================
// Processor
// ============================================================================

/// Drives one session from `starting` to a terminal state
#[derive(Debug)]
pub struct StreamProcessor {
    session: Arc<StreamSession>,
    ctx: Arc<PipelineContext>,
}

impl StreamProcessor {
    /// Bind a processor to a freshly created session
    #[must_use]
    pub fn new(session: Arc<StreamSession>, ctx: Arc<PipelineContext>) -> Self {
        Self { session, ctx }
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    /// Shared session state
    #[must_use]
    pub fn session(&self) -> &Arc<StreamSession> {
        &self.session
    }

    /// Read-only status snapshot
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.session.snapshot()
    }

    /// Request a cooperative stop; observed once per decode-loop iteration
    pub fn stop(&self) -> SessionStatus {
        self.session.request_stop()
    }

    /// Wait up to `timeout` for the next translated chunk
    pub async fn get_next_chunk(&self, timeout: Duration) -> Option<TranslatedChunk> {
        self.session.next_chunk(timeout).await
    }

    /// Run the session to completion
    ///
    /// Failures end the session in `error`; nothing is returned to the caller.
    pub async fn run(&self) {
        let mut status = self.session.subscribe();
        let started = tokio::select! {
            result = self.start() => result,
            _ = status.wait_for(|s| s.is_terminal()) => Ok(None),
        };

        let stream = match started {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                tracing::info!("Session stopped before decoding began");
                return;
            }
            Err(e) => {
                self.session.fail(&e);
                return;
            }
        };

        match self.decode_loop(stream).await {
            Ok(()) => tracing::info!(
                chunks = self.session.counters().chunks_processed,
                "Decode loop finished"
            ),
            Err(e) => {
                self.session.fail(&SessionError::from(e));
            }
        }
    }

    /// Resolve, select and launch; `None` if stopped along the way
    async fn start(&self) -> Result<Option<PcmStream>, SessionError> {
        let descriptor = self
            .ctx
            .resolver
            .resolve(self.session.source_reference())
            .await?;
        if self.session.is_cancelled() {
            return Ok(None);
        }
        self.session.set_title(descriptor.title.clone());

        let media_url = self.select_media(&descriptor).await?;
        if self.session.is_cancelled() {
            return Ok(None);
        }

        let stream = self
            .ctx
            .decoder
            .open(&media_url, self.ctx.pcm_format())
            .await?;

        if !self.session.transition(SessionStatus::Active) {
            // Stopped while the decoder was launching.
            stream.close().await;
            return Ok(None);
        }
        Ok(Some(stream))
    }

    async fn select_media(&self, descriptor: &LiveSourceDescriptor) -> Result<String, SessionError> {
        let media_url = descriptor
            .media_url
            .as_deref()
            .ok_or(FormatError::MissingUrlField)?;

        let candidates = if descriptor.formats.is_empty() {
            match self.ctx.resolver.formats_for(media_url).await {
                Ok(formats) => formats,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not list formats");
                    return Err(FormatError::NoAudioFormat.into());
                }
            }
        } else {
            descriptor.formats.clone()
        };

        let chosen = source::choose(&candidates)?;
        tracing::info!(
            format_id = chosen.format_id.as_deref().unwrap_or("?"),
            score = chosen.score(),
            "Selected audio format"
        );
        chosen
            .url
            .ok_or(SessionError::Format(FormatError::MissingUrlField))
    }

    async fn decode_loop(&self, mut stream: PcmStream) -> Result<(), DecodeError> {
        let pipeline = &self.ctx.pipeline;
        let chunk_len = self
            .ctx
            .pcm_format()
            .chunk_len(self.session.options().chunk_duration_secs);
        let mut accumulator = ChunkAccumulator::new(chunk_len);
        let mut buf = vec![0u8; pipeline.read_size];
        let mut last_data = Instant::now();

        tracing::info!(chunk_len, "Decode loop started");

        loop {
            if self.session.is_cancelled() {
                stream.close().await;
                return Ok(());
            }

            match tokio::time::timeout(pipeline.read_timeout, stream.read(&mut buf)).await {
                Err(_) => {
                    if last_data.elapsed() >= pipeline.stall_timeout {
                        stream.close().await;
                        return Err(DecodeError::broken("decoder stalled"));
                    }
                }
                Ok(Ok(0)) => {
                    if self.session.is_cancelled() {
                        return Ok(());
                    }
                    return Err(stream.finish().await);
                }
                Ok(Ok(n)) => {
                    last_data = Instant::now();
                    accumulator.push(&buf[..n]);
                    while let Some(chunk) = accumulator.next_chunk() {
                        self.session.record_chunk();
                        self.dispatch(chunk);
                    }
                }
                Ok(Err(e)) => {
                    stream.close().await;
                    return Err(DecodeError::broken(format!("read failed: {e}")));
                }
            }
        }
    }

    fn dispatch(&self, chunk: AudioChunk) {
        let session = Arc::clone(&self.session);
        let translator = Arc::clone(&self.ctx.translator);
        let pool = self.ctx.pool.clone();
        let sequence = chunk.sequence;
        let options = session.options();
        let job = ChunkJob {
            chunk,
            format: self.ctx.pcm_format(),
            source_language: options.origin_language.clone(),
            target_language: session.language().label.to_string(),
            model_profile: options.model_profile.clone(),
        };

        tracing::debug!(sequence, "Dispatching chunk");
        tokio::spawn(
            async move {
                match pool.run(move || translate_chunk(translator.as_ref(), &job)).await {
                    Ok(audio) => {
                        tracing::debug!(sequence, bytes = audio.len(), "Chunk translated");
                        session.deliver(TranslatedChunk::new(sequence, audio));
                    }
                    Err(e) => {
                        session.record_failed_chunk();
                        tracing::warn!(sequence, error = %e, "Chunk translation failed, dropping chunk");
                    }
                }
            }
            .in_current_span(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages;
    use crate::session::SessionOptions;
    use crate::source::{EntrySummary, FormatCandidate, LiveExtractor};
    use crate::translator::{TranslationError, TranslationRequest};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    struct FixedExtractor(Result<LiveSourceDescriptor, ExtractorError>);

    #[async_trait]
    impl LiveExtractor for FixedExtractor {
        async fn extract(&self, _url: &str) -> Result<LiveSourceDescriptor, ExtractorError> {
            self.0.clone()
        }
        async fn recent_entries(&self, _: &str, _: usize) -> Result<Vec<EntrySummary>, ExtractorError> {
            Ok(Vec::new())
        }
        async fn fetch_page(&self, _: &str) -> Result<String, ExtractorError> {
            Ok(String::new())
        }
    }

    /// Hands out a pre-wired duplex reader once
    struct DuplexDecoder {
        reader: Mutex<Option<DuplexStream>>,
        opened: AtomicUsize,
        last_url: Mutex<Option<String>>,
    }

    impl DuplexDecoder {
        fn new(reader: DuplexStream) -> Self {
            Self {
                reader: Mutex::new(Some(reader)),
                opened: AtomicUsize::new(0),
                last_url: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl PcmDecoder for DuplexDecoder {
        async fn open(&self, media_url: &str, _format: PcmFormat) -> Result<PcmStream, DecodeError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            *self.last_url.lock() = Some(media_url.to_string());
            let reader = self
                .reader
                .lock()
                .take()
                .ok_or_else(|| DecodeError::broken("already opened"))?;
            Ok(PcmStream::from_reader(reader))
        }
    }

    struct EchoTranslator {
        dir: tempfile::TempDir,
        fail: bool,
    }

    impl Translator for EchoTranslator {
        fn translate(&self, _request: &TranslationRequest) -> Result<PathBuf, TranslationError> {
            if self.fail {
                return Err(TranslationError::Launch("offline".into()));
            }
            let out = self
                .dir
                .path()
                .join(format!("{}.out", uuid::Uuid::new_v4().simple()));
            std::fs::write(&out, b"translated")?;
            Ok(out)
        }
    }

    fn live(formats: Vec<FormatCandidate>) -> LiveSourceDescriptor {
        LiveSourceDescriptor {
            reference_url: "https://www.youtube.com/@news/live".into(),
            media_url: Some("https://media.example/page".into()),
            title: "News".into(),
            channel: None,
            view_count: None,
            is_live: true,
            formats,
        }
    }

    fn audio_format(url: &str) -> FormatCandidate {
        FormatCandidate {
            format_id: Some("233".into()),
            has_audio: true,
            has_video: false,
            audio_bitrate: Some(48.0),
            total_bitrate: None,
            url: Some(url.into()),
        }
    }

    fn processor(
        descriptor: Result<LiveSourceDescriptor, ExtractorError>,
        decoder: Arc<DuplexDecoder>,
        fail_translation: bool,
    ) -> StreamProcessor {
        let ctx = PipelineContext::new(
            Resolver::new(Arc::new(FixedExtractor(descriptor))),
            decoder,
            Arc::new(EchoTranslator {
                dir: tempfile::tempdir().unwrap(),
                fail: fail_translation,
            }),
            TranslationPool::new(2),
        )
        .with_pipeline(PipelineConfig {
            sample_rate: 100,
            read_timeout: Duration::from_millis(20),
            ..PipelineConfig::default()
        });
        let session = StreamSession::new(
            SessionId::generate("tamil"),
            languages::lookup("tamil").unwrap(),
            "@news".into(),
            SessionOptions {
                chunk_duration_secs: 1,
                model_profile: "base".into(),
                origin_language: "Automatic detection".into(),
            },
            16,
        );
        StreamProcessor::new(Arc::new(session), Arc::new(ctx))
    }

    async fn wait_for(p: &StreamProcessor, f: impl Fn(&StatusSnapshot) -> bool) -> StatusSnapshot {
        for _ in 0..500 {
            let snap = p.status();
            if f(&snap) {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached: {:?}", p.status());
    }

    #[tokio::test]
    async fn test_chunks_are_translated_and_queued() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let decoder = Arc::new(DuplexDecoder::new(rx));
        let p = Arc::new(processor(
            Ok(live(vec![audio_format("https://media.example/a")])),
            decoder.clone(),
            false,
        ));
        let runner = tokio::spawn({
            let p = p.clone();
            async move { p.run().await }
        });

        // 1s at 100 Hz mono s16 = 200 bytes per chunk; 450 bytes = 2 chunks
        tx.write_all(&[0u8; 450]).await.unwrap();

        let snap = wait_for(&p, |s| s.queued_chunks == 2).await;
        assert_eq!(snap.status, SessionStatus::Active);
        assert_eq!(snap.chunks_processed, 2);
        assert_eq!(snap.total_duration, 2.0);
        assert_eq!(snap.title.as_deref(), Some("News"));
        assert_eq!(decoder.last_url.lock().as_deref(), Some("https://media.example/a"));

        let mut seqs = vec![
            p.get_next_chunk(Duration::from_secs(1)).await.unwrap().sequence,
            p.get_next_chunk(Duration::from_secs(1)).await.unwrap().sequence,
        ];
        seqs.sort_unstable();
        assert_eq!(seqs, vec![0, 1]);

        assert_eq!(p.stop(), SessionStatus::Stopped);
        runner.await.unwrap();
        assert_eq!(p.status().status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_translation_failure_does_not_fail_session() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let p = Arc::new(processor(
            Ok(live(vec![audio_format("u")])),
            Arc::new(DuplexDecoder::new(rx)),
            true,
        ));
        let runner = tokio::spawn({
            let p = p.clone();
            async move { p.run().await }
        });

        tx.write_all(&[0u8; 200]).await.unwrap();

        let snap = wait_for(&p, |s| s.failed_chunks == 1).await;
        assert_eq!(snap.status, SessionStatus::Active);
        assert_eq!(snap.queued_chunks, 0);

        p.stop();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_fails_active_session() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(tx);
        let p = processor(
            Ok(live(vec![audio_format("u")])),
            Arc::new(DuplexDecoder::new(rx)),
            false,
        );

        p.run().await;

        let snap = p.status();
        assert_eq!(snap.status, SessionStatus::Error);
        assert_eq!(
            snap.error_message.as_deref(),
            Some("decode pipeline broken: unexpected end of input")
        );
    }

    #[tokio::test]
    async fn test_resolution_error_fails_from_starting() {
        let (_tx, rx) = tokio::io::duplex(64);
        let decoder = Arc::new(DuplexDecoder::new(rx));
        let p = processor(
            Err(ExtractorError::NotFound { url: "x".into() }),
            decoder.clone(),
            false,
        );

        p.run().await;

        assert_eq!(p.status().status, SessionStatus::Error);
        assert_eq!(decoder.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_media_url_is_format_error() {
        let (_tx, rx) = tokio::io::duplex(64);
        let mut descriptor = live(vec![audio_format("u")]);
        descriptor.media_url = None;
        let p = processor(Ok(descriptor), Arc::new(DuplexDecoder::new(rx)), false);

        p.run().await;

        let snap = p.status();
        assert_eq!(snap.status, SessionStatus::Error);
        assert_eq!(
            snap.error_message.as_deref(),
            Some("source descriptor has no media URL")
        );
    }

    #[tokio::test]
    async fn test_no_audio_format() {
        let (_tx, rx) = tokio::io::duplex(64);
        let mut video = audio_format("u");
        video.has_audio = false;
        let p = processor(Ok(live(vec![video])), Arc::new(DuplexDecoder::new(rx)), false);

        p.run().await;

        assert_eq!(
            p.status().error_message.as_deref(),
            Some("no audio-capable format available")
        );
    }

    #[tokio::test]
    async fn test_stop_before_run_never_opens_decoder() {
        let (_tx, rx) = tokio::io::duplex(64);
        let decoder = Arc::new(DuplexDecoder::new(rx));
        let p = processor(Ok(live(vec![audio_format("u")])), decoder.clone(), false);

        assert_eq!(p.stop(), SessionStatus::Stopped);
        p.run().await;

        assert_eq!(p.status().status, SessionStatus::Stopped);
        assert!(p.status().error_message.is_none());
        assert_eq!(decoder.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_decoder_fails_session() {
        let (_tx, rx) = tokio::io::duplex(64);
        let p = processor(
            Ok(live(vec![audio_format("u")])),
            Arc::new(DuplexDecoder::new(rx)),
            false,
        );

        p.run().await;

        assert_eq!(
            p.status().error_message.as_deref(),
            Some("decode pipeline broken: decoder stalled")
        );
    }
}
