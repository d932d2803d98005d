//! In-memory collaborators for pipeline tests
//!
//! Nothing here touches the network or spawns external programs.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use dubcast_core::config::PipelineConfig;
use dubcast_core::source::{EntrySummary, ExtractorError};
use dubcast_core::{
    DecodeError, FormatCandidate, LiveExtractor, LiveSourceDescriptor, PcmDecoder, PcmFormat,
    PcmStream, PipelineContext, Resolver, StatusSnapshot, StreamProcessor, TranslationError,
    TranslationPool, TranslationRequest, Translator,
};

/// Sample rate used by every test pipeline; 30 s chunks are 6000 bytes
pub const TEST_SAMPLE_RATE: u32 = 100;

// =============================================================================
// Extractor
// =============================================================================

/// Extractor answering from fixed tables
#[derive(Default)]
pub struct MockExtractor {
    live: HashMap<String, LiveSourceDescriptor>,
    entries: HashMap<String, Vec<EntrySummary>>,
    block: bool,
    pub calls: AtomicUsize,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `url` as live with a single audio format
    pub fn with_live(mut self, url: &str, title: &str) -> Self {
        self.live.insert(url.to_string(), live_descriptor(url, title));
        self
    }

    /// List `entries` as the recent uploads of `channel_url`
    pub fn with_entries(mut self, channel_url: &str, entries: Vec<EntrySummary>) -> Self {
        self.entries.insert(channel_url.to_string(), entries);
        self
    }

    /// Never answer, leaving sessions in `starting`
    pub fn blocking() -> Self {
        Self {
            block: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl LiveExtractor for MockExtractor {
    async fn extract(&self, url: &str) -> Result<LiveSourceDescriptor, ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.block {
            std::future::pending::<()>().await;
        }
        self.live
            .get(url)
            .cloned()
            .ok_or_else(|| ExtractorError::NotLive {
                url: url.to_string(),
            })
    }

    async fn recent_entries(
        &self,
        channel_url: &str,
        limit: usize,
    ) -> Result<Vec<EntrySummary>, ExtractorError> {
        Ok(self
            .entries
            .get(channel_url)
            .map(|e| e.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_page(&self, _url: &str) -> Result<String, ExtractorError> {
        Ok(String::new())
    }
}

pub fn live_descriptor(url: &str, title: &str) -> LiveSourceDescriptor {
    LiveSourceDescriptor {
        reference_url: url.to_string(),
        media_url: Some(url.to_string()),
        title: title.to_string(),
        channel: None,
        view_count: Some(42),
        is_live: true,
        formats: vec![
            FormatCandidate {
                format_id: Some("video".into()),
                has_audio: true,
                has_video: true,
                audio_bitrate: Some(128.0),
                total_bitrate: Some(2_000.0),
                url: Some(format!("memory://{title}/video")),
            },
            FormatCandidate {
                format_id: Some("audio".into()),
                has_audio: true,
                has_video: false,
                audio_bitrate: Some(64.0),
                total_bitrate: None,
                url: Some(format!("memory://{title}/audio")),
            },
        ],
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Decoder that plays a fixed PCM buffer and then stays open like a live feed
pub struct MemoryDecoder {
    pcm: Vec<u8>,
    pub opened: AtomicUsize,
    pub urls: parking_lot::Mutex<Vec<String>>,
}

impl MemoryDecoder {
    /// `seconds` of silence at [`TEST_SAMPLE_RATE`]
    pub fn seconds(seconds: u32) -> Self {
        Self {
            pcm: vec![0u8; PcmFormat::mono(TEST_SAMPLE_RATE).chunk_len(seconds)],
            opened: AtomicUsize::new(0),
            urls: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PcmDecoder for MemoryDecoder {
    async fn open(&self, media_url: &str, _format: PcmFormat) -> Result<PcmStream, DecodeError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(media_url.to_string());

        let (mut writer, reader) = tokio::io::duplex(16 * 1024);
        let pcm = self.pcm.clone();
        tokio::spawn(async move {
            if writer.write_all(&pcm).await.is_ok() {
                // Hold the writer so the reader never sees end of stream.
                std::future::pending::<()>().await;
            }
        });
        Ok(PcmStream::from_reader(reader))
    }
}

// =============================================================================
// Translator
// =============================================================================

/// Translator writing `<target>:wav` (or `:raw`) to a file it owns
pub struct FileTranslator {
    dir: tempfile::TempDir,
    fail: bool,
    pub calls: AtomicUsize,
}

impl FileTranslator {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

impl Translator for FileTranslator {
    fn translate(&self, request: &TranslationRequest) -> Result<PathBuf, TranslationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TranslationError::CommandFailed {
                status: "exit status: 1".into(),
                stderr: "model crashed".into(),
            });
        }
        let input = std::fs::read(&request.audio_path)?;
        let kind = if input.starts_with(b"RIFF") { "wav" } else { "raw" };
        let out = self.dir.path().join(format!("out-{n}.mp3"));
        std::fs::write(&out, format!("{}:{kind}", request.target_language))?;
        Ok(out)
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// Route pipeline logs to the test harness; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn context(
    extractor: Arc<MockExtractor>,
    decoder: Arc<MemoryDecoder>,
    translator: Arc<FileTranslator>,
) -> PipelineContext {
    init_tracing();
    PipelineContext::new(
        Resolver::new(extractor),
        decoder,
        translator,
        TranslationPool::new(4),
    )
    .with_pipeline(PipelineConfig {
        sample_rate: TEST_SAMPLE_RATE,
        read_timeout: Duration::from_millis(20),
        ..PipelineConfig::default()
    })
}

/// Poll a processor's status until `done` holds, failing after five seconds
pub async fn wait_for(
    processor: &StreamProcessor,
    done: impl Fn(&StatusSnapshot) -> bool,
) -> StatusSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = processor.status();
        if done(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting, last status: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
