//! Dubcast Core - Live-Source Chunked Audio Translation
//!
//! This crate turns a live broadcast (a channel handle, channel URL or video
//! URL) into a stream of translated audio chunks. It is transport-agnostic:
//! the daemon wraps it in HTTP, tests drive it directly.
//!
//! # Architecture
//!
//! ```text
//!   POST /start ──► StreamRegistry ──create──► StreamSession + StreamProcessor
//!                        │                              │
//!                        │                 ┌────────────┴─────────────┐
//!                        │                 ▼                          │
//!                        │           source::Resolver                 │
//!                        │      (direct ► recent entries ► page)      │
//!                        │                 │                          │
//!                        │           source::choose                   │
//!                        │                 │                          │
//!                        │           PcmDecoder (ffmpeg) ─► PCM       │
//!                        │                 │                          │
//!                        │           ChunkAccumulator ─► AudioChunk   │
//!                        │                 │ tokio::spawn             │
//!                        │           TranslationPool ─► Translator    │
//!                        │                 │                          │
//!                        │           OutputQueue (drop-oldest)        │
//!                        │                 │                          │
//!   GET /stream ─────────┴──────► DeliveryLoop ─► multipart frames    │
//!   GET /status ─────────────────► StatusSnapshot ◄───────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StreamRegistry`]: owns every session, the only cross-session state
//! - [`StreamProcessor`]: drives one session from `starting` to a terminal state
//! - [`StreamSession`]: shared status, counters and output queue
//! - [`Resolver`]: tiered live-source lookup
//! - [`TranslationPool`]: bounded executor for blocking translator calls
//! - [`DeliveryLoop`]: pull loop producing [`DeliveryFrame`]s
//!
//! # Module Overview
//!
//! - [`config`]: TOML/env configuration
//! - [`languages`]: supported target languages
//! - [`source`]: reference parsing, extraction, resolution, format selection
//! - [`decode`]: PCM decoding and chunk slicing
//! - [`translator`]: translator seam, WAV staging and the worker pool
//! - [`queue`]: bounded per-session output queue
//! - [`session`]: session identity, lifecycle and snapshots
//! - [`processor`]: per-session pipeline
//! - [`registry`]: session map
//! - [`delivery`]: delivery loop and multipart framing

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod decode;
pub mod delivery;
pub mod languages;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod session;
pub mod source;
pub mod translator;

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, DeliveryConfig, DubcastConfig, ExtractorConfig, PipelineConfig, TranslatorConfig,
};

// Pipeline exports
pub use decode::{AudioChunk, ChunkAccumulator, DecodeError, FfmpegDecoder, PcmDecoder, PcmFormat, PcmStream};
pub use processor::{PipelineContext, StreamProcessor};
pub use queue::{OutputQueue, TranslatedChunk};
pub use translator::{
    translate_chunk, ChunkJob, CommandTranslator, TranslationError, TranslationPool,
    TranslationRequest, Translator,
};

// Source exports
pub use source::{
    FormatCandidate, FormatError, LiveExtractor, LiveSourceDescriptor, ResolutionError, Resolver,
    SourceReference, YtDlpExtractor,
};

// Session exports
pub use registry::{RegistryError, StartRequest, StreamRegistry};
pub use session::{SessionError, SessionId, SessionStatus, StatusSnapshot, StreamSession};

// Delivery exports
pub use delivery::{DeliveryFrame, DeliveryLoop, FrameError, MultipartDecoder};
pub use languages::TargetLanguage;
