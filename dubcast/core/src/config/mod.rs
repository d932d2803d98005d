//! TOML Configuration File Support
//!
//! Centralized configuration loading for dubcast, backed by a TOML file at
//! `~/.config/dubcast/dubcast.toml`.
//!
//! # Configuration Priority
//!
//! Values are layered with the following priority (highest first):
//! 1. CLI arguments (applied by the daemon through [`ConfigOverrides`])
//! 2. Environment variables (`DUBCAST_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//!
//! [pipeline]
//! sample_rate = 16000
//! default_chunk_duration_secs = 30
//! max_queued_chunks = 256
//!
//! [workers]
//! max_workers = 10
//!
//! [delivery]
//! poll_timeout_ms = 5000
//! pacing_ms = 100
//!
//! [extractor]
//! program = "yt-dlp"
//!
//! [decoder]
//! program = "ffmpeg"
//!
//! [translator]
//! program = "dubcast-translate"
//! args = ["--input", "{input}", "--target", "{target}"]
//! default_model_profile = "base"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Bind address
    pub host: Option<String>,
    /// Bind port
    pub port: Option<u16>,
}

/// `[pipeline]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineToml {
    /// Decoder output sample rate in Hz
    pub sample_rate: Option<u32>,
    /// Chunk duration used when a start request omits one
    pub default_chunk_duration_secs: Option<u32>,
    /// Smallest accepted chunk duration
    pub min_chunk_duration_secs: Option<u32>,
    /// Largest accepted chunk duration
    pub max_chunk_duration_secs: Option<u32>,
    /// Bytes requested per decoder read
    pub read_size: Option<usize>,
    /// Per-read wait before the cancel flag is re-checked
    pub read_timeout_ms: Option<u64>,
    /// Silence after which the decoder is considered broken
    pub stall_timeout_secs: Option<u64>,
    /// Output queue bound per session
    pub max_queued_chunks: Option<usize>,
    /// Maximum number of live sessions
    pub max_sessions: Option<usize>,
}

/// `[workers]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersToml {
    /// Size of the shared translation pool
    pub max_workers: Option<usize>,
}

/// `[delivery]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryToml {
    /// Bounded wait on the output queue per iteration
    pub poll_timeout_ms: Option<u64>,
    /// Delay between delivery iterations
    pub pacing_ms: Option<u64>,
    /// How long a consumer waits for a starting session
    pub activation_timeout_secs: Option<u64>,
}

/// `[extractor]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorToml {
    /// Extractor executable
    pub program: Option<String>,
    /// Timeout for heuristic page fetches
    pub page_timeout_secs: Option<u64>,
    /// User agent for heuristic page fetches
    pub user_agent: Option<String>,
}

/// `[decoder]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderToml {
    /// Decoder executable
    pub program: Option<String>,
}

/// `[translator]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorToml {
    /// Translator executable
    pub program: Option<String>,
    /// Argument templates (`{input}`, `{source}`, `{target}`, `{profile}`)
    pub args: Option<Vec<String>>,
    /// Model profile used when a start request omits one
    pub default_model_profile: Option<String>,
    /// Source language used when a start request omits one
    pub default_origin_language: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DubcastToml {
    /// Server section
    pub server: ServerToml,
    /// Pipeline section
    pub pipeline: PipelineToml,
    /// Workers section
    pub workers: WorkersToml,
    /// Delivery section
    pub delivery: DeliveryToml,
    /// Extractor section
    pub extractor: ExtractorToml,
    /// Decoder section
    pub decoder: DecoderToml,
    /// Translator section
    pub translator: TranslatorToml,
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Chunking, decoding and session limits
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Decoder output sample rate in Hz
    pub sample_rate: u32,
    /// Default chunk duration in seconds
    pub default_chunk_duration_secs: u32,
    /// Smallest accepted chunk duration
    pub min_chunk_duration_secs: u32,
    /// Largest accepted chunk duration
    pub max_chunk_duration_secs: u32,
    /// Bytes requested per decoder read
    pub read_size: usize,
    /// Per-read wait
    pub read_timeout: Duration,
    /// Decoder stall threshold
    pub stall_timeout: Duration,
    /// Output queue bound per session
    pub max_queued_chunks: usize,
    /// Maximum number of live sessions
    pub max_sessions: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            default_chunk_duration_secs: 30,
            min_chunk_duration_secs: 1,
            max_chunk_duration_secs: 600,
            read_size: 4096,
            read_timeout: Duration::from_millis(500),
            stall_timeout: Duration::from_secs(60),
            max_queued_chunks: 256,
            max_sessions: 64,
        }
    }
}

/// Delivery loop timing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Bounded wait on the output queue
    pub poll_timeout: Duration,
    /// Delay between iterations
    pub pacing: Duration,
    /// Wait for a starting session to activate
    pub activation_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(5000),
            pacing: Duration::from_millis(100),
            activation_timeout: Duration::from_secs(30),
        }
    }
}

/// Live extraction settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractorConfig {
    /// Extractor executable
    pub program: String,
    /// Heuristic page fetch timeout
    pub page_timeout: Duration,
    /// Heuristic page fetch user agent
    pub user_agent: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            page_timeout: Duration::from_secs(10),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                .to_string(),
        }
    }
}

/// External translator settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslatorConfig {
    /// Translator executable
    pub program: String,
    /// Argument templates
    pub args: Vec<String>,
    /// Default model profile
    pub default_model_profile: String,
    /// Default source language
    pub default_origin_language: String,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            program: "dubcast-translate".to_string(),
            args: [
                "--input",
                "{input}",
                "--source",
                "{source}",
                "--target",
                "{target}",
                "--model",
                "{profile}",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            default_model_profile: "base".to_string(),
            default_origin_language: "Automatic detection".to_string(),
        }
    }
}

/// Centralized configuration for dubcast
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct DubcastConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Pipeline settings
    pub pipeline: PipelineConfig,
    /// Size of the shared translation pool
    pub max_workers: usize,
    /// Delivery settings
    pub delivery: DeliveryConfig,
    /// Extractor settings
    pub extractor: ExtractorConfig,
    /// Decoder executable
    pub decoder_program: String,
    /// Translator settings
    pub translator: TranslatorConfig,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for DubcastConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            pipeline: PipelineConfig::default(),
            max_workers: 10,
            delivery: DeliveryConfig::default(),
            extractor: ExtractorConfig::default(),
            decoder_program: "ffmpeg".to_string(),
            translator: TranslatorConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl DubcastConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.sample_rate == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.sample_rate must be positive".into(),
            ));
        }
        if p.min_chunk_duration_secs == 0 || p.min_chunk_duration_secs > p.max_chunk_duration_secs
        {
            return Err(ConfigError::ValidationError(format!(
                "chunk duration bounds [{}, {}] are invalid",
                p.min_chunk_duration_secs, p.max_chunk_duration_secs
            )));
        }
        if !(p.min_chunk_duration_secs..=p.max_chunk_duration_secs)
            .contains(&p.default_chunk_duration_secs)
        {
            return Err(ConfigError::ValidationError(format!(
                "pipeline.default_chunk_duration_secs {} is outside [{}, {}]",
                p.default_chunk_duration_secs, p.min_chunk_duration_secs, p.max_chunk_duration_secs
            )));
        }
        if p.read_size == 0 || p.max_queued_chunks == 0 || p.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "read_size, max_queued_chunks and max_sessions must be positive".into(),
            ));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "workers.max_workers must be positive".into(),
            ));
        }
        if self.translator.program.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "translator.program must not be empty".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/dubcast/dubcast.toml` or
/// `~/.config/dubcast/dubcast.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("dubcast").join("dubcast.toml"))
}

/// Load configuration from the default path, environment and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// merged values fail validation. A missing config file is not an error.
pub fn load_config() -> Result<DubcastConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DubcastConfig, ConfigError> {
    let mut config = DubcastConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: DubcastToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

fn apply_toml_config(config: &mut DubcastConfig, toml: &DubcastToml) {
    if let Some(ref host) = toml.server.host {
        config.host = host.clone();
    }
    if let Some(port) = toml.server.port {
        config.port = port;
    }

    let p = &toml.pipeline;
    if let Some(rate) = p.sample_rate {
        config.pipeline.sample_rate = rate;
    }
    if let Some(secs) = p.default_chunk_duration_secs {
        config.pipeline.default_chunk_duration_secs = secs;
    }
    if let Some(secs) = p.min_chunk_duration_secs {
        config.pipeline.min_chunk_duration_secs = secs;
    }
    if let Some(secs) = p.max_chunk_duration_secs {
        config.pipeline.max_chunk_duration_secs = secs;
    }
    if let Some(size) = p.read_size {
        config.pipeline.read_size = size;
    }
    if let Some(ms) = p.read_timeout_ms {
        config.pipeline.read_timeout = Duration::from_millis(ms);
    }
    if let Some(secs) = p.stall_timeout_secs {
        config.pipeline.stall_timeout = Duration::from_secs(secs);
    }
    if let Some(n) = p.max_queued_chunks {
        config.pipeline.max_queued_chunks = n;
    }
    if let Some(n) = p.max_sessions {
        config.pipeline.max_sessions = n;
    }

    if let Some(n) = toml.workers.max_workers {
        config.max_workers = n;
    }

    if let Some(ms) = toml.delivery.poll_timeout_ms {
        config.delivery.poll_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.delivery.pacing_ms {
        config.delivery.pacing = Duration::from_millis(ms);
    }
    if let Some(secs) = toml.delivery.activation_timeout_secs {
        config.delivery.activation_timeout = Duration::from_secs(secs);
    }

    if let Some(ref program) = toml.extractor.program {
        config.extractor.program = program.clone();
    }
    if let Some(secs) = toml.extractor.page_timeout_secs {
        config.extractor.page_timeout = Duration::from_secs(secs);
    }
    if let Some(ref agent) = toml.extractor.user_agent {
        config.extractor.user_agent = agent.clone();
    }

    if let Some(ref program) = toml.decoder.program {
        config.decoder_program = program.clone();
    }

    let t = &toml.translator;
    if let Some(ref program) = t.program {
        config.translator.program = program.clone();
    }
    if let Some(ref args) = t.args {
        config.translator.args = args.clone();
    }
    if let Some(ref profile) = t.default_model_profile {
        config.translator.default_model_profile = profile.clone();
    }
    if let Some(ref language) = t.default_origin_language {
        config.translator.default_origin_language = language.clone();
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring unparsable environment variable");
            None
        }
    }
}

fn apply_env_config(config: &mut DubcastConfig) {
    if let Ok(host) = std::env::var("DUBCAST_HOST") {
        config.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env_parsed::<u16>("DUBCAST_PORT") {
        config.port = port;
        config.source = ConfigSource::Env;
    }
    if let Some(n) = env_parsed::<usize>("DUBCAST_MAX_WORKERS") {
        config.max_workers = n;
        config.source = ConfigSource::Env;
    }
    if let Some(rate) = env_parsed::<u32>("DUBCAST_SAMPLE_RATE") {
        config.pipeline.sample_rate = rate;
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = env_parsed::<u32>("DUBCAST_CHUNK_DURATION") {
        config.pipeline.default_chunk_duration_secs = secs;
        config.source = ConfigSource::Env;
    }
    if let Ok(program) = std::env::var("DUBCAST_YTDLP") {
        config.extractor.program = program;
        config.source = ConfigSource::Env;
    }
    if let Ok(program) = std::env::var("DUBCAST_FFMPEG") {
        config.decoder_program = program;
        config.source = ConfigSource::Env;
    }
    if let Ok(program) = std::env::var("DUBCAST_TRANSLATOR") {
        config.translator.program = program;
        config.source = ConfigSource::Env;
    }
    if let Ok(profile) = std::env::var("DUBCAST_MODEL_PROFILE") {
        config.translator.default_model_profile = profile;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Bind address override
    pub host: Option<String>,
    /// Bind port override
    pub port: Option<u16>,
    /// Worker pool size override
    pub max_workers: Option<usize>,
    /// Translator executable override
    pub translator_program: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bind address override
    #[must_use]
    pub fn with_host(mut self, host: String) -> Self {
        self.host = Some(host);
        self
    }

    /// Set bind port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set worker pool size override
    #[must_use]
    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = Some(n);
        self
    }

    /// Set translator executable override
    #[must_use]
    pub fn with_translator_program(mut self, program: String) -> Self {
        self.translator_program = Some(program);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut DubcastConfig) {
        if self.host.is_some()
            || self.port.is_some()
            || self.max_workers.is_some()
            || self.translator_program.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref host) = self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(n) = self.max_workers {
            config.max_workers = n;
        }
        if let Some(ref program) = self.translator_program {
            config.translator.program = program.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
