//! Continuous PCM Decoding
//!
//! A decoder turns the selected media URL into an endless stream of raw
//! little-endian PCM. The [`ChunkAccumulator`] slices that stream into
//! fixed-size [`AudioChunk`]s:
//!
//! ```text
//! reads:   |--4096--|--4096--|--4096--|--4096--|--4096--| ...
//! buffer:  [====================chunk 0====================][==chunk 1...
//!           ^ read_pos                                        ^ next slice
//! ```
//!
//! Chunks are sliced in order with no overlap and no gap, so for a stream of
//! `L` bytes exactly `floor(L / chunk_len)` chunks come out.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};

/// Bytes in one signed 16-bit sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Compact the accumulator once this many consumed bytes pile up
const MIN_COMPACT_BYTES: usize = 64 * 1024;

// ============================================================================
// Errors
// ============================================================================

/// Failure of the continuous decode pipeline
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The pipeline could not start, ended, stalled or failed to read
    #[error("decode pipeline broken: {reason}")]
    PipelineBroken {
        /// What went wrong
        reason: String,
    },
}

impl DecodeError {
    pub(crate) fn broken(reason: impl Into<String>) -> Self {
        Self::PipelineBroken {
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Format and chunks
// ============================================================================

/// Raw PCM layout produced by the decoder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Interleaved channels
    pub channels: u16,
}

impl PcmFormat {
    /// Mono signed 16-bit at the given rate
    #[must_use]
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    /// Byte length of a chunk of `duration_secs` seconds
    #[must_use]
    pub fn chunk_len(&self, duration_secs: u32) -> usize {
        duration_secs as usize
            * self.sample_rate as usize
            * usize::from(self.channels)
            * BYTES_PER_SAMPLE
    }
}

/// A fixed-duration slice of raw PCM
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioChunk {
    /// Position in the session's stream, starting at 0
    pub sequence: u64,
    /// Exactly one chunk length of PCM bytes
    pub data: Vec<u8>,
}

/// Buffers decoder reads and slices complete chunks
#[derive(Debug)]
pub struct ChunkAccumulator {
    buffer: Vec<u8>,
    read_pos: usize,
    chunk_len: usize,
    next_sequence: u64,
}

impl ChunkAccumulator {
    /// Create an accumulator producing chunks of `chunk_len` bytes
    ///
    /// A zero length is bumped to one byte so slicing always makes progress.
    #[must_use]
    pub fn new(chunk_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            read_pos: 0,
            chunk_len: chunk_len.max(1),
            next_sequence: 0,
        }
    }

    /// Append decoder output
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_COMPACT_BYTES {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet sliced
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Chunk length in bytes
    #[must_use]
    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    /// Slice off the next complete chunk, if one is buffered
    pub fn next_chunk(&mut self) -> Option<AudioChunk> {
        if self.buffered() < self.chunk_len {
            return None;
        }
        let end = self.read_pos + self.chunk_len;
        let data = self.buffer[self.read_pos..end].to_vec();
        self.read_pos = end;

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Some(AudioChunk { sequence, data })
    }
}

// ============================================================================
// Decoder seam
// ============================================================================

/// An open decode pipeline
pub struct PcmStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    child: Option<Child>,
}

impl std::fmt::Debug for PcmStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmStream")
            .field("child", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

impl PcmStream {
    /// Wrap any async reader (in-memory sources, pipes)
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            child: None,
        }
    }

    /// Wrap a spawned decoder process whose stdout carries the PCM
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::PipelineBroken`] if stdout was not piped.
    pub fn from_child(mut child: Child) -> Result<Self, DecodeError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DecodeError::broken("decoder stdout not captured"))?;
        Ok(Self {
            reader: Box::new(stdout),
            child: Some(child),
        })
    }

    /// Read the next block of PCM; `Ok(0)` means end of stream
    ///
    /// # Errors
    ///
    /// Propagates the underlying I/O error.
    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf).await
    }

    /// Explain an end of stream
    pub async fn finish(mut self) -> DecodeError {
        if let Some(child) = self.child.as_mut() {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    return DecodeError::broken(format!("decoder exited with {status}"));
                }
                Ok(_) => {}
                Err(e) => return DecodeError::broken(format!("failed to reap decoder: {e}")),
            }
        }
        DecodeError::broken("unexpected end of input")
    }

    /// Tear the pipeline down, killing the decoder process
    pub async fn close(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "Decoder already exited");
            }
        }
    }
}

/// Launches continuous decode pipelines
#[async_trait]
pub trait PcmDecoder: Send + Sync {
    /// Open a decode of `media_url` producing PCM in `format`
    async fn open(&self, media_url: &str, format: PcmFormat) -> Result<PcmStream, DecodeError>;
}

/// [`PcmDecoder`] backed by an `ffmpeg` child process
#[derive(Clone, Debug)]
pub struct FfmpegDecoder {
    program: String,
}

impl FfmpegDecoder {
    /// Use the given ffmpeg executable
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(media_url: &str, format: PcmFormat) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            media_url.into(),
            "-vn".into(),
            "-f".into(),
            "s16le".into(),
            "-acodec".into(),
            "pcm_s16le".into(),
            "-ac".into(),
            format.channels.to_string(),
            "-ar".into(),
            format.sample_rate.to_string(),
            "pipe:1".into(),
        ]
    }
}

#[async_trait]
impl PcmDecoder for FfmpegDecoder {
    async fn open(&self, media_url: &str, format: PcmFormat) -> Result<PcmStream, DecodeError> {
        let mut child = Command::new(&self.program)
            .args(Self::args(media_url, format))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DecodeError::broken(format!("failed to launch {}: {e}", self.program)))?;

        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(?pid, %line, "decoder stderr");
                }
            });
        }

        tracing::debug!(pid = ?child.id(), sample_rate = format.sample_rate, "Decoder launched");
        PcmStream::from_child(child)
    }
}
