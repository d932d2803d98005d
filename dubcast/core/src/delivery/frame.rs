//! Multipart Frame Protocol
//!
//! Translated chunks are delivered as parts of a `multipart/x-mixed-replace`
//! body. Each part carries its sequence id, timestamp and a CRC32 of the
//! payload so consumers can reassemble by sequence and detect corruption.
//!
//! # Frame Format
//!
//! ```text
//! --audio-boundary\r\n
//! Content-Type: audio/mpeg\r\n
//! Content-Length: <N>\r\n
//! X-Chunk-ID: <sequence>\r\n
//! X-Timestamp: <unix seconds>\r\n
//! X-Checksum: <crc32, 8 hex digits>\r\n
//! \r\n
//! <N payload bytes>\r\n
//! ```
//!
//! A keep-alive is an empty `text/plain` part:
//!
//! ```text
//! --audio-boundary\r\nContent-Type: text/plain\r\nContent-Length: 0\r\n\r\n\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::queue::TranslatedChunk;

/// Part boundary
pub const BOUNDARY: &str = "audio-boundary";

/// Response content type for a delivery stream
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=audio-boundary";

/// Largest payload a decoder accepts (32 MB)
pub const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

/// Largest header block a decoder accepts
const MAX_HEADER_SIZE: usize = 1024;

const MIN_BUFFER_CAPACITY: usize = 4096;

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Multipart framing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The part did not start with the boundary line
    #[error("expected --audio-boundary at frame start")]
    MissingBoundary,

    /// A required header is absent
    #[error("missing header: {0}")]
    MissingHeader(&'static str),

    /// A header value could not be parsed
    #[error("invalid {name} header: {value:?}")]
    InvalidHeader {
        /// Header name
        name: &'static str,
        /// Raw value
        value: String,
    },

    /// Header block or payload over the size limit
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Claimed or observed size
        size: usize,
        /// Limit
        max: usize,
    },

    /// Payload not followed by CRLF
    #[error("payload not terminated by CRLF")]
    Unterminated,

    /// Payload CRC32 does not match `X-Checksum`
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Value from the header
        expected: u32,
        /// Value computed over the payload
        actual: u32,
    },
}

/// One unit of a delivery stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryFrame {
    /// A translated chunk
    Chunk {
        /// Sequence id assigned at dispatch
        sequence: u64,
        /// Unix seconds at translation completion
        timestamp: i64,
        /// Translated audio
        payload: Bytes,
    },
    /// Nothing ready yet
    KeepAlive,
}

impl From<TranslatedChunk> for DeliveryFrame {
    fn from(chunk: TranslatedChunk) -> Self {
        Self::Chunk {
            sequence: chunk.sequence,
            timestamp: chunk.created_at.timestamp(),
            payload: Bytes::from(chunk.audio),
        }
    }
}

/// Encode one frame
#[must_use]
pub fn encode(frame: &DeliveryFrame) -> Bytes {
    match frame {
        DeliveryFrame::Chunk {
            sequence,
            timestamp,
            payload,
        } => {
            let header = format!(
                "--{BOUNDARY}\r\nContent-Type: audio/mpeg\r\nContent-Length: {}\r\nX-Chunk-ID: {sequence}\r\nX-Timestamp: {timestamp}\r\nX-Checksum: {:08x}\r\n\r\n",
                payload.len(),
                crc32fast::hash(payload),
            );
            let mut buf = BytesMut::with_capacity(header.len() + payload.len() + CRLF.len());
            buf.put_slice(header.as_bytes());
            buf.put_slice(payload);
            buf.put_slice(CRLF);
            buf.freeze()
        }
        DeliveryFrame::KeepAlive => Bytes::from(format!(
            "--{BOUNDARY}\r\nContent-Type: text/plain\r\nContent-Length: 0\r\n\r\n\r\n"
        )),
    }
}

/// Streaming parser for a delivery body
///
/// Push bytes as they arrive and call [`decode`](Self::decode) until it
/// returns `Ok(None)`.
#[derive(Debug)]
pub struct MultipartDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
}

impl Default for MultipartDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Decode the next complete frame, if any
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] for malformed or corrupted frames. The decoder
    /// does not resynchronise after an error.
    pub fn decode(&mut self) -> Result<Option<DeliveryFrame>, FrameError> {
        let pending = &self.buffer[self.read_pos..];

        let opener = format!("--{BOUNDARY}\r\n");
        let opener = opener.as_bytes();
        if pending.len() < opener.len() {
            if !opener.starts_with(pending) {
                return Err(FrameError::MissingBoundary);
            }
            return Ok(None);
        }
        if !pending.starts_with(opener) {
            return Err(FrameError::MissingBoundary);
        }

        let Some(header_len) = find(&pending[opener.len()..], HEADER_END) else {
            if pending.len() > MAX_HEADER_SIZE {
                return Err(FrameError::FrameTooLarge {
                    size: pending.len(),
                    max: MAX_HEADER_SIZE,
                });
            }
            return Ok(None);
        };

        let header_block = &pending[opener.len()..opener.len() + header_len];
        let headers = Headers::parse(header_block);

        let content_length: usize = headers.parsed("Content-Length")?;
        if content_length > MAX_PAYLOAD_SIZE {
            return Err(FrameError::FrameTooLarge {
                size: content_length,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let payload_start = opener.len() + header_len + HEADER_END.len();
        let frame_len = payload_start + content_length + CRLF.len();
        if pending.len() < frame_len {
            return Ok(None);
        }
        if &pending[payload_start + content_length..frame_len] != CRLF {
            return Err(FrameError::Unterminated);
        }

        let payload = &pending[payload_start..payload_start + content_length];
        let is_keep_alive = content_length == 0
            && headers
                .get("Content-Type")
                .is_some_and(|v| v.eq_ignore_ascii_case("text/plain"));

        let frame = if is_keep_alive {
            DeliveryFrame::KeepAlive
        } else {
            let sequence: u64 = headers.parsed("X-Chunk-ID")?;
            let timestamp: i64 = headers.parsed("X-Timestamp")?;
            let raw = headers.get("X-Checksum").ok_or(FrameError::MissingHeader("X-Checksum"))?;
            let expected = u32::from_str_radix(raw, 16).map_err(|_| FrameError::InvalidHeader {
                name: "X-Checksum",
                value: raw.to_string(),
            })?;
            let actual = crc32fast::hash(payload);
            if actual != expected {
                return Err(FrameError::ChecksumMismatch { expected, actual });
            }
            DeliveryFrame::Chunk {
                sequence,
                timestamp,
                payload: Bytes::copy_from_slice(payload),
            }
        };

        self.read_pos += frame_len;
        Ok(Some(frame))
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

struct Headers<'a>(Vec<(&'a str, &'a str)>);

impl<'a> Headers<'a> {
    fn parse(block: &'a [u8]) -> Self {
        let text = std::str::from_utf8(block).unwrap_or_default();
        Self(
            text.split("\r\n")
                .filter_map(|line| line.split_once(':'))
                .map(|(k, v)| (k.trim(), v.trim()))
                .collect(),
        )
    }

    fn get(&self, name: &str) -> Option<&'a str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    fn parsed<T: std::str::FromStr>(&self, name: &'static str) -> Result<T, FrameError> {
        let raw = self.get(name).ok_or(FrameError::MissingHeader(name))?;
        raw.parse().map_err(|_| FrameError::InvalidHeader {
            name,
            value: raw.to_string(),
        })
    }
}
