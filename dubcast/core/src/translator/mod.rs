//! Translator Capability
//!
//! The speech translation engine is an opaque, slow, synchronous collaborator:
//! one call per chunk, input is an audio file, output is a path to the
//! translated audio. Everything here exists to call it safely:
//!
//! - [`Translator`] is the seam, [`CommandTranslator`] the default adapter.
//! - [`translate_chunk`] stages a chunk as a WAV file, calls the translator and
//!   collects the output, cleaning up both files on every path.
//! - [`TranslationPool`] bounds how many calls run at once across all sessions.

mod command;
mod pool;

pub use command::CommandTranslator;
pub use pool::TranslationPool;

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::decode::{AudioChunk, PcmFormat};

/// Per-chunk translation failure
///
/// Never fails a session; the chunk is dropped and counted.
#[derive(Debug, Error)]
pub enum TranslationError {
    /// Staging or collecting files failed
    #[error("translation I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The chunk could not be encoded as WAV
    #[error("failed to encode chunk: {0}")]
    Encode(String),

    /// The translator program could not be started
    #[error("failed to launch translator: {0}")]
    Launch(String),

    /// The translator exited unsuccessfully
    #[error("translator failed ({status}): {stderr}")]
    CommandFailed {
        /// Exit status description
        status: String,
        /// Trailing stderr output
        stderr: String,
    },

    /// The translator reported no usable output file
    #[error("translator produced no output{}", describe_output(.path))]
    MissingOutput {
        /// The reported path, if any
        path: Option<PathBuf>,
    },

    /// The shared pool has been shut down
    #[error("translation pool is closed")]
    PoolClosed,

    /// The blocking worker panicked or was cancelled
    #[error("translation worker failed: {0}")]
    Worker(String),
}

fn describe_output(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" at {}", p.display()))
        .unwrap_or_default()
}

/// One translation call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslationRequest {
    /// Input audio file
    pub audio_path: PathBuf,
    /// Source language label or "Automatic detection"
    pub source_language: String,
    /// Target language label, e.g. "Tamil (ta)"
    pub target_language: String,
    /// Model profile, e.g. "base"
    pub model_profile: String,
}

/// The external translation capability
///
/// Implementations block; they are only ever called from the worker pool.
pub trait Translator: Send + Sync {
    /// Translate the audio at `request.audio_path`, returning the output path
    ///
    /// # Errors
    ///
    /// Any failure is reported per chunk and never retried.
    fn translate(&self, request: &TranslationRequest) -> Result<PathBuf, TranslationError>;
}

/// Everything needed to translate one chunk off the async runtime
#[derive(Clone, Debug)]
pub struct ChunkJob {
    /// The chunk to translate
    pub chunk: AudioChunk,
    /// Layout of `chunk.data`
    pub format: PcmFormat,
    /// Source language
    pub source_language: String,
    /// Target language label
    pub target_language: String,
    /// Model profile
    pub model_profile: String,
}

/// Write PCM as a 16-bit WAV into a temp file removed on drop
///
/// # Errors
///
/// Returns [`TranslationError::Io`] or [`TranslationError::Encode`].
pub fn stage_wav(data: &[u8], format: PcmFormat) -> Result<tempfile::NamedTempFile, TranslationError> {
    let file = tempfile::Builder::new()
        .prefix("dubcast-chunk-")
        .suffix(".wav")
        .tempfile()?;

    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let encode = |e: hound::Error| TranslationError::Encode(e.to_string());

    let mut writer = hound::WavWriter::new(BufWriter::new(file.as_file()), spec).map_err(encode)?;
    for pair in data.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
            .map_err(encode)?;
    }
    writer.finalize().map_err(encode)?;

    Ok(file)
}

/// Translate one chunk synchronously, returning the translated bytes
///
/// The staged WAV is removed when this returns, whatever the outcome; the
/// translator's output file is removed after it has been read.
///
/// # Errors
///
/// Propagates staging, translator and output-collection failures.
pub fn translate_chunk(
    translator: &dyn Translator,
    job: &ChunkJob,
) -> Result<Vec<u8>, TranslationError> {
    let staged = stage_wav(&job.chunk.data, job.format)?;
    let request = TranslationRequest {
        audio_path: staged.path().to_path_buf(),
        source_language: job.source_language.clone(),
        target_language: job.target_language.clone(),
        model_profile: job.model_profile.clone(),
    };

    let output = translator.translate(&request)?;
    let audio = match std::fs::read(&output) {
        Ok(audio) => audio,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TranslationError::MissingOutput { path: Some(output) });
        }
        Err(e) => {
            remove_output(&output);
            return Err(e.into());
        }
    };
    remove_output(&output);
    Ok(audio)
}

fn remove_output(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!(path = %path.display(), error = %e, "Could not remove translator output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording {
        seen: Mutex<Vec<(PathBuf, bool)>>,
        out_dir: tempfile::TempDir,
        fail: bool,
    }

    impl Recording {
        fn new(fail: bool) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                out_dir: tempfile::tempdir().unwrap(),
                fail,
            }
        }
    }

    impl Translator for Recording {
        fn translate(&self, request: &TranslationRequest) -> Result<PathBuf, TranslationError> {
            self.seen
                .lock()
                .push((request.audio_path.clone(), request.audio_path.exists()));
            if self.fail {
                return Err(TranslationError::CommandFailed {
                    status: "exit status: 1".into(),
                    stderr: "boom".into(),
                });
            }
            let out = self.out_dir.path().join("out.mp3");
            std::fs::write(&out, request.target_language.as_bytes())?;
            Ok(out)
        }
    }

    fn job(data: Vec<u8>) -> ChunkJob {
        ChunkJob {
            chunk: AudioChunk { sequence: 3, data },
            format: PcmFormat::mono(8_000),
            source_language: "Automatic detection".into(),
            target_language: "Tamil (ta)".into(),
            model_profile: "base".into(),
        }
    }

    #[test]
    fn test_stage_wav_is_readable() {
        let pcm: Vec<u8> = [1i16, -2, 300].iter().flat_map(|s| s.to_le_bytes()).collect();
        let staged = stage_wav(&pcm, PcmFormat::mono(8_000)).unwrap();

        let mut reader = hound::WavReader::open(staged.path()).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples, vec![1, -2, 300]);
    }

    #[test]
    fn test_translate_chunk_success_cleans_up() {
        let translator = Recording::new(false);
        let audio = translate_chunk(&translator, &job(vec![0; 32])).unwrap();

        assert_eq!(audio, b"Tamil (ta)");
        let seen = translator.seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].1, "staged file exists during the call");
        assert!(!seen[0].0.exists(), "staged file removed afterwards");
        assert!(!translator.out_dir.path().join("out.mp3").exists());
    }

    /// Hands back a self-referencing symlink: unreadable, but removable
    #[cfg(unix)]
    struct Unreadable {
        dir: tempfile::TempDir,
    }

    #[cfg(unix)]
    impl Translator for Unreadable {
        fn translate(&self, _: &TranslationRequest) -> Result<PathBuf, TranslationError> {
            let out = self.dir.path().join("loop.mp3");
            std::os::unix::fs::symlink(&out, &out)?;
            Ok(out)
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_output_removed() {
        let translator = Unreadable {
            dir: tempfile::tempdir().unwrap(),
        };
        let err = translate_chunk(&translator, &job(vec![0; 32])).unwrap_err();

        assert!(matches!(err, TranslationError::Io(_)), "{err}");
        let out = translator.dir.path().join("loop.mp3");
        assert!(std::fs::symlink_metadata(&out).is_err());
    }

    #[test]
    fn test_translate_chunk_failure_cleans_up() {
        let translator = Recording::new(true);
        let err = translate_chunk(&translator, &job(vec![0; 32])).unwrap_err();

        assert!(matches!(err, TranslationError::CommandFailed { .. }));
        let staged: PathBuf = translator.seen.lock()[0].0.clone();
        assert!(!Path::new(&staged).exists());
    }

    #[test]
    fn test_missing_output_display() {
        let err = TranslationError::MissingOutput {
            path: Some(PathBuf::from("/tmp/x.mp3")),
        };
        assert_eq!(err.to_string(), "translator produced no output at /tmp/x.mp3");
        let err = TranslationError::MissingOutput { path: None };
        assert_eq!(err.to_string(), "translator produced no output");
    }
}
