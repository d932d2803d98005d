//! Live Source Acquisition
//!
//! Everything between a user-supplied channel/video reference and a media URL
//! the decoder can open:
//!
//! ```text
//!   "@handle" ──► SourceReference::parse ──► Resolver::resolve
//!                                                 │
//!                     ┌───────────────────────────┼───────────────────────┐
//!                     ▼                           ▼                       ▼
//!              tier 1: <ref>/live      tier 2: recent entries   tier 3: page keywords
//!                     │                  (first 10, is_live)     (extractor failed)
//!                     └──────────────► LiveSourceDescriptor ◄──────────────┘
//!                                                 │
//!                                          format::choose
//!                                                 │
//!                                                 ▼
//!                                          FormatCandidate.url
//! ```

pub mod descriptor;
pub mod extractor;
pub mod format;
pub mod reference;
pub mod resolver;

pub use descriptor::{FormatCandidate, LiveSourceDescriptor};
pub use extractor::{EntrySummary, ExtractorError, LiveExtractor, YtDlpExtractor};
pub use format::{choose, FormatError};
pub use reference::SourceReference;
pub use resolver::{Resolver, TierOutcome};

use thiserror::Error;

/// Why a reference could not be turned into a live descriptor
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// Every tier ran and none found a running broadcast
    #[error("no live broadcast found for {reference}")]
    NotLive {
        /// The canonical reference that was searched
        reference: String,
    },

    /// The reference does not exist (or was empty)
    #[error("source not found: {reference}")]
    NotFound {
        /// The reference as given
        reference: String,
    },

    /// Extraction failed and no fallback could decide
    #[error("network error while resolving source: {message}")]
    NetworkError {
        /// Last underlying failure
        message: String,
    },
}
