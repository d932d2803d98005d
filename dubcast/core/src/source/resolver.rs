//! Tiered Live Source Resolution
//!
//! Each tier reports a tagged [`TierOutcome`] instead of an error so the
//! fall-through rules stay explicit:
//!
//! - Tier 1 (direct): extract `<reference>/live`.
//! - Tier 2 (recent entries): for channels, scan the most recent entries and
//!   re-extract the first one listed as live. Runs whenever tier 1 did not find
//!   a broadcast.
//! - Tier 3 (heuristic): fetch the live page and look for live keywords. Runs
//!   only when an earlier tier was inconclusive, i.e. the extractor itself broke.

use std::sync::Arc;

use super::extractor::{ExtractorError, LiveExtractor};
use super::{FormatCandidate, LiveSourceDescriptor, ResolutionError, SourceReference};

/// Maximum number of recent entries scanned by tier 2
pub const DEFAULT_SCAN_LIMIT: usize = 10;

/// Keywords the heuristic tier looks for in page content
pub const LIVE_KEYWORDS: [&str; 6] = [
    "is live now",
    "live now",
    "currently live",
    "live stream",
    "watching live",
    "live chat",
];

/// Result of a single resolution tier
#[derive(Clone, Debug, PartialEq)]
pub enum TierOutcome {
    /// A running broadcast was found
    Live(LiveSourceDescriptor),
    /// The tier completed and found nothing live
    NotLive {
        /// The tier confirmed that the source exists
        exists: bool,
    },
    /// The tier could not decide (network error, blocked access)
    Inconclusive(String),
}

impl From<ExtractorError> for TierOutcome {
    fn from(err: ExtractorError) -> Self {
        match err {
            ExtractorError::NotLive { .. } => Self::NotLive { exists: true },
            ExtractorError::NotFound { .. } => Self::NotLive { exists: false },
            ExtractorError::Failed { message } => Self::Inconclusive(message),
        }
    }
}

/// Turns references into live descriptors
#[derive(Clone)]
pub struct Resolver {
    extractor: Arc<dyn LiveExtractor>,
    scan_limit: usize,
}

impl Resolver {
    /// Create a resolver over an extractor
    #[must_use]
    pub fn new(extractor: Arc<dyn LiveExtractor>) -> Self {
        Self {
            extractor,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }

    /// Override how many recent entries tier 2 scans
    #[must_use]
    pub fn with_scan_limit(mut self, limit: usize) -> Self {
        self.scan_limit = limit;
        self
    }

    /// Resolve a raw reference into a live descriptor
    ///
    /// # Errors
    ///
    /// - [`ResolutionError::NotFound`] for an empty reference, or when no tier
    ///   could confirm the source exists.
    /// - [`ResolutionError::NotLive`] when every tier ran and none found a
    ///   broadcast.
    /// - [`ResolutionError::NetworkError`] when the extractor failed and the
    ///   heuristic fallback could not decide either.
    pub async fn resolve(&self, raw: &str) -> Result<LiveSourceDescriptor, ResolutionError> {
        let reference = SourceReference::parse(raw)?;
        tracing::info!(reference = %reference, "Resolving live source");

        let mut exists = false;
        let mut failure: Option<String> = None;

        let mut record = |outcome: TierOutcome, tier: &str| -> Option<LiveSourceDescriptor> {
            match outcome {
                TierOutcome::Live(descriptor) => {
                    tracing::info!(tier, title = %descriptor.title, "Live broadcast found");
                    return Some(descriptor);
                }
                TierOutcome::NotLive { exists: e } => {
                    tracing::debug!(tier, exists = e, "Tier found nothing live");
                    exists |= e;
                }
                TierOutcome::Inconclusive(message) => {
                    tracing::warn!(tier, error = %message, "Tier inconclusive");
                    failure = Some(message);
                }
            }
            None
        };

        if let Some(d) = record(self.direct(&reference).await, "direct") {
            return Ok(d);
        }
        if reference.is_channel() {
            if let Some(d) = record(self.recent_entries(&reference).await, "recent_entries") {
                return Ok(d);
            }
        }

        if let Some(cause) = failure {
            return match self.heuristic(&reference).await {
                TierOutcome::Live(descriptor) => {
                    tracing::info!(tier = "heuristic", "Page content suggests a live broadcast");
                    Ok(descriptor)
                }
                TierOutcome::NotLive { .. } => Err(ResolutionError::NotLive {
                    reference: reference.url().to_string(),
                }),
                TierOutcome::Inconclusive(message) => {
                    tracing::warn!(tier = "heuristic", error = %message, "Heuristic failed");
                    Err(ResolutionError::NetworkError { message: cause })
                }
            };
        }

        if exists {
            Err(ResolutionError::NotLive {
                reference: reference.url().to_string(),
            })
        } else {
            Err(ResolutionError::NotFound {
                reference: reference.url().to_string(),
            })
        }
    }

    /// Candidate formats for a media URL
    ///
    /// # Errors
    ///
    /// Propagates the extractor failure.
    pub async fn formats_for(&self, url: &str) -> Result<Vec<FormatCandidate>, ExtractorError> {
        self.extractor.formats(url).await
    }

    async fn direct(&self, reference: &SourceReference) -> TierOutcome {
        match self.extractor.extract(&reference.live_url()).await {
            Ok(descriptor) if descriptor.is_live => TierOutcome::Live(descriptor),
            Ok(_) => TierOutcome::NotLive { exists: true },
            Err(e) => e.into(),
        }
    }

    async fn recent_entries(&self, reference: &SourceReference) -> TierOutcome {
        let entries = match self
            .extractor
            .recent_entries(reference.url(), self.scan_limit)
            .await
        {
            Ok(entries) => entries,
            Err(e) => return e.into(),
        };

        for entry in entries.iter().take(self.scan_limit).filter(|e| e.is_live) {
            match self.extractor.extract(&entry.url).await {
                Ok(descriptor) if descriptor.is_live => return TierOutcome::Live(descriptor),
                Ok(_) => {
                    tracing::debug!(url = %entry.url, "Listed as live but no longer live");
                }
                Err(e) => {
                    tracing::debug!(url = %entry.url, error = %e, "Could not re-resolve entry");
                }
            }
        }
        TierOutcome::NotLive { exists: true }
    }

    async fn heuristic(&self, reference: &SourceReference) -> TierOutcome {
        let page_url = reference.live_url();
        let content = match self.extractor.fetch_page(&page_url).await {
            Ok(content) => content.to_lowercase(),
            Err(e) => return e.into(),
        };

        if LIVE_KEYWORDS.iter().any(|k| content.contains(k)) {
            TierOutcome::Live(LiveSourceDescriptor {
                reference_url: page_url.clone(),
                media_url: Some(page_url),
                title: reference.fallback_title(),
                channel: None,
                view_count: None,
                is_live: true,
                formats: Vec::new(),
            })
        } else {
            TierOutcome::NotLive { exists: true }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::EntrySummary;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct ScriptedExtractor {
        extract: HashMap<String, Result<LiveSourceDescriptor, ExtractorError>>,
        entries: Option<Result<Vec<EntrySummary>, ExtractorError>>,
        page: Option<Result<String, ExtractorError>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedExtractor {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl LiveExtractor for ScriptedExtractor {
        async fn extract(&self, url: &str) -> Result<LiveSourceDescriptor, ExtractorError> {
            self.calls.lock().push(format!("extract {url}"));
            self.extract.get(url).cloned().unwrap_or(Err(ExtractorError::NotFound {
                url: url.to_string(),
            }))
        }

        async fn recent_entries(
            &self,
            channel_url: &str,
            limit: usize,
        ) -> Result<Vec<EntrySummary>, ExtractorError> {
            self.calls.lock().push(format!("entries {channel_url} {limit}"));
            self.entries.clone().unwrap_or(Ok(Vec::new()))
        }

        async fn fetch_page(&self, url: &str) -> Result<String, ExtractorError> {
            self.calls.lock().push(format!("page {url}"));
            self.page.clone().unwrap_or(Ok(String::new()))
        }
    }

    fn descriptor(url: &str, is_live: bool) -> LiveSourceDescriptor {
        LiveSourceDescriptor {
            reference_url: url.to_string(),
            media_url: Some(format!("{url}#media")),
            title: format!("title of {url}"),
            channel: None,
            view_count: None,
            is_live,
            formats: Vec::new(),
        }
    }

    fn entry(id: &str, is_live: bool) -> EntrySummary {
        EntrySummary {
            url: format!("https://www.youtube.com/watch?v={id}"),
            title: None,
            is_live,
        }
    }

    const LIVE_URL: &str = "https://www.youtube.com/@news/live";

    #[tokio::test]
    async fn test_direct_tier_wins() {
        let mut ex = ScriptedExtractor::default();
        ex.extract.insert(LIVE_URL.into(), Ok(descriptor(LIVE_URL, true)));
        let ex = Arc::new(ex);

        let d = Resolver::new(ex.clone()).resolve("@news").await.unwrap();

        assert_eq!(d.reference_url, LIVE_URL);
        assert_eq!(ex.calls(), vec![format!("extract {LIVE_URL}")]);
    }

    #[tokio::test]
    async fn test_not_live_falls_through_to_recent_entries() {
        let live_video = "https://www.youtube.com/watch?v=b";
        let mut ex = ScriptedExtractor::default();
        ex.extract.insert(
            LIVE_URL.into(),
            Err(ExtractorError::NotLive {
                url: LIVE_URL.into(),
            }),
        );
        ex.extract.insert(live_video.into(), Ok(descriptor(live_video, true)));
        ex.entries = Some(Ok(vec![entry("a", false), entry("b", true), entry("c", true)]));
        let ex = Arc::new(ex);

        let d = Resolver::new(ex.clone()).resolve("@news").await.unwrap();

        assert_eq!(d.reference_url, live_video);
        let calls = ex.calls();
        assert_eq!(calls[1], "entries https://www.youtube.com/@news 10");
        assert_eq!(calls.len(), 3, "stops at the first confirmed entry: {calls:?}");
    }

    #[tokio::test]
    async fn test_exhausted_tiers_report_not_live() {
        let mut ex = ScriptedExtractor::default();
        ex.extract.insert(LIVE_URL.into(), Ok(descriptor(LIVE_URL, false)));
        ex.entries = Some(Ok(vec![entry("a", false)]));
        let ex = Arc::new(ex);

        let err = Resolver::new(ex.clone()).resolve("@news").await.unwrap_err();

        assert!(matches!(err, ResolutionError::NotLive { .. }));
        assert!(ex.calls().iter().any(|c| c.starts_with("entries")));
        assert!(!ex.calls().iter().any(|c| c.starts_with("page")));
    }

    #[tokio::test]
    async fn test_scan_is_bounded() {
        let mut ex = ScriptedExtractor::default();
        ex.extract.insert(LIVE_URL.into(), Ok(descriptor(LIVE_URL, false)));
        let mut listed: Vec<EntrySummary> = (0..10).map(|i| entry(&i.to_string(), false)).collect();
        listed.push(entry("late", true));
        ex.entries = Some(Ok(listed));
        let ex = Arc::new(ex);

        let err = Resolver::new(ex.clone()).resolve("@news").await.unwrap_err();

        assert!(matches!(err, ResolutionError::NotLive { .. }));
        assert!(!ex.calls().iter().any(|c| c.contains("late")));
    }

    #[tokio::test]
    async fn test_heuristic_runs_when_extractor_fails() {
        let mut ex = ScriptedExtractor::default();
        ex.extract.insert(
            LIVE_URL.into(),
            Err(ExtractorError::Failed {
                message: "blocked".into(),
            }),
        );
        ex.entries = Some(Err(ExtractorError::Failed {
            message: "blocked".into(),
        }));
        ex.page = Some(Ok("<html>Watching LIVE now</html>".into()));
        let ex = Arc::new(ex);

        let d = Resolver::new(ex).resolve("@news").await.unwrap();

        assert!(d.is_live);
        assert_eq!(d.title, "Live Stream from @news");
        assert_eq!(d.media_url.as_deref(), Some(LIVE_URL));
        assert!(d.formats.is_empty());
    }

    #[tokio::test]
    async fn test_network_error_when_heuristic_also_fails() {
        let mut ex = ScriptedExtractor::default();
        ex.extract.insert(
            LIVE_URL.into(),
            Err(ExtractorError::Failed {
                message: "timed out".into(),
            }),
        );
        ex.page = Some(Err(ExtractorError::Failed {
            message: "dns".into(),
        }));
        let ex = Arc::new(ex);

        let err = Resolver::new(ex).resolve("@news").await.unwrap_err();

        assert_eq!(
            err,
            ResolutionError::NetworkError {
                message: "timed out".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_channel_is_not_found() {
        let ex = ScriptedExtractor {
            entries: Some(Err(ExtractorError::NotFound {
                url: "x".into(),
            })),
            ..ScriptedExtractor::default()
        };

        let err = Resolver::new(Arc::new(ex)).resolve("@nobody").await.unwrap_err();

        assert!(matches!(err, ResolutionError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_video_reference_skips_entry_scan() {
        let ex = Arc::new(ScriptedExtractor::default());

        let _ = Resolver::new(ex.clone()).resolve("https://youtu.be/abc").await;

        assert!(!ex.calls().iter().any(|c| c.starts_with("entries")));
    }
}
