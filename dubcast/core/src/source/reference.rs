//! Source Reference Normalisation
//!
//! Users hand us channel handles in many shapes: `@name`, `name`,
//! `https://www.youtube.com/@name/live`, `/channel/UC...`, `youtu.be/<id>`.
//! Everything is folded into one of two canonical forms before lookup.

use std::fmt;

use url::Url;

use super::ResolutionError;

const WATCH_PREFIX: &str = "https://www.youtube.com/watch?v=";
const YOUTUBE_ORIGIN: &str = "https://www.youtube.com";

/// A canonical channel or video reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceReference {
    /// A channel page; its live endpoint is `<url>/live`
    Channel {
        /// Canonical channel URL without trailing `/live`
        url: String,
        /// Last path segment, used for display
        handle: String,
    },
    /// A single video or broadcast
    Video {
        /// Canonical watch URL
        url: String,
        /// Video id
        id: String,
    },
}

impl SourceReference {
    /// Normalise a raw user-supplied reference
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::NotFound`] for an empty reference or a URL
    /// that does not parse.
    pub fn parse(raw: &str) -> Result<Self, ResolutionError> {
        let not_found = || ResolutionError::NotFound {
            reference: raw.to_string(),
        };

        let cleaned = raw.replace('\\', "");
        let cleaned = cleaned.trim().trim_end_matches('/');
        if cleaned.is_empty() || cleaned == "@" {
            return Err(not_found());
        }

        if let Some(absolute) = with_scheme(cleaned) {
            let url = Url::parse(&absolute).map_err(|_| not_found())?;
            return Ok(Self::from_url(&url));
        }

        let bare = cleaned.trim_start_matches('@');
        let bare = bare.strip_suffix("/live").unwrap_or(bare);
        Ok(Self::channel(&format!("@{bare}")))
    }

    fn from_url(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default();
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        if host == "youtu.be" {
            if let Some(id) = segments.first().copied().filter(|id| valid_id(id)) {
                return Self::video(id);
            }
        } else if is_youtube_host(host) {
            match segments.as_slice() {
                ["watch", ..] => {
                    let id = url
                        .query_pairs()
                        .find(|(key, _)| key == "v")
                        .map(|(_, value)| value.into_owned());
                    if let Some(id) = id.filter(|id| valid_id(id)) {
                        return Self::video(&id);
                    }
                }
                // Broadcast permalinks, not channel pages
                ["live" | "shorts", id, ..] if valid_id(id) => return Self::video(id),
                [handle, ..] if handle.starts_with('@') => return Self::channel(handle),
                [kind @ ("c" | "channel" | "user"), name, ..] => {
                    return Self::Channel {
                        url: format!("{YOUTUBE_ORIGIN}/{kind}/{name}"),
                        handle: (*name).to_string(),
                    };
                }
                _ => {}
            }
        }

        // Unknown shape: keep as-is and let the extractor decide.
        let mut url = url.clone();
        url.set_fragment(None);
        let raw = url.as_str().trim_end_matches('/').to_string();
        let handle = segments.last().copied().unwrap_or(host).to_string();
        Self::Channel { url: raw, handle }
    }

    fn channel(handle: &str) -> Self {
        Self::Channel {
            url: format!("{YOUTUBE_ORIGIN}/{handle}"),
            handle: handle.to_string(),
        }
    }

    fn video(id: &str) -> Self {
        Self::Video {
            url: format!("{WATCH_PREFIX}{id}"),
            id: id.to_string(),
        }
    }

    /// The canonical reference URL
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Channel { url, .. } | Self::Video { url, .. } => url,
        }
    }

    /// The URL to query for a currently-running broadcast
    #[must_use]
    pub fn live_url(&self) -> String {
        match self {
            Self::Channel { url, .. } => format!("{url}/live"),
            Self::Video { url, .. } => url.clone(),
        }
    }

    /// Whether this reference names a channel
    #[must_use]
    pub fn is_channel(&self) -> bool {
        matches!(self, Self::Channel { .. })
    }

    /// Title used when only the heuristic tier could confirm the broadcast
    #[must_use]
    pub fn fallback_title(&self) -> String {
        match self {
            Self::Channel { handle, .. } => format!("Live Stream from {handle}"),
            Self::Video { id, .. } => format!("Live Stream {id}"),
        }
    }
}

impl fmt::Display for SourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url())
    }
}

fn is_youtube_host(host: &str) -> bool {
    host == "youtube.com" || host.ends_with(".youtube.com")
}

/// Absolute form of `s` when it is a URL, including scheme-less YouTube links
fn with_scheme(s: &str) -> Option<String> {
    if s.starts_with("http://") || s.starts_with("https://") {
        return Some(s.to_string());
    }
    let host = s.split('/').next().unwrap_or_default();
    (host == "youtu.be" || is_youtube_host(host)).then(|| format!("https://{s}"))
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
