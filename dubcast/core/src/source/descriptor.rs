//! Live Source Descriptors
//!
//! The extractor's JSON is loosely shaped: any field may be missing, codecs
//! are spelled `"none"` when absent, and bitrates come and go. [`ExtractedInfo`]
//! mirrors that raw shape; [`LiveSourceDescriptor`] and [`FormatCandidate`] are
//! the strict structures the rest of the pipeline consumes.

use serde::{Deserialize, Serialize};

// ============================================================================
// Strict structures
// ============================================================================

/// One downloadable rendition of a broadcast
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FormatCandidate {
    /// Extractor-specific format id, if any
    pub format_id: Option<String>,
    /// An audio codec is present
    pub has_audio: bool,
    /// A video codec is present
    pub has_video: bool,
    /// Audio bitrate (kbit/s)
    pub audio_bitrate: Option<f64>,
    /// Total bitrate (kbit/s)
    pub total_bitrate: Option<f64>,
    /// Media URL for this rendition
    pub url: Option<String>,
}

impl FormatCandidate {
    /// Ranking score: the sum of both bitrates with an absent metric as zero
    #[must_use]
    pub fn score(&self) -> f64 {
        self.audio_bitrate.unwrap_or(0.0) + self.total_bitrate.unwrap_or(0.0)
    }

    /// Audio present and no video track
    #[must_use]
    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }
}

/// Everything known about a running broadcast
///
/// Created fresh per resolve and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LiveSourceDescriptor {
    /// The page or watch URL the descriptor was resolved from
    pub reference_url: String,
    /// Directly playable media URL, if the extractor supplied one
    pub media_url: Option<String>,
    /// Broadcast title
    pub title: String,
    /// Channel name
    pub channel: Option<String>,
    /// Concurrent viewers or total views
    pub view_count: Option<u64>,
    /// The extractor reported the broadcast as live
    pub is_live: bool,
    /// Candidate renditions in extractor order
    pub formats: Vec<FormatCandidate>,
}

// ============================================================================
// Raw extractor JSON
// ============================================================================

/// Top-level object printed by `yt-dlp -J`
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExtractedInfo {
    /// Video id
    pub id: Option<String>,
    /// Title
    pub title: Option<String>,
    /// Channel display name
    pub channel: Option<String>,
    /// Uploader, used when `channel` is missing
    pub uploader: Option<String>,
    /// View count
    pub view_count: Option<u64>,
    /// Explicit live flag
    pub is_live: Option<bool>,
    /// `"is_live"`, `"was_live"`, `"not_live"`, ...
    pub live_status: Option<String>,
    /// Selected media URL
    pub url: Option<String>,
    /// Canonical page URL
    pub webpage_url: Option<String>,
    /// Available renditions
    pub formats: Option<Vec<RawFormat>>,
    /// Playlist entries (channel tabs, flat playlists)
    pub entries: Option<Vec<RawEntry>>,
}

/// One entry of the `formats` array
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawFormat {
    /// Format id
    pub format_id: Option<String>,
    /// Audio codec or `"none"`
    pub acodec: Option<String>,
    /// Video codec or `"none"`
    pub vcodec: Option<String>,
    /// Audio bitrate
    pub abr: Option<f64>,
    /// Total bitrate
    pub tbr: Option<f64>,
    /// Media URL
    pub url: Option<String>,
}

/// One entry of a flat playlist
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawEntry {
    /// Video id
    pub id: Option<String>,
    /// Watch URL
    pub url: Option<String>,
    /// Title
    pub title: Option<String>,
    /// Explicit live flag
    pub is_live: Option<bool>,
    /// Live status string
    pub live_status: Option<String>,
}

fn reports_live(is_live: Option<bool>, live_status: Option<&str>) -> bool {
    is_live == Some(true) || live_status == Some("is_live")
}

fn codec_present(codec: Option<&str>) -> bool {
    // A missing codec field means the extractor did not say; only "none" is absent.
    !matches!(codec, Some("none"))
}

impl From<&RawFormat> for FormatCandidate {
    fn from(raw: &RawFormat) -> Self {
        Self {
            format_id: raw.format_id.clone(),
            has_audio: codec_present(raw.acodec.as_deref()),
            has_video: codec_present(raw.vcodec.as_deref()),
            audio_bitrate: raw.abr.filter(|v| v.is_finite()),
            total_bitrate: raw.tbr.filter(|v| v.is_finite()),
            url: raw.url.clone(),
        }
    }
}

impl ExtractedInfo {
    /// Whether the extractor reports a running broadcast
    #[must_use]
    pub fn is_live(&self) -> bool {
        reports_live(self.is_live, self.live_status.as_deref())
    }

    /// Build the strict descriptor
    #[must_use]
    pub fn into_descriptor(self, reference_url: &str) -> LiveSourceDescriptor {
        let is_live = self.is_live();
        let formats = self
            .formats
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(FormatCandidate::from)
            .collect();
        LiveSourceDescriptor {
            reference_url: self
                .webpage_url
                .unwrap_or_else(|| reference_url.to_string()),
            media_url: self.url,
            title: self
                .title
                .or(self.id)
                .unwrap_or_else(|| "Unknown".to_string()),
            channel: self.channel.or(self.uploader),
            view_count: self.view_count,
            is_live,
            formats,
        }
    }
}

impl RawEntry {
    /// Whether this entry reports a running broadcast
    #[must_use]
    pub fn is_live(&self) -> bool {
        reports_live(self.is_live, self.live_status.as_deref())
    }

    /// Watch URL, synthesised from the id when the entry has none
    #[must_use]
    pub fn watch_url(&self) -> Option<String> {
        match (&self.url, &self.id) {
            (Some(url), _) if url.starts_with("http") => Some(url.clone()),
            (_, Some(id)) => Some(format!("https://www.youtube.com/watch?v={id}")),
            _ => None,
        }
    }
}
