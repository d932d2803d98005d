//! Live Extraction Adapter
//!
//! [`LiveExtractor`] is the seam between the resolver and whatever actually
//! talks to the video platform. [`YtDlpExtractor`] drives the `yt-dlp`
//! executable through `tokio::process` and parses its JSON output into the
//! strict descriptor types; page fetches for the keyword heuristic go through
//! `reqwest`.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use super::descriptor::{ExtractedInfo, FormatCandidate, LiveSourceDescriptor};
use crate::config::ExtractorConfig;

/// Failure reported by a live extractor
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExtractorError {
    /// The extractor cleanly reported that nothing is live at this URL
    #[error("not currently live: {url}")]
    NotLive {
        /// URL that was queried
        url: String,
    },

    /// The page, channel or video does not exist
    #[error("not found: {url}")]
    NotFound {
        /// URL that was queried
        url: String,
    },

    /// Network failure, blocked access, bad output or a missing executable
    #[error("extractor failed: {message}")]
    Failed {
        /// Human-readable cause
        message: String,
    },
}

/// One recent upload or broadcast of a channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntrySummary {
    /// Watch URL
    pub url: String,
    /// Title, if listed
    pub title: Option<String>,
    /// The listing marks this entry as live
    pub is_live: bool,
}

/// Access to the live-extraction capability
#[async_trait]
pub trait LiveExtractor: Send + Sync {
    /// Extract full detail for a URL
    async fn extract(&self, url: &str) -> Result<LiveSourceDescriptor, ExtractorError>;

    /// List up to `limit` most recent entries of a channel
    async fn recent_entries(
        &self,
        channel_url: &str,
        limit: usize,
    ) -> Result<Vec<EntrySummary>, ExtractorError>;

    /// Fetch raw page content for heuristic detection
    async fn fetch_page(&self, url: &str) -> Result<String, ExtractorError>;

    /// Candidate formats for a media or page URL
    async fn formats(&self, url: &str) -> Result<Vec<FormatCandidate>, ExtractorError> {
        Ok(self.extract(url).await?.formats)
    }
}

// ============================================================================
// yt-dlp adapter
// ============================================================================

/// [`LiveExtractor`] backed by the `yt-dlp` executable
pub struct YtDlpExtractor {
    program: String,
    client: reqwest::Client,
}

impl YtDlpExtractor {
    /// Build from configuration
    ///
    /// # Errors
    ///
    /// Returns [`ExtractorError::Failed`] if the HTTP client cannot be built.
    pub fn new(config: &ExtractorConfig) -> Result<Self, ExtractorError> {
        let client = reqwest::Client::builder()
            .timeout(config.page_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ExtractorError::Failed {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            program: config.program.clone(),
            client,
        })
    }

    async fn run_json(&self, url: &str, args: &[&str]) -> Result<ExtractedInfo, ExtractorError> {
        tracing::debug!(program = %self.program, url, ?args, "Running extractor");

        let output = Command::new(&self.program)
            .args(args)
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExtractorError::Failed {
                message: format!("failed to run {}: {e}", self.program),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(url, &stderr));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| ExtractorError::Failed {
            message: format!("unparsable extractor output: {e}"),
        })
    }
}

/// Map extractor stderr onto the error taxonomy
fn classify_failure(url: &str, stderr: &str) -> ExtractorError {
    let lower = stderr.to_lowercase();
    if lower.contains("not currently live")
        || lower.contains("live event will begin")
        || lower.contains("premieres in")
    {
        ExtractorError::NotLive {
            url: url.to_string(),
        }
    } else if lower.contains("does not exist")
        || lower.contains("http error 404")
        || lower.contains("video unavailable")
    {
        ExtractorError::NotFound {
            url: url.to_string(),
        }
    } else {
        let message = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("exited with failure")
            .trim()
            .to_string();
        ExtractorError::Failed { message }
    }
}

#[async_trait]
impl LiveExtractor for YtDlpExtractor {
    async fn extract(&self, url: &str) -> Result<LiveSourceDescriptor, ExtractorError> {
        let info = self
            .run_json(url, &["-J", "--no-warnings", "--no-playlist", "-f", "bestaudio/best"])
            .await?;
        Ok(info.into_descriptor(url))
    }

    async fn recent_entries(
        &self,
        channel_url: &str,
        limit: usize,
    ) -> Result<Vec<EntrySummary>, ExtractorError> {
        let end = limit.to_string();
        let info = self
            .run_json(
                channel_url,
                &["-J", "--no-warnings", "--flat-playlist", "--playlist-end", &end],
            )
            .await?;

        Ok(info
            .entries
            .unwrap_or_default()
            .into_iter()
            .take(limit)
            .filter_map(|entry| {
                let url = entry.watch_url()?;
                Some(EntrySummary {
                    is_live: entry.is_live(),
                    title: entry.title,
                    url,
                })
            })
            .collect())
    }

    async fn fetch_page(&self, url: &str) -> Result<String, ExtractorError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractorError::Failed {
                message: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ExtractorError::NotFound {
                url: url.to_string(),
            });
        }

        response.text().await.map_err(|e| ExtractorError::Failed {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_live() {
        let err = classify_failure(
            "u",
            "ERROR: [youtube:tab] @news: The channel is not currently live",
        );
        assert_eq!(err, ExtractorError::NotLive { url: "u".into() });
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify_failure("u", "ERROR: [youtube] abc: Video unavailable");
        assert!(matches!(err, ExtractorError::NotFound { .. }));
    }

    #[test]
    fn test_classify_other_failure_keeps_last_line() {
        let err = classify_failure("u", "WARNING: retrying\nERROR: Sign in to confirm\n\n");
        assert_eq!(
            err,
            ExtractorError::Failed {
                message: "ERROR: Sign in to confirm".into()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_failure() {
        let config = ExtractorConfig {
            program: "/nonexistent/dubcast-yt-dlp".into(),
            ..ExtractorConfig::default()
        };
        let extractor = YtDlpExtractor::new(&config).unwrap();
        let err = extractor.extract("https://example.invalid").await.unwrap_err();
        assert!(matches!(err, ExtractorError::Failed { .. }));
    }
}
