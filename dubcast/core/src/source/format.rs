//! Format Selection
//!
//! Picks the best audio-capable rendition. Ranking uses the sum of the two
//! bitrate metrics with a missing metric counted as zero, so a candidate that
//! omits either metric is still ranked instead of failing selection.

use thiserror::Error;

use super::FormatCandidate;

/// Why no rendition could be selected
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// No candidate carries an audio track
    #[error("no audio-capable format available")]
    NoAudioFormat,

    /// The descriptor or the chosen candidate has no media URL
    #[error("source descriptor has no media URL")]
    MissingUrlField,
}

/// Choose the best audio-capable candidate
///
/// Audio-only candidates are preferred; when there are none, every
/// audio-capable candidate is eligible. Ties keep the original order.
///
/// # Errors
///
/// Returns [`FormatError::NoAudioFormat`] when no candidate has audio.
pub fn choose(candidates: &[FormatCandidate]) -> Result<FormatCandidate, FormatError> {
    let audio: Vec<&FormatCandidate> = candidates.iter().filter(|c| c.has_audio).collect();
    if audio.is_empty() {
        return Err(FormatError::NoAudioFormat);
    }

    let audio_only: Vec<&FormatCandidate> =
        audio.iter().copied().filter(|c| !c.has_video).collect();
    let mut pool = if audio_only.is_empty() { audio } else { audio_only };

    // sort_by is stable, so equal scores keep extractor order
    pool.sort_by(|a, b| b.score().total_cmp(&a.score()));

    pool.first()
        .map(|c| (*c).clone())
        .ok_or(FormatError::NoAudioFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, a: Option<f64>, b: Option<f64>) -> FormatCandidate {
        FormatCandidate {
            format_id: Some(id.to_string()),
            has_audio: true,
            has_video: false,
            audio_bitrate: a,
            total_bitrate: b,
            url: Some(format!("https://media.example/{id}")),
        }
    }

    fn chosen_id(candidates: &[FormatCandidate]) -> String {
        choose(candidates).unwrap().format_id.unwrap()
    }

    #[test]
    fn test_missing_metrics_rank_as_zero() {
        let candidates = vec![
            candidate("none-none", None, None),
            candidate("128-none", Some(128.0), None),
            candidate("none-256", None, Some(256.0)),
            candidate("64-128", Some(64.0), Some(128.0)),
        ];
        assert_eq!(chosen_id(&candidates), "none-256");
    }

    #[test]
    fn test_all_metrics_missing_never_fails() {
        let candidates = vec![candidate("a", None, None), candidate("b", None, None)];
        assert_eq!(chosen_id(&candidates), "a");
    }

    #[test]
    fn test_ties_keep_original_order() {
        let candidates = vec![
            candidate("first", Some(100.0), None),
            candidate("second", None, Some(100.0)),
        ];
        assert_eq!(chosen_id(&candidates), "first");
    }

    #[test]
    fn test_audio_only_preferred_over_higher_bitrate_muxed() {
        let mut muxed = candidate("muxed", Some(128.0), Some(3000.0));
        muxed.has_video = true;
        let candidates = vec![muxed, candidate("audio", Some(48.0), None)];
        assert_eq!(chosen_id(&candidates), "audio");
    }

    #[test]
    fn test_muxed_used_when_no_audio_only() {
        let mut low = candidate("low", None, Some(500.0));
        low.has_video = true;
        let mut high = candidate("high", None, Some(900.0));
        high.has_video = true;
        assert_eq!(chosen_id(&[low, high]), "high");
    }

    #[test]
    fn test_no_audio_format() {
        let mut video = candidate("video", None, Some(900.0));
        video.has_audio = false;
        video.has_video = true;
        assert_eq!(choose(&[video]), Err(FormatError::NoAudioFormat));
        assert_eq!(choose(&[]), Err(FormatError::NoAudioFormat));
    }
}
