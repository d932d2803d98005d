//! Supported Target Languages
//!
//! The fixed table of languages a session can translate into. Sessions are
//! keyed by the lowercase language name (`"tamil"`), while the translator
//! receives the display label (`"Tamil (ta)"`).

use serde::Serialize;

/// A supported translation target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TargetLanguage {
    /// Lowercase key used in routes and session ids
    pub key: &'static str,
    /// Label handed to the translator
    pub label: &'static str,
}

/// Every supported target language, in display order
pub const TARGET_LANGUAGES: &[TargetLanguage] = &[
    TargetLanguage { key: "english", label: "English (en)" },
    TargetLanguage { key: "tamil", label: "Tamil (ta)" },
    TargetLanguage { key: "malayalam", label: "Malayalam (ml)" },
    TargetLanguage { key: "gujarati", label: "Gujarati (gu)" },
    TargetLanguage { key: "kannada", label: "Kannada (kn)" },
    TargetLanguage { key: "marathi", label: "Marathi (mr)" },
    TargetLanguage { key: "japanese", label: "Japanese (ja)" },
    TargetLanguage { key: "korean", label: "Korean (ko)" },
    TargetLanguage { key: "hindi", label: "Hindi (hi)" },
    TargetLanguage { key: "spanish", label: "Spanish (es)" },
    TargetLanguage { key: "french", label: "French (fr)" },
    TargetLanguage { key: "german", label: "German (de)" },
    TargetLanguage { key: "chinese", label: "Chinese - Simplified (zh-CN)" },
    TargetLanguage { key: "arabic", label: "Arabic (ar)" },
    TargetLanguage { key: "portuguese", label: "Portuguese (pt)" },
    TargetLanguage { key: "russian", label: "Russian (ru)" },
    TargetLanguage { key: "italian", label: "Italian (it)" },
];

/// Look up a target language by key (case-insensitive)
#[must_use]
pub fn lookup(key: &str) -> Option<TargetLanguage> {
    let key = key.trim().to_lowercase();
    TARGET_LANGUAGES.iter().copied().find(|l| l.key == key)
}

/// Keys of every supported language
#[must_use]
pub fn keys() -> Vec<&'static str> {
    TARGET_LANGUAGES.iter().map(|l| l.key).collect()
}
