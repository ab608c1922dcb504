//! Translation record model
//!
//! A translation record tracks one attempt to produce a locale variant of a
//! post. Records move `pending -> completed | failed` and are never reused;
//! "no record" is the implicit initial state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One translation attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub id: i64,
    pub source_post_id: i64,
    pub target_locale: String,
    pub status: TranslationStatus,
    /// Post produced by a completed translation
    pub result_post_id: Option<i64>,
    /// Set when the attempt failed
    pub failure_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored status of a translation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationStatus {
    Pending,
    Completed,
    Failed,
}

impl TranslationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationStatus::Pending => "pending",
            TranslationStatus::Completed => "completed",
            TranslationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TranslationStatus::Pending),
            "completed" => Some(TranslationStatus::Completed),
            "failed" => Some(TranslationStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TranslationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Translation state of a post for one target locale, derived from its records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationState {
    Untranslated,
    Pending,
    Translated,
}

impl TranslationState {
    /// Derive the state from a post's records for a single locale.
    ///
    /// A pending attempt wins over an earlier completed one, so a
    /// re-translation in flight reports `Pending`.
    pub fn derive<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a TranslationRecord>,
    {
        let mut state = TranslationState::Untranslated;
        for record in records {
            match record.status {
                TranslationStatus::Pending => return TranslationState::Pending,
                TranslationStatus::Completed => state = TranslationState::Translated,
                TranslationStatus::Failed => {}
            }
        }
        state
    }
}

/// Check a language tag of the form `xx`, `xxx`, or `xx-YY[-...]`.
///
/// The primary subtag is 2-3 ASCII letters; further subtags are 1-8 ASCII
/// alphanumerics.
pub fn is_valid_locale(tag: &str) -> bool {
    let mut parts = tag.split('-');
    let primary_ok = parts
        .next()
        .is_some_and(|p| (2..=3).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphabetic()));
    primary_ok
        && parts.all(|p| (1..=8).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// Locale tags compare case-insensitively
pub fn same_locale(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Normalize the casing of a valid tag: `ZH-cn` becomes `zh-CN`,
/// `sr-latn` becomes `sr-Latn`. Returns `None` for invalid tags.
pub fn canonical_locale(tag: &str) -> Option<String> {
    let tag = tag.trim();
    if !is_valid_locale(tag) {
        return None;
    }

    let canonical = tag
        .split('-')
        .enumerate()
        .map(|(i, part)| match (i, part.len()) {
            (0, _) => part.to_ascii_lowercase(),
            (_, 2) => part.to_ascii_uppercase(),
            (_, 4) => {
                let lower = part.to_ascii_lowercase();
                let mut chars = lower.chars();
                chars
                    .next()
                    .map(|c| c.to_ascii_uppercase().to_string() + chars.as_str())
                    .unwrap_or_default()
            }
            _ => part.to_ascii_lowercase(),
        })
        .collect::<Vec<_>>()
        .join("-");

    Some(canonical)
}
