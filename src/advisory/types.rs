use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::util::collapse_whitespace;

// ============================================================================
// Category
// ============================================================================

/// Advisory categories the extractor knows how to recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Rainfall,
    Thunderstorm,
    SpecialForecast,
}

/// Returned when a category name in configuration or a persisted feed is not
/// one of the known categories.
#[derive(Debug, Error)]
#[error("Unknown advisory category: {0}")]
pub struct UnknownCategory(pub String);

impl Category {
    /// All categories, in the order they appear on the agency's regional page.
    pub const ALL: [Category; 3] = [
        Category::Rainfall,
        Category::Thunderstorm,
        Category::SpecialForecast,
    ];

    /// Configuration name (`rainfall`, `thunderstorm`, `special-forecast`).
    pub fn name(self) -> &'static str {
        match self {
            Category::Rainfall => "rainfall",
            Category::Thunderstorm => "thunderstorm",
            Category::SpecialForecast => "special-forecast",
        }
    }

    /// Human-readable label, also written as the RSS `<category>`.
    pub fn label(self) -> &'static str {
        match self {
            Category::Rainfall => "Rainfall Advisory",
            Category::Thunderstorm => "Thunderstorm Advisory",
            Category::SpecialForecast => "Special Forecast",
        }
    }

    /// Accepts either the configuration name or the display label,
    /// case-insensitively.
    pub fn from_label(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s) || c.label().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

// ============================================================================
// Advisory Record
// ============================================================================

/// Where an advisory's `published_at` came from.
///
/// Only [`TimestampSource::Extracted`] is approximate: the page gave no time
/// at all and the extraction time was used instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampSource {
    /// Found in the advisory's own markup or text.
    Section,
    /// The page-level "issued at" time.
    Document,
    /// Time of extraction.
    Extracted,
}

impl TimestampSource {
    pub fn is_approximate(self) -> bool {
        matches!(self, TimestampSource::Extracted)
    }
}

/// One published advisory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisoryRecord {
    pub region_slug: String,
    pub category: Category,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub timestamp_source: TimestampSource,
    /// Absolute URL of a detail page, when the advisory links to one.
    pub link: Option<String>,
    pub identity_key: String,
}

impl AdvisoryRecord {
    /// Builds a record and derives its identity key from the immutable content.
    pub fn new(
        region_slug: impl Into<String>,
        category: Category,
        title: impl Into<String>,
        body: impl Into<String>,
        published_at: DateTime<Utc>,
        timestamp_source: TimestampSource,
    ) -> Self {
        let title = title.into();
        let body = body.into();
        let identity_key = identity_key(category, &title, &body);
        Self {
            region_slug: region_slug.into(),
            category,
            title,
            body,
            published_at,
            timestamp_source,
            link: None,
            identity_key,
        }
    }

    pub fn with_link(mut self, link: Option<String>) -> Self {
        self.link = link;
        self
    }

    pub fn is_approximate(&self) -> bool {
        self.timestamp_source.is_approximate()
    }
}

/// Deterministic fingerprint of an advisory.
///
/// SHA-256 over the category name, title and body, each whitespace-collapsed
/// and joined by newlines. Collapsed fields never contain a newline, so the
/// joined input maps back to exactly one field triple.
///
/// Timestamps and links are excluded so that a guessed publish time or a
/// moved detail page never splits one advisory into two feed items.
pub fn identity_key(category: Category, title: &str, body: &str) -> String {
    let input = format!(
        "{}\n{}\n{}",
        category.name(),
        collapse_whitespace(title),
        collapse_whitespace(body)
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

// ============================================================================
// Feed Document
// ============================================================================

/// The publishable feed for one region: newest item first, identity keys
/// unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDocument {
    pub region_slug: String,
    pub items: Vec<AdvisoryRecord>,
    /// Time of the most recent merge. `None` for a feed that was never merged.
    pub last_updated: Option<DateTime<Utc>>,
}

impl FeedDocument {
    pub fn empty(region_slug: impl Into<String>) -> Self {
        Self {
            region_slug: region_slug.into(),
            items: Vec::new(),
            last_updated: None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_identity_key_ignores_timestamps() {
        let a = AdvisoryRecord::new(
            "visprsd",
            Category::Rainfall,
            "Heavy rainfall warning",
            "Expect flooding.",
            at(1),
            TimestampSource::Section,
        );
        let b = AdvisoryRecord::new(
            "visprsd",
            Category::Rainfall,
            "Heavy rainfall warning",
            "Expect flooding.",
            at(9),
            TimestampSource::Extracted,
        );
        assert_eq!(a.identity_key, b.identity_key);
    }

    #[test]
    fn test_identity_key_ignores_incidental_whitespace() {
        let a = identity_key(Category::Thunderstorm, "Thunderstorm advisory", "Line one\nLine two");
        let b = identity_key(
            Category::Thunderstorm,
            "  Thunderstorm   advisory ",
            "Line one   Line\ttwo",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_key_depends_on_category() {
        let a = identity_key(Category::Rainfall, "Advisory", "Body");
        let b = identity_key(Category::Thunderstorm, "Advisory", "Body");
        assert_ne!(a, b);
    }

    #[test]
    fn test_identity_key_fields_do_not_run_together() {
        let a = identity_key(Category::Rainfall, "Advisory|No. 1", "Samar");
        let b = identity_key(Category::Rainfall, "Advisory", "No. 1|Samar");
        assert_ne!(a, b);
    }

    #[test]
    fn test_identity_key_is_hex_sha256() {
        let key = identity_key(Category::SpecialForecast, "t", "b");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("rainfall".parse::<Category>().unwrap(), Category::Rainfall);
        assert_eq!(
            "Special Forecast".parse::<Category>().unwrap(),
            Category::SpecialForecast
        );
        assert_eq!(
            Category::from_label("THUNDERSTORM ADVISORY"),
            Some(Category::Thunderstorm)
        );
        assert!("typhoon".parse::<Category>().is_err());
    }

    #[test]
    fn test_only_extracted_timestamps_are_approximate() {
        assert!(!TimestampSource::Section.is_approximate());
        assert!(!TimestampSource::Document.is_approximate());
        assert!(TimestampSource::Extracted.is_approximate());
    }
}
