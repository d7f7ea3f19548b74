//! Configuration file parser for `advisory-feeds.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings since they are
//! usually typos.
use chrono::FixedOffset;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::advisory::{Category, TitleStyle};
use crate::feed::{validate_slug, RetryPolicy};
use crate::runner::Region;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Well-formed TOML with a value the pipeline cannot run with.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Regional forecast index; each region's page is `<base_url><slug>`.
    pub base_url: String,

    /// Directory holding one `<slug>.rss` per region.
    pub output_dir: PathBuf,

    /// Retention bound per feed.
    pub max_items: usize,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Retries for 429, 5xx and truncated responses.
    pub max_retries: u32,

    /// First backoff delay; doubles on each retry.
    pub retry_base_delay_ms: u64,

    /// UTC offset of times printed on the pages (Philippine time is +8).
    pub utc_offset_hours: i32,

    /// Regions fetched at the same time.
    pub concurrency: usize,

    pub user_agent: String,

    /// `page` keeps each advisory's own heading; `numbered` writes
    /// `Rainfall Advisory No. 3 #VISPRSD` style titles.
    pub title_style: TitleStyle,

    /// Region slug to category names. An empty list means every category.
    pub regions: BTreeMap<String, Vec<String>>,
}

/// The agency's regional services divisions.
const DEFAULT_REGIONS: [&str; 5] = ["ncrprsd", "nlprsd", "slprsd", "visprsd", "mprsd"];

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://www.pagasa.dost.gov.ph/regional-forecast/".to_string(),
            output_dir: PathBuf::from("feeds"),
            max_items: 50,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 2000,
            utc_offset_hours: 8,
            concurrency: 1,
            user_agent: concat!("advisory-feeds/", env!("CARGO_PKG_VERSION")).to_string(),
            title_style: TitleStyle::Page,
            regions: DEFAULT_REGIONS
                .iter()
                .map(|slug| (slug.to_string(), Vec::new()))
                .collect(),
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "base_url",
                "output_dir",
                "max_items",
                "request_timeout_secs",
                "max_retries",
                "retry_base_delay_ms",
                "utc_offset_hours",
                "concurrency",
                "user_agent",
                "title_style",
                "regions",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            regions = config.regions.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Checks value ranges. Called by [`Config::load`] and again after
    /// command-line overrides are applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_items == 0 {
            return Err(ConfigError::Invalid("max_items must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        self.utc_offset()?;
        self.base_url()?;
        self.regions()?;
        Ok(())
    }

    /// The parsed `base_url`; only http and https are accepted.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url {:?}: {e}", self.base_url)))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ConfigError::Invalid(format!(
                "base_url scheme '{scheme}' is not allowed, use http or https"
            ))),
        }
    }

    /// Configured regions with their resolved categories, in slug order.
    pub fn regions(&self) -> Result<Vec<Region>, ConfigError> {
        self.regions
            .iter()
            .map(|(slug, names)| {
                validate_slug(slug).map_err(|e| ConfigError::Invalid(e.to_string()))?;
                let categories = region_categories(names)?;
                Ok(Region::new(slug.clone(), categories))
            })
            .collect()
    }

    /// Replaces the configured regions with `slugs`, each watching every
    /// category.
    pub fn set_region_slugs(&mut self, slugs: &[String]) {
        self.regions = slugs
            .iter()
            .map(|slug| (slug.clone(), Vec::new()))
            .collect();
    }

    /// Offset applied to times printed on the pages.
    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(ConfigError::Invalid(format!(
                "utc_offset_hours {} is outside -12..=14",
                self.utc_offset_hours
            )));
        }
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            ConfigError::Invalid(format!("utc_offset_hours {}", self.utc_offset_hours))
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Resolves category names for one region; an empty list selects all.
pub fn region_categories(names: &[String]) -> Result<Vec<Category>, ConfigError> {
    if names.is_empty() {
        return Ok(Category::ALL.to_vec());
    }
    names
        .iter()
        .map(|name| {
            Category::from_label(name)
                .ok_or_else(|| ConfigError::Invalid(format!("Unknown advisory category {name:?}")))
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
