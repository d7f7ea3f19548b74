//! Per-region RSS feeds for PAGASA rainfall, thunderstorm and special
//! forecast advisories.
//!
//! Each run fetches a regional forecast page, extracts the advisories on it,
//! merges them into that region's persisted feed without duplicates and
//! republishes the feed.

pub mod advisory;
pub mod config;
pub mod feed;
pub mod runner;
pub mod util;
