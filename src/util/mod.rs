//! Utility functions for common operations.
//!
//! - **Text processing**: whitespace normalization and control-character
//!   stripping for text scraped from advisory pages.
//!
//! # Examples
//!
//! ```
//! use advisory_feeds::util::{collapse_whitespace, strip_control_chars};
//!
//! let clean = strip_control_chars("Thunderstorm\x07 Advisory");
//! assert_eq!(collapse_whitespace(&clean), "Thunderstorm Advisory");
//! ```

mod text;

pub use text::{collapse_whitespace, normalize_lines, strip_control_chars};
