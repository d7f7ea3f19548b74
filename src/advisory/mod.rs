//! Advisory extraction and feed merging.
//!
//! - [`extractor`] - turns a regional advisory page into [`AdvisoryRecord`]s
//! - [`merger`] - folds new records into a persisted [`FeedDocument`]
//! - `timestamp` - publish-time recognition used by the extractor
//! - `types` - the shared data model and identity keys
//!
//! # Example
//!
//! ```ignore
//! use advisory_feeds::advisory::{merge, Extractor, FeedDocument};
//!
//! let records = Extractor::default().extract(&page_bytes, "visprsd")?;
//! let feed = merge(FeedDocument::empty("visprsd"), records, 50);
//! ```

pub mod extractor;
pub mod merger;
mod timestamp;
mod types;

pub use extractor::{extract, ExtractError, Extractor, TitleStyle};
pub use merger::{merge, merge_at, Merged};
pub use types::{
    identity_key, AdvisoryRecord, Category, FeedDocument, TimestampSource, UnknownCategory,
};
