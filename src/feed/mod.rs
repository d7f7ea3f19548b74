//! Getting pages in and feeds out.
//!
//! - [`fetcher`] - HTTP retrieval of regional pages with timeout, retry and
//!   a body size cap
//! - [`rss`] - RSS 2.0 encoding (`quick-xml`) and decoding (`feed-rs`) of a
//!   [`FeedDocument`](crate::advisory::FeedDocument)
//! - [`store`] - one `<slug>.rss` per region on disk, replaced atomically
//!
//! # Example
//!
//! ```ignore
//! use advisory_feeds::feed::{ChannelInfo, FeedStore, Fetcher};
//!
//! let fetcher = Fetcher::new(client, base_url);
//! let page = fetcher.fetch("visprsd").await?;
//!
//! let store = FeedStore::new("feeds");
//! let doc = store.load("visprsd").await?;
//! store.publish(&doc, &ChannelInfo::for_region("visprsd", page_url.as_str())).await?;
//! ```

pub mod fetcher;
pub mod rss;
pub mod store;

pub use fetcher::{FetchError, Fetcher, RetryPolicy};
pub use rss::{read_feed, write_feed, ChannelInfo, RssError};
pub use store::{validate_slug, FeedStore, StoreError};
