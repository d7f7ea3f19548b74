//! Drives fetch → extract → load → merge → publish for each configured region.
//!
//! Regions are independent: a failure in one is reported in its
//! [`RegionOutcome`] and never prevents the others from publishing.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use thiserror::Error;

use crate::advisory::extractor::DEFAULT_UTC_OFFSET_SECS;
use crate::advisory::{merge_at, Category, ExtractError, Extractor, FeedDocument, TitleStyle};
use crate::feed::{ChannelInfo, FeedStore, FetchError, Fetcher, StoreError};

/// One regional page and the categories extracted from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub slug: String,
    pub categories: Vec<Category>,
}

impl Region {
    pub fn new(slug: impl Into<String>, categories: Vec<Category>) -> Self {
        Self {
            slug: slug.into(),
            categories,
        }
    }

    /// A region watching every category.
    pub fn all_categories(slug: impl Into<String>) -> Self {
        Self::new(slug, Category::ALL.to_vec())
    }
}

/// Settings shared by every region in a run.
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub max_items: usize,
    pub utc_offset: FixedOffset,
    pub concurrency: usize,
    pub title_style: TitleStyle,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_items: 50,
            utc_offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
            concurrency: 1,
            title_style: TitleStyle::default(),
        }
    }
}

/// Why a region was skipped. Its previously published feed is left untouched.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("Failed to fetch page: {0}")]
    Fetch(#[from] FetchError),
    #[error("Failed to extract advisories: {0}")]
    Extract(#[from] ExtractError),
    #[error("Failed to publish feed: {0}")]
    Publish(#[from] StoreError),
}

/// What a successful region run changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionReport {
    pub path: PathBuf,
    pub extracted: usize,
    pub inserted: usize,
    pub dropped: usize,
    /// Items in the published feed.
    pub items: usize,
    /// A persisted feed was unreadable and has been moved to this path.
    pub quarantined: Option<PathBuf>,
}

/// Outcome for one region, keyed by its slug.
#[derive(Debug)]
pub struct RegionOutcome {
    pub slug: String,
    pub result: Result<RegionReport, RegionError>,
}

pub struct Runner {
    fetcher: Fetcher,
    store: FeedStore,
    settings: RunSettings,
}

impl Runner {
    pub fn new(fetcher: Fetcher, store: FeedStore, settings: RunSettings) -> Self {
        Self {
            fetcher,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &FeedStore {
        &self.store
    }

    /// Runs every region with at most `settings.concurrency` in flight.
    ///
    /// Outcomes are returned in completion order, not input order.
    pub async fn run_all(&self, regions: &[Region]) -> Vec<RegionOutcome> {
        if regions.is_empty() {
            return Vec::new();
        }

        stream::iter(regions.iter())
            .map(|region| async move {
                let result = self.run_region(region).await;
                if let Err(e) = &result {
                    tracing::error!(region = %region.slug, error = %e, "Region skipped");
                }
                RegionOutcome {
                    slug: region.slug.clone(),
                    result,
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    pub async fn run_region(&self, region: &Region) -> Result<RegionReport, RegionError> {
        self.run_region_at(region, Utc::now()).await
    }

    /// Runs one region, using `now` for approximate timestamps and
    /// `last_updated`.
    ///
    /// Nothing is written unless the page was fetched and extracted
    /// successfully.
    pub async fn run_region_at(
        &self,
        region: &Region,
        now: DateTime<Utc>,
    ) -> Result<RegionReport, RegionError> {
        let slug = region.slug.as_str();
        self.store.path_for(slug)?;
        let page_url = self.fetcher.page_url(slug)?;

        let page = self.fetcher.fetch(slug).await?;
        let records = Extractor::new(region.categories.iter().copied())
            .with_utc_offset(self.settings.utc_offset)
            .with_page_url(page_url.clone())
            .with_title_style(self.settings.title_style)
            .extract_at(&page, slug, now)?;
        let extracted = records.len();

        let (existing, quarantined) = self.load_or_recover(slug).await?;

        let merged = merge_at(existing, records, self.settings.max_items, now);
        if merged.backdated > 0 {
            tracing::warn!(
                region = %slug,
                backdated = merged.backdated,
                "New advisories are older than the newest published item, feed is out of date order"
            );
        }

        let channel = ChannelInfo::for_region(slug, page_url.as_str());
        let path = self.store.publish(&merged.document, &channel).await?;

        tracing::info!(
            region = %slug,
            extracted = extracted,
            inserted = merged.inserted,
            skipped = merged.skipped,
            dropped = merged.dropped,
            items = merged.document.len(),
            "Feed updated"
        );

        Ok(RegionReport {
            path,
            extracted,
            inserted: merged.inserted,
            dropped: merged.dropped,
            items: merged.document.len(),
            quarantined,
        })
    }

    /// Loads the persisted feed. An unreadable feed is moved aside and
    /// replaced by an empty one so the region keeps publishing.
    async fn load_or_recover(
        &self,
        slug: &str,
    ) -> Result<(FeedDocument, Option<PathBuf>), StoreError> {
        match self.store.load(slug).await {
            Ok(doc) => Ok((doc, None)),
            Err(e @ (StoreError::CorruptFeed(_) | StoreError::Io { .. })) => {
                let quarantined = self.store.quarantine(slug).await?;
                tracing::warn!(
                    region = %slug,
                    error = %e,
                    moved_to = ?quarantined,
                    "CorruptPersistedFeed: starting from an empty feed"
                );
                Ok((FeedDocument::empty(slug), quarantined))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::RetryPolicy;
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<html><body>
      <div id="rainfalls">
        <div>Rainfall Advisory No. 3<br>Moderate to heavy rains over Samar.<br>Issued at 11:00 AM, 16 October 2026</div>
      </div>
      <div id="thunderstorms">
        <div>Thunderstorm Advisory No. 1<br>Thunderstorms over Leyte.<br>Issued at 9:00 AM, 16 October 2026</div>
      </div>
    </body></html>"#;

    fn runner(server: &MockServer, dir: &tempfile::TempDir) -> Runner {
        let base = Url::parse(&format!("{}/regional-forecast/", server.uri())).unwrap();
        let fetcher = Fetcher::new(reqwest::Client::new(), base).with_retry(RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
        });
        Runner::new(
            fetcher,
            FeedStore::new(dir.path()),
            RunSettings {
                concurrency: 2,
                ..RunSettings::default()
            },
        )
    }

    async fn serve(server: &MockServer, slug: &str, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/regional-forecast/{slug}")))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_failing_region_does_not_block_others() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        serve(&server, "visprsd", 200, PAGE).await;
        serve(&server, "mprsd", 404, "").await;

        let runner = runner(&server, &dir);
        let regions = [
            Region::all_categories("mprsd"),
            Region::all_categories("visprsd"),
        ];
        let mut outcomes = runner.run_all(&regions).await;
        outcomes.sort_by(|a, b| a.slug.cmp(&b.slug));

        assert!(matches!(
            outcomes[0].result,
            Err(RegionError::Fetch(FetchError::HttpStatus(404)))
        ));
        let report = outcomes[1].result.as_ref().unwrap();
        assert_eq!(report.inserted, 2);
        assert!(dir.path().join("visprsd.rss").exists());
        assert!(!dir.path().join("mprsd.rss").exists());
    }

    #[tokio::test]
    async fn test_rerun_on_same_page_does_not_grow_feed() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        serve(&server, "visprsd", 200, PAGE).await;

        let runner = runner(&server, &dir);
        let region = Region::all_categories("visprsd");

        let first = runner.run_region(&region).await.unwrap();
        let second = runner.run_region(&region).await.unwrap();

        assert_eq!(first.items, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.items, 2);

        let feed = runner.store().load("visprsd").await.unwrap();
        assert_eq!(feed.items[0].title, "Rainfall Advisory No. 3");
    }

    #[tokio::test]
    async fn test_malformed_page_leaves_feed_untouched() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        serve(&server, "visprsd", 200, "   \n  ").await;

        let original = "<rss version=\"2.0\"><channel><title>kept</title></channel></rss>";
        std::fs::write(dir.path().join("visprsd.rss"), original).unwrap();

        let runner = runner(&server, &dir);
        let result = runner.run_region(&Region::all_categories("visprsd")).await;

        assert!(matches!(result, Err(RegionError::Extract(_))));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("visprsd.rss")).unwrap(),
            original
        );
    }

    #[tokio::test]
    async fn test_corrupt_persisted_feed_is_quarantined_and_rebuilt() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        serve(&server, "visprsd", 200, PAGE).await;
        std::fs::write(dir.path().join("visprsd.rss"), "<not valid xml").unwrap();

        let runner = runner(&server, &dir);
        let report = runner
            .run_region(&Region::all_categories("visprsd"))
            .await
            .unwrap();

        let moved = report.quarantined.expect("corrupt feed should be moved aside");
        assert_eq!(std::fs::read_to_string(moved).unwrap(), "<not valid xml");
        assert_eq!(report.items, 2);
        assert_eq!(runner.store().load("visprsd").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_only_configured_categories_published() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        serve(&server, "visprsd", 200, PAGE).await;

        let runner = runner(&server, &dir);
        let report = runner
            .run_region(&Region::new("visprsd", vec![Category::Thunderstorm]))
            .await
            .unwrap();

        assert_eq!(report.items, 1);
        let feed = runner.store().load("visprsd").await.unwrap();
        assert_eq!(feed.items[0].category, Category::Thunderstorm);
    }

    #[tokio::test]
    async fn test_numbered_title_style_reaches_published_feed() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        serve(&server, "visprsd", 200, PAGE).await;

        let base = Url::parse(&format!("{}/regional-forecast/", server.uri())).unwrap();
        let runner = Runner::new(
            Fetcher::new(reqwest::Client::new(), base),
            FeedStore::new(dir.path()),
            RunSettings {
                title_style: TitleStyle::Numbered,
                ..RunSettings::default()
            },
        );
        runner
            .run_region(&Region::all_categories("visprsd"))
            .await
            .unwrap();

        let feed = runner.store().load("visprsd").await.unwrap();
        let titles: Vec<_> = feed.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Rainfall Advisory No. 3 #VISPRSD",
                "Thunderstorm Advisory No. 1 #VISPRSD"
            ]
        );
    }

    #[tokio::test]
    async fn test_unsafe_slug_is_rejected_before_fetching() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .expect(0)
            .mount(&server)
            .await;

        let runner = runner(&server, &dir);
        let result = runner.run_region(&Region::all_categories("../visprsd")).await;
        assert!(matches!(
            result,
            Err(RegionError::Publish(StoreError::InvalidSlug(_)))
        ));
    }
}
