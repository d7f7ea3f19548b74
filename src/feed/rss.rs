use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;

use crate::advisory::{AdvisoryRecord, Category, FeedDocument, TimestampSource};

/// Errors that can occur while encoding or decoding an RSS feed.
#[derive(Debug, Error)]
pub enum RssError {
    /// Writing XML into the output buffer failed
    #[error("Failed to write RSS: {0}")]
    Write(#[from] std::io::Error),
    /// XML serialization error
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    /// The persisted document is not a readable feed
    #[error("Failed to parse feed: {0}")]
    Parse(String),
}

/// Channel-level metadata written alongside the items.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub title: String,
    pub link: String,
    pub description: String,
}

impl ChannelInfo {
    /// Standard channel text for one regional page.
    pub fn for_region(region_slug: &str, page_url: &str) -> Self {
        let upper = region_slug.to_uppercase();
        Self {
            title: format!("PAGASA {upper} Advisories"),
            link: page_url.to_string(),
            description: format!(
                "Aggregated rainfall, thunderstorm, and special forecasts from PAGASA {upper}"
            ),
        }
    }
}

/// Serializes a feed as RSS 2.0.
///
/// Each item carries `title`, optional `link`, `description` (the advisory
/// body), `category`, `pubDate` and a non-permalink `guid` holding the
/// identity key. `lastBuildDate` is the feed's `last_updated`.
pub fn write_feed(doc: &FeedDocument, channel: &ChannelInfo) -> Result<Vec<u8>, RssError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    text_element(&mut writer, "title", &channel.title)?;
    text_element(&mut writer, "link", &channel.link)?;
    text_element(&mut writer, "description", &channel.description)?;
    if let Some(updated) = doc.last_updated {
        text_element(&mut writer, "lastBuildDate", &updated.to_rfc2822())?;
    }

    for item in &doc.items {
        write_item(&mut writer, item)?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_item(writer: &mut Writer<Vec<u8>>, item: &AdvisoryRecord) -> Result<(), RssError> {
    writer.write_event(Event::Start(BytesStart::new("item")))?;
    text_element(writer, "title", &item.title)?;
    if let Some(link) = &item.link {
        text_element(writer, "link", link)?;
    }
    text_element(writer, "description", &item.body)?;
    text_element(writer, "category", item.category.label())?;
    text_element(writer, "pubDate", &item.published_at.to_rfc2822())?;
    writer
        .create_element("guid")
        .with_attribute(("isPermaLink", "false"))
        .write_text_content(BytesText::new(&item.identity_key))?;
    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), RssError> {
    writer
        .create_element(name)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

/// Reads a feed previously written by [`write_feed`].
///
/// Items missing a title, a recognizable category or a publish date are
/// skipped with a warning rather than failing the whole document. Loaded items
/// count as explicitly dated.
///
/// # Errors
///
/// [`RssError::Parse`] when the bytes are not a feed `feed-rs` can read.
pub fn read_feed(bytes: &[u8], region_slug: &str) -> Result<FeedDocument, RssError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| RssError::Parse(e.to_string()))?;

    let mut items: Vec<AdvisoryRecord> = Vec::with_capacity(feed.entries.len());
    let mut skipped = 0usize;

    for entry in feed.entries {
        let title = entry.title.map(|t| t.content);
        let category = entry
            .categories
            .iter()
            .find_map(|c| Category::from_label(&c.term));
        let published = entry.published.or(entry.updated);

        let (Some(title), Some(category), Some(published_at)) = (title, category, published)
        else {
            skipped += 1;
            continue;
        };

        let body = entry
            .summary
            .map(|s| s.content)
            .unwrap_or_else(|| title.clone());
        let link = entry.links.first().map(|l| l.href.clone());

        let identity_key = if entry.id.trim().is_empty() {
            crate::advisory::identity_key(category, &title, &body)
        } else {
            entry.id.trim().to_string()
        };

        if items.iter().any(|i| i.identity_key == identity_key) {
            skipped += 1;
            continue;
        }

        items.push(AdvisoryRecord {
            region_slug: region_slug.to_string(),
            category,
            title,
            body,
            published_at,
            timestamp_source: TimestampSource::Section,
            link,
            identity_key,
        });
    }

    if skipped > 0 {
        tracing::warn!(
            region = %region_slug,
            skipped = skipped,
            "Persisted feed items unreadable or duplicated, dropping them"
        );
    }

    Ok(FeedDocument {
        region_slug: region_slug.to_string(),
        items,
        last_updated: feed.updated,
    })
}
