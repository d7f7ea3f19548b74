use chrono::{DateTime, FixedOffset, Offset, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde::Deserialize;
use std::borrow::Cow;
use thiserror::Error;
use url::Url;

use super::timestamp::{find_datetime, find_issued, parse_datetime_attr};
use super::types::{AdvisoryRecord, Category, TimestampSource};
use crate::util::{collapse_whitespace, normalize_lines, strip_control_chars};

/// Philippine Standard Time, the zone the agency writes its times in.
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Errors that can occur while extracting advisories from a page.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The input is not a markup document at all. The region should be
    /// skipped for this run without touching its published feed.
    #[error("Malformed document: {0}")]
    MalformedDocument(String),
}

/// How advisory titles are formed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TitleStyle {
    /// The advisory's own heading or first line.
    #[default]
    Page,
    /// `Rainfall Advisory No. 3 #VISPRSD` and `Special Forecast: <link text>`,
    /// with the whole entry text as the body.
    Numbered,
}

/// Selectors used to locate one category's section, tried in order.
struct Anchors {
    /// Element ids used by the agency's page.
    ids: Selector,
    /// Class and data-attribute markers.
    markers: Selector,
    /// Lowercase text a heading must contain for the heading fallback.
    keyword: &'static str,
}

fn anchors(ids: &str, markers: &str, keyword: &'static str) -> Anchors {
    Anchors {
        ids: Selector::parse(ids).expect("valid id selector"),
        markers: Selector::parse(markers).expect("valid marker selector"),
        keyword,
    }
}

static RAINFALL: Lazy<Anchors> = Lazy::new(|| {
    anchors(
        "#rainfalls, #rainfall",
        ".rainfalls, .rainfall-advisories, [data-advisory=\"rainfall\"]",
        "rainfall",
    )
});

static THUNDERSTORM: Lazy<Anchors> = Lazy::new(|| {
    anchors(
        "#thunderstorms, #thunderstorm",
        ".thunderstorms, .thunderstorm-advisories, [data-advisory=\"thunderstorm\"]",
        "thunderstorm",
    )
});

static SPECIAL_FORECAST: Lazy<Anchors> = Lazy::new(|| {
    anchors(
        "#special-forecasts, #special-forecast",
        ".special-forecasts, [data-advisory=\"special-forecast\"]",
        "special forecast",
    )
});

static HEADINGS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("valid heading selector"));

// Headings inside a special-forecast link. Inline emphasis is not a title.
static TITLE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("h1, h2, h3, h4, h5, h6, .title").expect("valid title selector")
});

static ADVISORY_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bNo\.\s*(\d+)").expect("valid advisory number pattern"));

static TIME_ELEMENT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time[datetime]").expect("valid time selector"));

static ISSUED_ELEMENT: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("[id*=\"issued\"], [class*=\"issued\"]").expect("valid issued selector")
});

static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("a").expect("valid link selector"));

static SPANS: Lazy<Selector> = Lazy::new(|| Selector::parse("span").expect("valid span selector"));

fn anchors_for(category: Category) -> &'static Anchors {
    match category {
        Category::Rainfall => &*RAINFALL,
        Category::Thunderstorm => &*THUNDERSTORM,
        Category::SpecialForecast => &*SPECIAL_FORECAST,
    }
}

/// Turns a regional advisory page into [`AdvisoryRecord`]s.
///
/// Sections are located by stable markup anchors (element ids, then class or
/// data markers, then headings that mention the category), never by exact
/// wording or fixed positions. Sections that cannot be classified into one of
/// the configured categories are skipped silently.
#[derive(Debug, Clone)]
pub struct Extractor {
    categories: Vec<Category>,
    offset: FixedOffset,
    page_url: Option<Url>,
    title_style: TitleStyle,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(Category::ALL)
    }
}

impl Extractor {
    pub fn new(categories: impl IntoIterator<Item = Category>) -> Self {
        let mut unique: Vec<Category> = Vec::new();
        for category in categories {
            if !unique.contains(&category) {
                unique.push(category);
            }
        }
        Self {
            categories: unique,
            offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
            page_url: None,
            title_style: TitleStyle::default(),
        }
    }

    /// Zone used for times the page writes without an offset.
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// URL the page was fetched from, used to resolve relative links.
    pub fn with_page_url(mut self, url: Url) -> Self {
        self.page_url = Some(url);
        self
    }

    pub fn with_title_style(mut self, style: TitleStyle) -> Self {
        self.title_style = style;
        self
    }

    /// Extracts advisories, using the current time as the last-resort
    /// timestamp.
    pub fn extract(
        &self,
        raw_html: &[u8],
        region_slug: &str,
    ) -> Result<Vec<AdvisoryRecord>, ExtractError> {
        self.extract_at(raw_html, region_slug, Utc::now())
    }

    /// Extracts advisories in page order.
    ///
    /// `now` is attributed (as an approximate timestamp) to advisories for
    /// which neither the advisory nor the page states a time. Given the same
    /// bytes and the same `now`, the output is identical.
    ///
    /// # Errors
    ///
    /// [`ExtractError::MalformedDocument`] when the input is blank, binary, or
    /// contains no markup. A valid page with no recognizable section yields
    /// `Ok` with no records.
    pub fn extract_at(
        &self,
        raw_html: &[u8],
        region_slug: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<AdvisoryRecord>, ExtractError> {
        let text = decode(raw_html, region_slug)?;
        let document = Html::parse_document(&text);
        let located = locate_sections(&document);
        // Advisory sections of every category, configured or not
        let advisory_areas: Vec<ElementRef<'_>> = located
            .iter()
            .flat_map(|(_, found)| found.iter().copied())
            .collect();
        let issued = self.document_issued_at(&document, &advisory_areas);

        let mut sections: Vec<(usize, Category, ElementRef<'_>)> = Vec::new();
        for (category, found) in &located {
            if !self.categories.contains(category) {
                continue;
            }
            for &section in found {
                let position = document_position(&document, section);
                sections.push((position, *category, section));
            }
        }
        sections.sort_by_key(|(position, _, _)| *position);

        let mut records = Vec::new();
        for (_, category, section) in sections {
            let before = records.len();
            match category {
                Category::SpecialForecast => {
                    self.special_forecasts(section, region_slug, issued, now, &mut records)
                }
                Category::Rainfall | Category::Thunderstorm => {
                    self.advisories(section, category, region_slug, issued, now, &mut records)
                }
            }
            tracing::debug!(
                region = %region_slug,
                category = %category,
                count = records.len() - before,
                "Extracted advisory section"
            );
        }

        if records.is_empty() {
            tracing::debug!(region = %region_slug, "No recognizable advisory sections");
        }
        Ok(records)
    }

    /// Rainfall and thunderstorm sections: one advisory per child block.
    fn advisories(
        &self,
        section: ElementRef<'_>,
        category: Category,
        region_slug: &str,
        issued: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        out: &mut Vec<AdvisoryRecord>,
    ) {
        let mut entries = entry_blocks(section);
        if entries.is_empty() && has_text(section) {
            entries.push(section);
        }

        for entry in entries {
            let lines = render_lines(entry, &[]);
            let Some((title, body)) = (match self.title_style {
                TitleStyle::Page => split_title(&lines),
                TitleStyle::Numbered => numbered_title(category, region_slug, &lines),
            }) else {
                continue;
            };
            let (published_at, source) = self.timestamp(entry, &lines, issued, now);
            out.push(AdvisoryRecord::new(
                region_slug,
                category,
                title,
                body,
                published_at,
                source,
            ));
        }
    }

    /// Special forecast sections: one advisory per link. The link's own text
    /// is the title and its `span`s carry the description.
    fn special_forecasts(
        &self,
        section: ElementRef<'_>,
        region_slug: &str,
        issued: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        out: &mut Vec<AdvisoryRecord>,
    ) {
        for link in section.select(&LINKS) {
            let heading = link
                .select(&TITLE)
                .map(clean_text)
                .find(|t| !t.is_empty());
            let title = heading.unwrap_or_else(|| collapse_whitespace(&render_lines(link, &["span"])));
            let description = link
                .select(&SPANS)
                .map(clean_text)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ");

            let label = Category::SpecialForecast.label();
            let (title, body) = match (title.is_empty(), description.is_empty()) {
                (true, true) => continue,
                (true, false) => (label.to_string(), description),
                (false, true) => (self.link_title(&title), title),
                (false, false) => (self.link_title(&title), description),
            };

            let lines = render_lines(link, &[]);
            let (published_at, source) = self.timestamp(link, &lines, issued, now);
            let href = link.value().attr("href").map(str::trim).filter(|h| !h.is_empty());
            let resolved = href.and_then(|h| self.resolve_link(h));

            out.push(
                AdvisoryRecord::new(
                    region_slug,
                    Category::SpecialForecast,
                    title,
                    body,
                    published_at,
                    source,
                )
                .with_link(resolved),
            );
        }
    }

    fn link_title(&self, text: &str) -> String {
        match self.title_style {
            TitleStyle::Page => text.to_string(),
            TitleStyle::Numbered => format!("{}: {text}", Category::SpecialForecast.label()),
        }
    }

    /// Timestamp for one advisory: its own markup first, then the page's
    /// issue time, then `now`.
    fn timestamp(
        &self,
        entry: ElementRef<'_>,
        lines: &str,
        issued: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> (DateTime<Utc>, TimestampSource) {
        let attr = entry
            .select(&TIME_ELEMENT)
            .filter_map(|t| t.value().attr("datetime"))
            .find_map(|v| parse_datetime_attr(v, self.offset));
        let own = attr
            .or_else(|| find_issued(lines, self.offset))
            .or_else(|| find_datetime(lines, self.offset));

        match (own, issued) {
            (Some(ts), _) => (ts, TimestampSource::Section),
            (None, Some(ts)) => (ts, TimestampSource::Document),
            (None, None) => (now, TimestampSource::Extracted),
        }
    }

    /// Page-level "issued at" time, from an element marked as such or from an
    /// "Issued at ..." phrase. Text inside advisory sections belongs to the
    /// individual advisories and is never read as the page's time.
    fn document_issued_at(
        &self,
        document: &Html,
        advisory_areas: &[ElementRef<'_>],
    ) -> Option<DateTime<Utc>> {
        let marked = document
            .select(&ISSUED_ELEMENT)
            .filter(|el| {
                !within(*el, advisory_areas)
                    && !advisory_areas.iter().any(|area| within(*area, &[*el]))
            })
            .find_map(|el| {
                let attr = el
                    .value()
                    .attr("datetime")
                    .and_then(|v| parse_datetime_attr(v, self.offset));
                attr.or_else(|| {
                    el.select(&TIME_ELEMENT)
                        .filter_map(|t| t.value().attr("datetime"))
                        .find_map(|v| parse_datetime_attr(v, self.offset))
                })
                .or_else(|| find_datetime(&render_lines(el, &[]), self.offset))
            });
        marked.or_else(|| {
            let mut page = String::new();
            render_into(&mut page, document.root_element(), &[], advisory_areas);
            find_issued(&normalize_lines(&strip_control_chars(&page)), self.offset)
        })
    }

    fn resolve_link(&self, href: &str) -> Option<String> {
        let url = match &self.page_url {
            Some(base) => base.join(href).ok()?,
            None => Url::parse(href).ok()?,
        };
        match url.scheme() {
            "http" | "https" => Some(url.to_string()),
            _ => None,
        }
    }
}

/// Extracts advisories for every known category, using the current time as
/// the last-resort timestamp.
pub fn extract(raw_html: &[u8], region_slug: &str) -> Result<Vec<AdvisoryRecord>, ExtractError> {
    Extractor::default().extract(raw_html, region_slug)
}

fn decode<'a>(raw_html: &'a [u8], region_slug: &str) -> Result<Cow<'a, str>, ExtractError> {
    if raw_html.contains(&0) {
        return Err(ExtractError::MalformedDocument(
            "contains NUL bytes (binary content)".to_string(),
        ));
    }
    let text = String::from_utf8_lossy(raw_html);
    if matches!(text, Cow::Owned(_)) {
        tracing::debug!(region = %region_slug, "Page is not valid UTF-8, decoding lossily");
    }
    let body = text.trim_start_matches('\u{feff}');
    if body.trim().is_empty() {
        return Err(ExtractError::MalformedDocument("document is empty".to_string()));
    }
    let has_tag = body
        .as_bytes()
        .windows(2)
        .any(|w| w[0] == b'<' && (w[1].is_ascii_alphabetic() || w[1] == b'!' || w[1] == b'/'));
    if !has_tag {
        return Err(ExtractError::MalformedDocument("no markup found".to_string()));
    }
    Ok(match text {
        Cow::Borrowed(s) => Cow::Borrowed(s.trim_start_matches('\u{feff}')),
        Cow::Owned(s) => Cow::Owned(s.trim_start_matches('\u{feff}').to_string()),
    })
}

/// Sections of every category, in [`Category::ALL`] order.
///
/// Per category the first anchor kind with any match wins: element ids, then
/// class or data markers, then the block right after a heading that names the
/// category. The heading fallback never reaches into another category's
/// section, so a heading such as "Rainfall and Thunderstorm Advisory" inside
/// the rainfall block stays a rainfall advisory.
fn locate_sections(document: &Html) -> Vec<(Category, Vec<ElementRef<'_>>)> {
    let anchored: Vec<(Category, Vec<ElementRef<'_>>)> = Category::ALL
        .iter()
        .map(|&category| (category, anchored_sections(document, category)))
        .collect();

    // (heading, block) pairs for categories without anchors
    let mut fallback: Vec<(Category, Vec<(ElementRef<'_>, ElementRef<'_>)>)> = Vec::new();
    for (category, found) in &anchored {
        if !found.is_empty() {
            continue;
        }
        let claimed: Vec<ElementRef<'_>> = anchored
            .iter()
            .filter(|(other, _)| other != category)
            .flat_map(|(_, sections)| sections.iter().copied())
            .collect();
        let candidates = heading_sections(document, *category)
            .into_iter()
            .filter(|(heading, block)| !within(*heading, &claimed) && !within(*block, &claimed))
            .collect();
        fallback.push((*category, candidates));
    }

    anchored
        .into_iter()
        .map(|(category, found)| {
            if !found.is_empty() {
                return (category, found);
            }
            let mine: &[(ElementRef<'_>, ElementRef<'_>)] = fallback
                .iter()
                .find(|(c, _)| *c == category)
                .map(|(_, pairs)| pairs.as_slice())
                .unwrap_or_default();
            let theirs: Vec<ElementRef<'_>> = fallback
                .iter()
                .filter(|(c, _)| *c != category)
                .flat_map(|(_, pairs)| pairs.iter().map(|(_, block)| *block))
                .collect();
            let blocks: Vec<ElementRef<'_>> = mine.iter().map(|(_, block)| *block).collect();

            let mut sections: Vec<ElementRef<'_>> = Vec::new();
            for (heading, block) in mine {
                let nested = blocks
                    .iter()
                    .any(|outer| outer.id() != block.id() && within(*block, &[*outer]));
                let duplicate = sections.iter().any(|s| s.id() == block.id());
                if !within(*heading, &theirs) && !nested && !duplicate {
                    sections.push(*block);
                }
            }
            if !sections.is_empty() {
                tracing::debug!(
                    category = %category,
                    "Section anchors missing, using heading fallback"
                );
            }
            (category, sections)
        })
        .collect()
}

/// Sections found by element id, else by class or data marker.
fn anchored_sections(document: &Html, category: Category) -> Vec<ElementRef<'_>> {
    let anchors = anchors_for(category);

    let by_id: Vec<_> = document.select(&anchors.ids).collect();
    if !by_id.is_empty() {
        return by_id;
    }
    document.select(&anchors.markers).collect()
}

/// Headings naming the category, each paired with the block right after it.
fn heading_sections(document: &Html, category: Category) -> Vec<(ElementRef<'_>, ElementRef<'_>)> {
    let keyword = anchors_for(category).keyword;
    document
        .select(&HEADINGS)
        .filter(|h| clean_text(*h).to_lowercase().contains(keyword))
        .filter_map(|h| Some((h, h.next_siblings().find_map(ElementRef::wrap)?)))
        .collect()
}

/// Whether `element` is one of `areas` or lies inside one.
fn within(element: ElementRef<'_>, areas: &[ElementRef<'_>]) -> bool {
    areas.iter().any(|area| {
        area.id() == element.id() || element.ancestors().any(|a| a.id() == area.id())
    })
}

fn document_position(document: &Html, element: ElementRef<'_>) -> usize {
    document
        .root_element()
        .descendants()
        .position(|n| n.id() == element.id())
        .unwrap_or(usize::MAX)
}

/// Direct child blocks of a section that hold text. List children are
/// expanded into their items.
fn entry_blocks(section: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut entries = Vec::new();
    for child in section.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "div" | "article" | "section" | "p" | "li" => {
                if has_text(child) {
                    entries.push(child);
                }
            }
            "ul" | "ol" => entries.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|li| li.value().name() == "li" && has_text(*li)),
            ),
            _ => {}
        }
    }
    entries
}

/// Title from the entry's first rendered line, which is its leading heading
/// when it has one. The body is the remaining text, or the title when nothing
/// remains.
fn split_title(lines: &str) -> Option<(String, String)> {
    let mut all = lines.lines();
    let title = all.next()?.to_string();
    let rest: Vec<&str> = all.collect();
    let body = if rest.is_empty() {
        title.clone()
    } else {
        rest.join("\n")
    };
    Some((title, body))
}

/// Legacy numbered title: `<label> No. <n> #<SLUG>`, or the bare label when
/// the entry carries no number. The body is the entry's whole text.
fn numbered_title(category: Category, region_slug: &str, lines: &str) -> Option<(String, String)> {
    if lines.is_empty() {
        return None;
    }
    let title = match ADVISORY_NUMBER.captures(lines) {
        Some(c) => format!("{} No. {} #{}", category.label(), &c[1], region_slug.to_uppercase()),
        None => category.label().to_string(),
    };
    Some((title, lines.to_string()))
}

fn has_text(element: ElementRef<'_>) -> bool {
    element.text().any(|t| !t.trim().is_empty())
}

/// All text under an element on one line, control characters removed.
fn clean_text(element: ElementRef<'_>) -> String {
    let joined = element.text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&strip_control_chars(&joined))
}

/// Renders an element's text with line breaks at block boundaries and
/// `<br>`, skipping scripts and any tag in `skip`. The result is normalized
/// line by line.
fn render_lines(element: ElementRef<'_>, skip: &[&str]) -> String {
    let mut buf = String::new();
    render_into(&mut buf, element, skip, &[]);
    normalize_lines(&strip_control_chars(&buf))
}

/// Appends the text under `element`, leaving out the subtrees in `exclude`.
fn render_into(
    buf: &mut String,
    element: ElementRef<'_>,
    skip: &[&str],
    exclude: &[ElementRef<'_>],
) {
    for child in element.children() {
        if exclude.iter().any(|e| e.id() == child.id()) {
            continue;
        }
        match child.value() {
            // Source newlines are plain whitespace in HTML
            Node::Text(t) => buf.extend(t.chars().map(|c| if c.is_whitespace() { ' ' } else { c })),
            Node::Element(el) => {
                let name = el.name();
                if skip.contains(&name)
                    || matches!(name, "script" | "style" | "noscript" | "template")
                {
                    continue;
                }
                if name == "br" {
                    buf.push('\n');
                    continue;
                }
                let block = is_block(name);
                if block {
                    buf.push('\n');
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    render_into(buf, child_el, skip, exclude);
                }
                if block {
                    buf.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "header"
            | "footer"
            | "main"
            | "aside"
            | "nav"
            | "table"
            | "tr"
            | "td"
            | "th"
            | "ul"
            | "ol"
            | "li"
            | "dl"
            | "dt"
            | "dd"
            | "blockquote"
            | "pre"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
    )
}
