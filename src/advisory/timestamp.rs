//! Recognition of publish times in advisory text.
//!
//! The agency writes times in a handful of free-text forms ("Issued at:
//! 5:00 PM, 16 October 2026", "October 16, 2026 11:00 AM", "12:00 NN") and
//! occasionally exposes machine-readable `datetime` attributes. Everything
//! here returns `None` rather than erroring: an unparseable time simply means
//! the extractor falls back to the next source.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const MONTH: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";

/// Maximum distance in bytes between a date and a time for them to be read as
/// one timestamp.
const MAX_TIME_DISTANCE: usize = 40;

/// How far past an "Issued" marker the date may start.
const ISSUED_WINDOW: usize = 80;

static DAY_MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b(\d{{1,2}})\s+{MONTH}\.?,?\s+(\d{{4}})\b"))
        .expect("valid day-month-year pattern")
});

static MONTH_DAY_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)\b{MONTH}\.?\s+(\d{{1,2}}),?\s+(\d{{4}})\b"))
        .expect("valid month-day-year pattern")
});

static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2})(?::(\d{2}))?)?")
        .expect("valid ISO date pattern")
});

static CLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2}):(\d{2})(?::(\d{2}))?(?:\s*(?:([ap])\.?\s?m\b\.?|(nn|noon|mn)\b))?")
        .expect("valid clock pattern")
});

static ISSUED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bissued\b\s*(?:at|on)?\s*:?").expect("valid issued pattern"));

/// A date found in text, with its byte span and an optional time that was
/// written as part of the same token (ISO form).
struct DateMatch {
    start: usize,
    end: usize,
    date: NaiveDate,
    time: Option<NaiveTime>,
}

/// Parses a machine-readable `datetime` attribute value.
///
/// Accepts RFC 3339 (with zone), `YYYY-MM-DDTHH:MM[:SS]`, `YYYY-MM-DD HH:MM[:SS]`
/// and bare `YYYY-MM-DD`. Values without a zone are read in `offset`.
pub fn parse_datetime_attr(value: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return localize(naive, offset);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| localize(d.and_time(NaiveTime::MIN), offset))
}

/// Finds the time following an "Issued at/on" marker.
pub fn find_issued(text: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    for marker in ISSUED.find_iter(text) {
        let window_end = floor_char_boundary(text, marker.end() + ISSUED_WINDOW);
        let tail = &text[marker.end()..window_end];
        if let Some(dt) = find_datetime(tail, offset) {
            return Some(dt);
        }
    }
    None
}

/// Finds the first date in `text`, combined with a clock time written close
/// to it. A date with no nearby time is taken as local midnight.
///
/// A clock time without any date is not enough to place an advisory and
/// yields `None`.
pub fn find_datetime(text: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let date = first_date(text)?;
    let time = date
        .time
        .or_else(|| nearest_clock(text, date.start, date.end))
        .unwrap_or(NaiveTime::MIN);
    localize(date.date.and_time(time), offset)
}

fn localize(naive: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn first_date(text: &str) -> Option<DateMatch> {
    let dmy = DAY_MONTH_YEAR.captures_iter(text).find_map(|c| {
        let date = ymd(&c[3], month_number(&c[2])?, &c[1])?;
        Some(date_match(&c, date, None))
    });
    let mdy = MONTH_DAY_YEAR.captures_iter(text).find_map(|c| {
        let date = ymd(&c[3], month_number(&c[1])?, &c[2])?;
        Some(date_match(&c, date, None))
    });
    let iso = ISO_DATE.captures_iter(text).find_map(|c| {
        let month: u32 = c[2].parse().ok()?;
        let date = ymd(&c[1], month, &c[3])?;
        let time = match (c.get(4), c.get(5)) {
            (Some(h), Some(m)) => {
                let sec = c.get(6).map_or("0", |s| s.as_str());
                NaiveTime::from_hms_opt(
                    h.as_str().parse().ok()?,
                    m.as_str().parse().ok()?,
                    sec.parse().ok()?,
                )
            }
            _ => None,
        };
        Some(date_match(&c, date, time))
    });

    [dmy, mdy, iso]
        .into_iter()
        .flatten()
        .min_by_key(|m| m.start)
}

fn date_match(c: &Captures<'_>, date: NaiveDate, time: Option<NaiveTime>) -> DateMatch {
    // Group 0 always participates in a match
    let whole = c.get(0).map_or(0..0, |m| m.range());
    DateMatch {
        start: whole.start,
        end: whole.end,
        date,
        time,
    }
}

fn ymd(year: &str, month: u32, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day.parse().ok()?)
}

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let n = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(n)
}

fn nearest_clock(text: &str, date_start: usize, date_end: usize) -> Option<NaiveTime> {
    CLOCK
        .captures_iter(text)
        .filter_map(|c| {
            let span = c.get(0)?.range();
            let distance = if span.end <= date_start {
                date_start - span.end
            } else if span.start >= date_end {
                span.start - date_end
            } else {
                // Overlaps the date itself (e.g. digits of an ISO date)
                return None;
            };
            (distance <= MAX_TIME_DISTANCE).then_some((distance, c))
        })
        .min_by_key(|(distance, _)| *distance)
        .and_then(|(_, c)| clock_time(&c))
}

fn clock_time(c: &Captures<'_>) -> Option<NaiveTime> {
    let mut hour: u32 = c[1].parse().ok()?;
    let minute: u32 = c[2].parse().ok()?;
    let second: u32 = c.get(3).map_or(Some(0), |s| s.as_str().parse().ok())?;

    if let Some(meridiem) = c.get(4) {
        if !(1..=12).contains(&hour) {
            return None;
        }
        let pm = meridiem.as_str().eq_ignore_ascii_case("p");
        hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
    } else if let Some(marker) = c.get(5) {
        // "12:00 NN" is noon, "12:00 MN" is midnight
        hour = if marker.as_str().eq_ignore_ascii_case("mn") {
            0
        } else {
            12
        };
    }

    NaiveTime::from_hms_opt(hour, minute, second)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
