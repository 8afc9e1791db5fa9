//! Canonical frontmatter for a synced document.
//!
//! [`MetadataReconciler`] merges what an author already wrote in the
//! document's frontmatter with what Drive reports about it. Timestamps go
//! through an ordered rule table; the first rule that applies and resolves
//! wins:
//!
//! | # | applies when the existing value is... | resolution |
//! |---|----------------------------------------|------------|
//! | 1 | a full timestamp                       | naive: stamp local zone; zoned: convert to local zone |
//! | 2 | a bare calendar date                   | midnight in the local zone |
//! | 3 | any other non-empty string             | permissive parse, naive stamped local / zoned converted |
//! | 4 | anything (remote reference present)    | permissive parse of the Drive timestamp, naive taken as UTC |
//!
//! When nothing resolves, `date` becomes "now" and `lastmod` becomes the
//! resolved `date`.

use chrono::{
    DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone,
    Utc,
};
use chrono_tz::Tz;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::contract::RemoteItem;

pub const KEY_TITLE: &str = "title";
pub const KEY_DATE: &str = "date";
pub const KEY_LASTMOD: &str = "lastmod";
pub const KEY_DRAFT: &str = "draft";
pub const KEY_SOURCE_ID: &str = "source_id";
pub const KEY_SOURCE_MODIFIED_AT: &str = "source_modified_at";
pub const KEY_CONVERSION_ERROR: &str = "conversion_error";

/// Rendered timestamp format: no fractional seconds, numeric offset.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Formats that carry an explicit offset.
const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
];

/// Formats without an offset.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Extra shapes accepted by the permissive parser only.
const LOOSE_DATETIME_FORMATS: &[&str] = &[
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%B %d, %Y %H:%M",
    "%b %d, %Y %H:%M",
];

const LOOSE_DATE_FORMATS: &[&str] = &[
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%Y%m%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
];

/// A timestamp with or without a known offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parsed {
    Zoned(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

/// Shape of an existing frontmatter timestamp field.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Existing<'a> {
    Timestamp(Parsed),
    Date(NaiveDate),
    Text(&'a str),
    Missing,
}

impl<'a> Existing<'a> {
    fn classify(value: Option<&'a Value>) -> Self {
        let Some(text) = value.and_then(Value::as_str).map(str::trim) else {
            return Existing::Missing;
        };
        if text.is_empty() {
            return Existing::Missing;
        }
        if let Some(parsed) = parse_strict(text) {
            return Existing::Timestamp(parsed);
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Existing::Date(date);
        }
        Existing::Text(text)
    }
}

/// Parse ISO-8601/RFC-3339 shapes, the rendered format, and naive ISO forms.
pub fn parse_strict(text: &str) -> Option<Parsed> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(Parsed::Zoned(dt));
    }
    for format in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(Parsed::Zoned(dt));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Parsed::Naive(dt));
        }
    }
    None
}

/// Best-effort parse of free-form date/time text. Date-only results are naive
/// midnight.
pub fn parse_permissive(text: &str) -> Option<Parsed> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(parsed) = parse_strict(text) {
        return Some(parsed);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(Parsed::Zoned(dt));
    }
    for format in LOOSE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Parsed::Naive(dt));
        }
    }
    std::iter::once("%Y-%m-%d")
        .chain(LOOSE_DATE_FORMATS.iter().copied())
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .map(|date| Parsed::Naive(date.and_time(NaiveTime::MIN)))
}

/// Permissive parse into an instant; naive values are taken as UTC.
pub fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    parse_permissive(text).map(|parsed| match parsed {
        Parsed::Zoned(dt) => dt.with_timezone(&Utc),
        Parsed::Naive(naive) => Utc.from_utc_datetime(&naive),
    })
}

/// Attach `tz` to a wall-clock time. Times skipped by a DST transition are
/// moved forward by the usual one-hour gap.
fn stamp_local(naive: &NaiveDateTime, tz: &Tz) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz
            .from_local_datetime(&(*naive + TimeDelta::hours(1)))
            .earliest(),
    }
}

fn to_local(parsed: Parsed, tz: &Tz) -> Option<DateTime<Tz>> {
    match parsed {
        Parsed::Zoned(dt) => Some(dt.with_timezone(tz)),
        Parsed::Naive(naive) => stamp_local(&naive, tz),
    }
}

/// Inputs of one timestamp field's resolution.
struct FieldInput<'a> {
    field: &'static str,
    existing: Existing<'a>,
    remote: Option<&'a str>,
}

struct Rule {
    name: &'static str,
    applies: fn(&FieldInput<'_>) -> bool,
    resolve: fn(&FieldInput<'_>, &Tz) -> Option<DateTime<Tz>>,
}

fn is_timestamp(input: &FieldInput<'_>) -> bool {
    matches!(input.existing, Existing::Timestamp(_))
}

fn from_timestamp(input: &FieldInput<'_>, tz: &Tz) -> Option<DateTime<Tz>> {
    match input.existing {
        Existing::Timestamp(parsed) => to_local(parsed, tz),
        _ => None,
    }
}

fn is_date(input: &FieldInput<'_>) -> bool {
    matches!(input.existing, Existing::Date(_))
}

fn from_date(input: &FieldInput<'_>, tz: &Tz) -> Option<DateTime<Tz>> {
    match input.existing {
        Existing::Date(date) => stamp_local(&date.and_time(NaiveTime::MIN), tz),
        _ => None,
    }
}

fn is_text(input: &FieldInput<'_>) -> bool {
    matches!(input.existing, Existing::Text(_))
}

fn from_text(input: &FieldInput<'_>, tz: &Tz) -> Option<DateTime<Tz>> {
    let Existing::Text(text) = input.existing else {
        return None;
    };
    let resolved = parse_permissive(text).and_then(|parsed| to_local(parsed, tz));
    if resolved.is_none() {
        warn!(
            field = input.field,
            value = text,
            "Could not parse existing value, falling back to Drive timestamp"
        );
    }
    resolved
}

fn has_remote(input: &FieldInput<'_>) -> bool {
    input.remote.is_some()
}

fn from_remote(input: &FieldInput<'_>, tz: &Tz) -> Option<DateTime<Tz>> {
    let remote = input.remote?;
    let resolved = parse_instant(remote).map(|dt| dt.with_timezone(tz));
    if resolved.is_none() {
        warn!(field = input.field, value = remote, "Could not parse Drive timestamp");
    }
    resolved
}

const RULES: &[Rule] = &[
    Rule {
        name: "existing timestamp",
        applies: is_timestamp,
        resolve: from_timestamp,
    },
    Rule {
        name: "existing calendar date",
        applies: is_date,
        resolve: from_date,
    },
    Rule {
        name: "existing free-form text",
        applies: is_text,
        resolve: from_text,
    },
    Rule {
        name: "remote reference",
        applies: has_remote,
        resolve: from_remote,
    },
];

fn resolve(input: &FieldInput<'_>, tz: &Tz) -> Option<DateTime<Tz>> {
    RULES
        .iter()
        .filter(|rule| (rule.applies)(input))
        .find_map(|rule| {
            let resolved = (rule.resolve)(input, tz);
            if resolved.is_some() {
                debug!(field = input.field, rule = rule.name, "Resolved timestamp");
            }
            resolved
        })
}

/// Render a timestamp in the persisted format.
pub fn format_timestamp(dt: &DateTime<Tz>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Draft flag with YAML truthiness. Absent or null means public.
pub fn is_draft(metadata: &Mapping) -> bool {
    match metadata.get(KEY_DRAFT) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => !matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "no" | "off" | "0"
        ),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::Sequence(seq)) => !seq.is_empty(),
        Some(Value::Mapping(map)) => !map.is_empty(),
        Some(Value::Tagged(_)) => true,
    }
}

/// Drop keys whose value is null.
pub fn drop_nulls(metadata: Mapping) -> Mapping {
    metadata.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

/// Decides canonical metadata for one document.
#[derive(Debug, Clone, Copy)]
pub struct MetadataReconciler {
    tz: Tz,
}

impl MetadataReconciler {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Resolve `date` from the existing value or Drive's `createdTime`.
    pub fn resolve_date(
        &self,
        existing: Option<&Value>,
        created_at: Option<&str>,
        now: DateTime<Utc>,
    ) -> DateTime<Tz> {
        let input = FieldInput {
            field: KEY_DATE,
            existing: Existing::classify(existing),
            remote: created_at,
        };
        resolve(&input, &self.tz).unwrap_or_else(|| {
            warn!("Setting date to current time (could not determine from frontmatter or Drive)");
            now.with_timezone(&self.tz)
        })
    }

    /// Resolve `lastmod` from the existing value, Drive's `modifiedTime`, or `date`.
    pub fn resolve_lastmod(
        &self,
        existing: Option<&Value>,
        modified_at: Option<&str>,
        date: &DateTime<Tz>,
    ) -> DateTime<Tz> {
        let input = FieldInput {
            field: KEY_LASTMOD,
            existing: Existing::classify(existing),
            remote: modified_at,
        };
        resolve(&input, &self.tz).unwrap_or_else(|| {
            warn!("Setting lastmod to resolved date (could not determine from frontmatter or Drive)");
            *date
        })
    }

    /// Rewrite `metadata` in place for `item`, using the current time as the
    /// last-resort `date`.
    pub fn reconcile(&self, metadata: &mut Mapping, item: &RemoteItem) {
        self.reconcile_at(metadata, item, Utc::now());
    }

    /// [`reconcile`](Self::reconcile) with an explicit "now".
    pub fn reconcile_at(&self, metadata: &mut Mapping, item: &RemoteItem, now: DateTime<Utc>) {
        metadata.remove(KEY_CONVERSION_ERROR);

        let date = self.resolve_date(metadata.get(KEY_DATE), item.created_at.as_deref(), now);
        let lastmod =
            self.resolve_lastmod(metadata.get(KEY_LASTMOD), item.modified_at.as_deref(), &date);
        metadata.insert(KEY_DATE.into(), format_timestamp(&date).into());
        metadata.insert(KEY_LASTMOD.into(), format_timestamp(&lastmod).into());

        let has_title = match metadata.get(KEY_TITLE) {
            None | Some(Value::Null) => false,
            Some(Value::String(title)) => !title.is_empty(),
            Some(_) => true,
        };
        if !has_title {
            metadata.insert(KEY_TITLE.into(), item.name.clone().into());
        }
        if !metadata.contains_key(KEY_DRAFT) {
            metadata.insert(KEY_DRAFT.into(), false.into());
        }
        metadata.insert(KEY_SOURCE_ID.into(), item.id.clone().into());
        metadata.insert(
            KEY_SOURCE_MODIFIED_AT.into(),
            item.modified_at
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
    }
}
