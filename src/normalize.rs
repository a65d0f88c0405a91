// src/normalize.rs
//! Turn the newest entry of a raw status feed into a `FeedUpdate`.
//!
//! Statuspage history bodies look like
//! `<p><small>Oct 16, 12:00 UTC</small><br><strong>Resolved</strong> - text</p><p>...`,
//! one paragraph per status post. Each paragraph becomes one field named
//! `"<status> - <time label>"`. A paragraph that doesn't follow that shape is
//! replaced by a diagnostic field instead of failing the whole update.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::ServiceEntry;
use crate::ingest::types::{RawDocument, RawEntry};
use crate::update::{FeedUpdate, FieldOrder, UpdateField};

/// Section delimiter inserted where a paragraph ends.
pub const SECTION_DELIMITER: &str = "=-=SPLIT=-=";

/// Longest value a single field may carry; longer values are split.
pub const FIELD_VALUE_LIMIT: usize = 1024;

pub const PLACEHOLDER_FIELD_NAME: &str = "Unable to parse this section";
pub const CONTINUED_FIELD_NAME: &str = "(continued)";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed {service} feed: {reason}")]
pub struct MalformedFeedError {
    pub service: String,
    pub reason: String,
}

impl MalformedFeedError {
    fn new(service: &str, reason: impl Into<String>) -> Self {
        Self {
            service: service.to_string(),
            reason: reason.into(),
        }
    }
}

static RE_PARAGRAPH_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</p\s*>").unwrap());
static RE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip markup from a feed body, marking paragraph boundaries with
/// `SECTION_DELIMITER` and turning `<br>` into newlines.
pub fn strip_markup(html: &str) -> String {
    let out = RE_PARAGRAPH_END.replace_all(html, SECTION_DELIMITER);
    let out = RE_BREAK.replace_all(&out, "\n");
    let out = RE_TAGS.replace_all(&out, "");
    let out = html_escape::decode_html_entities(&out)
        .replace('\u{00A0}', " ")
        .replace("\r\n", "\n");
    RE_BLANK_RUNS.replace_all(&out, "\n\n").into_owned()
}

/// Parse one section into a field; `None` when it doesn't follow the grammar.
fn parse_section(section: &str) -> Option<UpdateField> {
    let (head, body) = section.split_once(" - ")?;
    let lines: Vec<&str> = head.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    // First header line is the time label, the last one the status title.
    let (&time_label, rest) = lines.split_first()?;
    let &status = rest.last()?;
    Some(UpdateField::new(
        format!("{status} - {time_label}"),
        body.trim(),
    ))
}

fn placeholder(raw: &str) -> UpdateField {
    UpdateField::new(
        PLACEHOLDER_FIELD_NAME,
        format!("Raw section content:\n```\n{}\n```", raw.trim()),
    )
}

/// Split fields whose value exceeds `FIELD_VALUE_LIMIT`, keeping order.
pub fn split_long_fields(fields: Vec<UpdateField>) -> Vec<UpdateField> {
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let pages = paginate(&field.value, FIELD_VALUE_LIMIT);
        let mut pages = pages.into_iter();
        let first = pages.next().unwrap_or_default();
        out.push(UpdateField::new(field.name, first));
        out.extend(pages.map(|p| UpdateField::new(CONTINUED_FIELD_NAME, p)));
    }
    out
}

/// Break `text` into chunks of at most `limit` chars, preferring line then
/// word boundaries.
pub(crate) fn paginate(text: &str, limit: usize) -> Vec<String> {
    let mut pages = Vec::new();
    let mut rest = text;
    while rest.chars().count() > limit {
        let hard = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..hard];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(hard);
        pages.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    let tail = rest.trim_end();
    if !tail.is_empty() || pages.is_empty() {
        pages.push(tail.to_string());
    }
    pages
}

/// Parse a published time as RFC 3339 (Atom) or RFC 2822 (RSS).
pub fn parse_published(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    DateTime::parse_from_rfc3339(ts)
        .or_else(|_| DateTime::parse_from_rfc2822(ts))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Build the fields of an entry body. Malformed sections become placeholders.
pub fn fields_from_body(service: &str, html: &str) -> Vec<UpdateField> {
    let stripped = strip_markup(html);
    let mut fields = Vec::new();
    for section in stripped.split(SECTION_DELIMITER) {
        if section.trim().is_empty() {
            continue;
        }
        match parse_section(section) {
            Some(f) => fields.push(f),
            None => {
                tracing::warn!(
                    service,
                    section = %section.trim(),
                    "status section did not match the expected layout"
                );
                fields.push(placeholder(section));
            }
        }
    }
    fields
}

/// Normalize the newest entry of `document` for `service`.
pub fn normalize(service: &ServiceEntry, document: &RawDocument) -> Result<FeedUpdate, MalformedFeedError> {
    let entry: &RawEntry = document
        .entries
        .first()
        .ok_or_else(|| MalformedFeedError::new(&service.id, "feed has no entries"))?;

    let body = entry
        .content
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| MalformedFeedError::new(&service.id, "newest entry has no content"))?;

    let published = entry.published.as_deref().ok_or_else(|| {
        MalformedFeedError::new(&service.id, "newest entry has no published time")
    })?;
    let timestamp = parse_published(published).ok_or_else(|| {
        MalformedFeedError::new(&service.id, format!("unparseable published time {published:?}"))
    })?;

    let mut fields = fields_from_body(&service.id, body);
    if fields.is_empty() {
        return Err(MalformedFeedError::new(&service.id, "entry body has no sections"));
    }
    fields = split_long_fields(fields);
    if service.field_order == FieldOrder::OldestFirst {
        fields.reverse();
    }

    let entry_title = entry.title.as_deref().map(str::trim).unwrap_or("Untitled incident");
    let link = entry.link.as_deref().unwrap_or(&service.url);

    Ok(FeedUpdate {
        service_id: service.id.clone(),
        title: format!("{entry_title} - {} Status Update", service.friendly_name),
        description: format!("Incident page: {link}"),
        timestamp,
        fields,
        order: service.field_order,
        color: service.color,
        friendly_name: service.friendly_name.clone(),
    })
}
