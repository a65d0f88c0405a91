// src/ingest/feed_xml.rs
//! Decode Atom (`feed/entry`) and RSS 2.0 (`channel/item`) documents into a
//! `RawDocument`. Entries keep document order, which for status history feeds
//! is newest first.

use quick_xml::de::from_str;
use serde::Deserialize;

use crate::ingest::types::{RawDocument, RawEntry};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    content: Option<AtomText>,
    summary: Option<AtomText>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Parse a feed body. RSS is tried first: an RSS document also decodes as an
/// Atom feed with zero entries.
pub fn parse_document(xml: &str) -> Result<RawDocument, quick_xml::DeError> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    if let Ok(rss) = from_str::<Rss>(&xml_clean) {
        return Ok(RawDocument {
            entries: rss
                .channel
                .item
                .into_iter()
                .map(|it| RawEntry {
                    title: it.title,
                    link: it.link,
                    published: it.pub_date,
                    content: it.description,
                })
                .collect(),
        });
    }

    let feed: AtomFeed = from_str(&xml_clean)?;
    Ok(RawDocument {
        entries: feed.entry.into_iter().map(atom_entry).collect(),
    })
}

fn atom_entry(e: AtomEntry) -> RawEntry {
    // Prefer rel="alternate" (or no rel, which defaults to alternate).
    let link = e
        .link
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
        .or_else(|| e.link.first())
        .map(|l| l.href.clone());
    RawEntry {
        title: e.title.map(|t| t.value),
        link,
        published: e.published.or(e.updated),
        content: e.content.or(e.summary).map(|t| t.value),
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xml:lang="en-US" xmlns="http://www.w3.org/2005/Atom">
  <id>tag:www.githubstatus.com,2005:/history</id>
  <link rel="alternate" type="text/html" href="https://www.githubstatus.com"/>
  <link rel="self" type="application/atom+xml" href="https://www.githubstatus.com/history.atom"/>
  <title>GitHub Status - Incident History</title>
  <updated>2026-10-16T12:30:00Z</updated>
  <entry>
    <id>tag:www.githubstatus.com,2005:Incident/2</id>
    <published>2026-10-16T12:30:00Z</published>
    <updated>2026-10-16T12:30:00Z</updated>
    <link rel="alternate" type="text/html" href="https://www.githubstatus.com/incidents/two"/>
    <title>Degraded Actions</title>
    <content type="html">&lt;p&gt;body&amp;nbsp;two&lt;/p&gt;</content>
  </entry>
  <entry>
    <id>tag:www.githubstatus.com,2005:Incident/1</id>
    <published>2026-10-15T08:00:00Z</published>
    <updated>2026-10-15T09:00:00Z</updated>
    <link rel="alternate" type="text/html" href="https://www.githubstatus.com/incidents/one"/>
    <title>Pages outage</title>
    <content type="html">&lt;p&gt;body one&lt;/p&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn atom_entries_keep_document_order() {
        let doc = parse_document(ATOM).unwrap();
        assert_eq!(doc.entries.len(), 2);
        let first = &doc.entries[0];
        assert_eq!(first.title.as_deref(), Some("Degraded Actions"));
        assert_eq!(
            first.link.as_deref(),
            Some("https://www.githubstatus.com/incidents/two")
        );
        assert_eq!(first.published.as_deref(), Some("2026-10-16T12:30:00Z"));
        assert_eq!(first.content.as_deref(), Some("<p>body&nbsp;two</p>"));
    }

    #[test]
    fn rss_items_are_read() {
        let xml = r#"<rss version="2.0"><channel><title>x</title>
            <item><title>Outage</title><link>https://status.example.com/i/1</link>
            <pubDate>Thu, 16 Oct 2026 12:00:00 +0000</pubDate>
            <description>&lt;p&gt;hi&lt;/p&gt;</description></item>
            </channel></rss>"#;
        let doc = parse_document(xml).unwrap();
        assert_eq!(doc.entries.len(), 1);
        assert_eq!(doc.entries[0].content.as_deref(), Some("<p>hi</p>"));
        assert_eq!(
            doc.entries[0].published.as_deref(),
            Some("Thu, 16 Oct 2026 12:00:00 +0000")
        );
    }

    #[test]
    fn atom_without_entries_is_empty() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>t</title></feed>"#;
        let doc = parse_document(xml).unwrap();
        assert!(doc.entries.is_empty());
    }
}
