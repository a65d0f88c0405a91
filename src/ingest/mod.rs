// src/ingest/mod.rs
pub mod feed_xml;
pub mod http;
pub mod types;

pub use feed_xml::parse_document;
pub use http::HttpFeedSource;
pub use types::{FeedSource, FetchError, FetchOutcome, RawDocument, RawEntry};
