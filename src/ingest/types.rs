// src/ingest/types.rs
use serde::{Deserialize, Serialize};

use crate::catalog::ServiceEntry;

/// Feed document reduced to the entries we care about, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDocument {
    pub entries: Vec<RawEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<String>, // RFC 3339 (Atom) or RFC 2822 (RSS)
    pub content: Option<String>,   // HTML body
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Source confirmed the stored caching token is still current.
    Unchanged,
    Fetched {
        document: RawDocument,
        token: Option<String>,
        status: u16,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("connection to {service} failed: {message}")]
    Connection { service: String, message: String },
    #[error("{service} answered HTTP {status}")]
    Status { service: String, status: u16 },
    #[error("{service} feed could not be decoded: {message}")]
    Decode { service: String, message: String },
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the feed for `service`. `token` is the caching token stored from the
    /// previous successful poll; `None` means fetch unconditionally.
    async fn fetch(&self, service: &ServiceEntry, token: Option<&str>)
        -> Result<FetchOutcome, FetchError>;
}
