// src/ingest/http.rs
use std::time::Duration;

use async_trait::async_trait;
use metrics::histogram;
use reqwest::{header, Client, StatusCode};

use crate::catalog::ServiceEntry;
use crate::ingest::feed_xml::parse_document;
use crate::ingest::types::{FeedSource, FetchError, FetchOutcome};

/// Fetches catalog feeds over HTTP, using the ETag as caching token.
#[derive(Clone)]
pub struct HttpFeedSource {
    client: Client,
    timeout: Duration,
}

impl HttpFeedSource {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .user_agent(concat!("status-relay/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

impl Default for HttpFeedSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(
        &self,
        service: &ServiceEntry,
        token: Option<&str>,
    ) -> Result<FetchOutcome, FetchError> {
        let mut req = self.client.get(&service.url).timeout(self.timeout);
        if let Some(etag) = token {
            req = req.header(header::IF_NONE_MATCH, etag);
        }

        let resp = req.send().await.map_err(|e| FetchError::Connection {
            service: service.id.clone(),
            message: e.to_string(),
        })?;

        let status = resp.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::Unchanged);
        }

        let new_token = resp
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = resp.text().await.map_err(|e| FetchError::Connection {
            service: service.id.clone(),
            message: e.to_string(),
        })?;

        // Non-200 bodies are not decoded; the dispatcher decides what a bad status means.
        if status != StatusCode::OK {
            return Ok(FetchOutcome::Fetched {
                document: Default::default(),
                token: new_token,
                status: status.as_u16(),
            });
        }

        let t0 = std::time::Instant::now();
        let document = parse_document(&body).map_err(|e| FetchError::Decode {
            service: service.id.clone(),
            message: e.to_string(),
        })?;
        histogram!("status_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        Ok(FetchOutcome::Fetched {
            document,
            token: new_token,
            status: status.as_u16(),
        })
    }
}
