// tests/common/mod.rs
// Shared test doubles for the dispatch/integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use status_relay::catalog::{FeedCatalog, ServiceEntry};
use status_relay::ingest::{FeedSource, FetchError, FetchOutcome, RawDocument, RawEntry};
use status_relay::notify::{DeliveryError, Notifier};
use serde_json::Value;
use status_relay::store::{JsonStore, KvStore, Mutation, Namespace, StoreError};
use status_relay::{DestinationId, DispatchConfig, DispatchLoop, FeedUpdate, FieldOrder};

/// Statuspage-style body with one paragraph per `(time, status, text)`.
pub fn body(sections: &[(&str, &str, &str)]) -> String {
    sections
        .iter()
        .map(|(time, status, text)| {
            format!("<p><small>{time}</small><br><strong>{status}</strong> - {text}</p>")
        })
        .collect()
}

pub fn document(title: &str, published: &str, html: &str) -> RawDocument {
    RawDocument {
        entries: vec![RawEntry {
            title: Some(title.to_string()),
            link: Some("https://status.example.com/incidents/1".to_string()),
            published: Some(published.to_string()),
            content: Some(html.to_string()),
        }],
    }
}

pub fn entry(id: &str) -> ServiceEntry {
    ServiceEntry {
        id: id.to_string(),
        url: format!("https://{id}.example.com/history.atom"),
        friendly_name: id.to_uppercase(),
        color: 1,
        field_order: FieldOrder::NewestFirst,
    }
}

pub fn catalog(ids: &[&str]) -> Arc<FeedCatalog> {
    Arc::new(FeedCatalog::new(ids.iter().map(|id| entry(id)).collect()))
}

#[derive(Clone, Debug)]
pub enum Behavior {
    Serve {
        document: RawDocument,
        token: Option<String>,
        status: u16,
    },
    Unchanged,
    /// Serves `document` unless the caller already holds `token`.
    Conditional {
        document: RawDocument,
        token: String,
    },
    ConnectionRefused,
    Hang,
}

/// Feed source answering from a per-service script; records the tokens it was given.
#[derive(Default)]
pub struct ScriptedSource {
    behaviors: Mutex<HashMap<String, Behavior>>,
    pub calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, service: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(service.to_string(), behavior);
    }

    pub fn serve(&self, service: &str, document: RawDocument, token: &str) {
        self.set(
            service,
            Behavior::Serve {
                document,
                token: Some(token.to_string()),
                status: 200,
            },
        );
    }

    pub fn calls_for(&self, service: &str) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == service)
            .map(|(_, t)| t.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch(
        &self,
        service: &ServiceEntry,
        token: Option<&str>,
    ) -> Result<FetchOutcome, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((service.id.clone(), token.map(str::to_string)));
        let behavior = self.behaviors.lock().unwrap().get(&service.id).cloned();
        match behavior {
            Some(Behavior::Serve {
                document,
                token,
                status,
            }) => Ok(FetchOutcome::Fetched {
                document,
                token,
                status,
            }),
            Some(Behavior::Unchanged) => Ok(FetchOutcome::Unchanged),
            Some(Behavior::Conditional { document, token: etag }) => {
                if token == Some(etag.as_str()) {
                    Ok(FetchOutcome::Unchanged)
                } else {
                    Ok(FetchOutcome::Fetched {
                        document,
                        token: Some(etag),
                        status: 200,
                    })
                }
            }
            Some(Behavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(FetchOutcome::Unchanged)
            }
            Some(Behavior::ConnectionRefused) | None => Err(FetchError::Connection {
                service: service.id.clone(),
                message: "connection refused".into(),
            }),
        }
    }
}

/// Notifier recording every successful send; destinations in `failing` are rejected.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(DestinationId, FeedUpdate)>>,
    pub failing: Mutex<HashSet<DestinationId>>,
    pub attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, dest: DestinationId) {
        self.failing.lock().unwrap().insert(dest);
    }

    pub fn destinations(&self) -> Vec<DestinationId> {
        self.sent.lock().unwrap().iter().map(|(d, _)| *d).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        destination: DestinationId,
        update: &FeedUpdate,
    ) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&destination) {
            return Err(DeliveryError::Forbidden(destination));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination, update.clone()));
        Ok(())
    }
}

/// Store whose first `failures` transactions on `LastKnown` fail like a full disk.
pub struct FlakyStore {
    inner: Arc<JsonStore>,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<JsonStore>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait::async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(ns, key).await
    }

    async fn set(&self, ns: Namespace, key: &str, value: Value) -> Result<(), StoreError> {
        self.inner.set(ns, key, value).await
    }

    async fn keys(&self, ns: Namespace) -> Result<Vec<String>, StoreError> {
        self.inner.keys(ns).await
    }

    async fn transact<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
        f: Mutation<'a>,
    ) -> Result<(), StoreError> {
        if ns == Namespace::LastKnown
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.transact(ns, key, f).await
    }
}

pub struct Harness {
    pub dispatch: Arc<DispatchLoop>,
    pub source: Arc<ScriptedSource>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<JsonStore>,
}

pub fn harness(ids: &[&str]) -> Harness {
    let store = Arc::new(JsonStore::in_memory());
    harness_with(ids, store.clone(), store)
}

/// Harness whose dispatch loop writes through `kv`; `store` is the backing
/// `JsonStore` for assertions.
pub fn harness_with(ids: &[&str], store: Arc<JsonStore>, kv: Arc<dyn KvStore>) -> Harness {
    let source = Arc::new(ScriptedSource::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let cfg = DispatchConfig {
        interval: Duration::from_secs(180),
        cycle_timeout: Duration::from_secs(150),
        start_delay: Duration::from_millis(100),
    };
    let dispatch = Arc::new(DispatchLoop::new(
        catalog(ids),
        source.clone(),
        notifier.clone(),
        kv,
        cfg,
    ));
    Harness {
        dispatch,
        source,
        notifier,
        store,
    }
}
