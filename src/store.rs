// src/store.rs
//! Narrow keyed store used for every piece of persisted state.
//!
//! Three independent namespaces (last known update, caching token,
//! subscriptions). Each supports plain `get`/`set` and an exclusive
//! read-modify-write via `transact`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    LastKnown,
    CachingToken,
    Subscriptions,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state file i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("state (de)serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("transaction committed without running its mutation")]
    Aborted,
}

/// Outcome of a transactional mutation: `Some` replaces the value, `None` keeps it.
pub type Mutation<'a> =
    Box<dyn FnOnce(Option<Value>) -> Result<Option<Value>, StoreError> + Send + 'a>;

#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, ns: Namespace, key: &str, value: Value) -> Result<(), StoreError>;
    async fn keys(&self, ns: Namespace) -> Result<Vec<String>, StoreError>;

    /// Run `f` inside the store's exclusive section. Nothing else reads or
    /// writes the store until `f` returns and its result is committed.
    async fn transact<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
        f: Mutation<'a>,
    ) -> Result<(), StoreError>;
}

pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn KvStore,
    ns: Namespace,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(ns, key).await? {
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
        None => Ok(None),
    }
}

pub async fn set_typed<T: Serialize + Sync>(
    store: &dyn KvStore,
    ns: Namespace,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store.set(ns, key, serde_json::to_value(value)?).await
}

/// Typed read-modify-write. `f` receives the current record (or `None` when
/// absent) and returns the record to commit (or `None` to leave it untouched)
/// together with a result handed back to the caller.
pub async fn transact_typed<T, R, F>(
    store: &dyn KvStore,
    ns: Namespace,
    key: &str,
    f: F,
) -> Result<R, StoreError>
where
    T: Serialize + DeserializeOwned,
    R: Send,
    F: FnOnce(Option<T>) -> (Option<T>, R) + Send,
{
    let mut out: Option<R> = None;
    let slot = &mut out;
    store
        .transact(
            ns,
            key,
            Box::new(move |raw| {
                let current = raw.map(serde_json::from_value).transpose()?;
                let (next, result) = f(current);
                *slot = Some(result);
                Ok(next.map(|v| serde_json::to_value(v)).transpose()?)
            }),
        )
        .await?;
    out.ok_or(StoreError::Aborted)
}

type Document = BTreeMap<Namespace, BTreeMap<String, Value>>;

/// Store backed by a single JSON document. In-memory only unless opened on a path,
/// in which case every committed write is flushed (temp file + rename).
#[derive(Debug)]
pub struct JsonStore {
    path: Option<PathBuf>,
    inner: Mutex<Document>,
}

impl JsonStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Document::new()),
        }
    }

    /// Open (or start) the state file at `path`. A missing file is an empty store.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Document::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), "state store opened");
        Ok(Self {
            path: Some(path),
            inner: Mutex::new(doc),
        })
    }

    /// Write `value` and flush. A failed flush puts the previous value back,
    /// so memory never holds a change the file doesn't.
    async fn commit(
        &self,
        doc: &mut Document,
        ns: Namespace,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let prev = doc.entry(ns).or_default().insert(key.to_string(), value);
        if let Err(e) = self.flush(doc).await {
            let records = doc.entry(ns).or_default();
            match prev {
                Some(v) => {
                    records.insert(key.to_string(), v);
                }
                None => {
                    records.remove(key);
                }
            }
            tracing::warn!(?ns, key, error = %e, "state flush failed, change rolled back");
            return Err(e);
        }
        Ok(())
    }

    async fn flush(&self, doc: &Document) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(doc)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl KvStore for JsonStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>, StoreError> {
        let doc = self.inner.lock().await;
        Ok(doc.get(&ns).and_then(|m| m.get(key)).cloned())
    }

    async fn set(&self, ns: Namespace, key: &str, value: Value) -> Result<(), StoreError> {
        let mut doc = self.inner.lock().await;
        self.commit(&mut doc, ns, key, value).await
    }

    async fn keys(&self, ns: Namespace) -> Result<Vec<String>, StoreError> {
        let doc = self.inner.lock().await;
        Ok(doc
            .get(&ns)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn transact<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
        f: Mutation<'a>,
    ) -> Result<(), StoreError> {
        let mut doc = self.inner.lock().await;
        let current = doc.get(&ns).and_then(|m| m.get(key)).cloned();
        match f(current)? {
            Some(next) => self.commit(&mut doc, ns, key, next).await,
            None => Ok(()),
        }
    }
}
