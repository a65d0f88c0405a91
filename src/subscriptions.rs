// src/subscriptions.rs
//! Per-scope subscription records: which destination channels receive which
//! service's updates.
//!
//! One store record per scope, `{service_id: [destination, ...]}`. Older
//! records may hold a bare integer instead of a list for a service; such
//! values are read as a one-element list and rewritten as a list the first
//! time the scope is mutated.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{get_typed, transact_typed, KvStore, Namespace, StoreError};

/// Opaque delivery target id (e.g. a channel snowflake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub u64);

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stored channel list, tolerant of the legacy scalar shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StoredChannels {
    Many(Vec<DestinationId>),
    One(DestinationId),
}

impl From<StoredChannels> for Vec<DestinationId> {
    fn from(s: StoredChannels) -> Self {
        match s {
            StoredChannels::Many(v) => v,
            StoredChannels::One(id) => vec![id],
        }
    }
}

/// All subscriptions of one scope, normalized to lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, StoredChannels>")]
pub struct ScopeSubscriptions {
    #[serde(flatten)]
    pub services: BTreeMap<String, Vec<DestinationId>>,
}

impl From<BTreeMap<String, StoredChannels>> for ScopeSubscriptions {
    fn from(raw: BTreeMap<String, StoredChannels>) -> Self {
        Self {
            services: raw.into_iter().map(|(k, v)| (k, v.into())).collect(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("{destination} already receives {service} updates")]
    AlreadySubscribed {
        service: String,
        destination: DestinationId,
    },
    #[error("{destination} does not receive {service} updates")]
    NotSubscribed {
        service: String,
        destination: DestinationId,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct SubscriptionIndex {
    store: Arc<dyn KvStore>,
}

impl SubscriptionIndex {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn add(
        &self,
        scope: &str,
        service: &str,
        destination: DestinationId,
    ) -> Result<(), SubscriptionError> {
        let outcome = transact_typed(
            self.store.as_ref(),
            Namespace::Subscriptions,
            scope,
            |current: Option<ScopeSubscriptions>| {
                let mut record = current.unwrap_or_default();
                let channels = record.services.entry(service.to_string()).or_default();
                if channels.contains(&destination) {
                    return (None, Err(already(service, destination)));
                }
                channels.push(destination);
                (Some(record), Ok(()))
            },
        )
        .await?;
        if outcome.is_ok() {
            tracing::info!(scope, service, %destination, "subscription added");
        }
        outcome
    }

    pub async fn remove(
        &self,
        scope: &str,
        service: &str,
        destination: DestinationId,
    ) -> Result<(), SubscriptionError> {
        let outcome = transact_typed(
            self.store.as_ref(),
            Namespace::Subscriptions,
            scope,
            |current: Option<ScopeSubscriptions>| {
                let Some(mut record) = current else {
                    return (None, Err(not_subscribed(service, destination)));
                };
                let Some(channels) = record.services.get_mut(service) else {
                    return (None, Err(not_subscribed(service, destination)));
                };
                let before = channels.len();
                channels.retain(|d| *d != destination);
                if channels.len() == before {
                    return (None, Err(not_subscribed(service, destination)));
                }
                if channels.is_empty() {
                    record.services.remove(service);
                }
                (Some(record), Ok(()))
            },
        )
        .await?;
        if outcome.is_ok() {
            tracing::info!(scope, service, %destination, "subscription removed");
        }
        outcome
    }

    /// Every destination subscribed to `service`, across all scopes, without duplicates.
    pub async fn list_destinations(
        &self,
        service: &str,
    ) -> Result<BTreeSet<DestinationId>, SubscriptionError> {
        let mut out = BTreeSet::new();
        for scope in self.store.keys(Namespace::Subscriptions).await? {
            match self.read_scope(&scope).await {
                Ok(record) => {
                    if let Some(channels) = record.services.get(service) {
                        out.extend(channels.iter().copied());
                    }
                }
                // One unreadable scope must not hide every other subscriber.
                Err(e) => tracing::warn!(scope = %scope, error = %e, "skipping unreadable subscription record"),
            }
        }
        Ok(out)
    }

    /// Services with at least one destination in `scope`.
    pub async fn list_for_scope(
        &self,
        scope: &str,
    ) -> Result<BTreeMap<String, Vec<DestinationId>>, SubscriptionError> {
        let record = self.read_scope(scope).await?;
        Ok(record
            .services
            .into_iter()
            .filter(|(_, channels)| !channels.is_empty())
            .collect())
    }

    async fn read_scope(&self, scope: &str) -> Result<ScopeSubscriptions, StoreError> {
        Ok(get_typed(self.store.as_ref(), Namespace::Subscriptions, scope)
            .await?
            .unwrap_or_default())
    }
}

fn already(service: &str, destination: DestinationId) -> SubscriptionError {
    SubscriptionError::AlreadySubscribed {
        service: service.to_string(),
        destination,
    }
}

fn not_subscribed(service: &str, destination: DestinationId) -> SubscriptionError {
    SubscriptionError::NotSubscribed {
        service: service.to_string(),
        destination,
    }
}
