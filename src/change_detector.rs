// src/change_detector.rs
//! Ghost-update detection.
//!
//! Status feeds reissue their newest entry on every fetch (often with a fresh
//! timestamp), so "an entry is present" says nothing. An update is only
//! accepted when its field list differs from the last accepted one for that
//! service. Acceptance and the write of the new record happen in one store
//! transaction, before any fan-out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::store::{get_typed, transact_typed, KvStore, Namespace, StoreError};
use crate::update::{FeedUpdate, UpdateField};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    Ghost,
}

/// Last accepted update for a service, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastKnownUpdate {
    pub fields: Vec<UpdateField>,
    /// Epoch seconds of the accepted update.
    pub time: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl LastKnownUpdate {
    fn from_update(update: &FeedUpdate) -> Self {
        Self {
            fields: update.fields.clone(),
            time: update.timestamp.timestamp(),
            title: update.title.clone(),
            description: update.description.clone(),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }
}

#[derive(Clone)]
pub struct ChangeDetector {
    store: Arc<dyn KvStore>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Decide whether `candidate` is a genuine new update for its service.
    ///
    /// A service with nothing stored always accepts. On `Accepted` the stored
    /// record is replaced; on `Ghost` nothing is written.
    pub async fn evaluate(&self, candidate: &FeedUpdate) -> Result<Decision, StoreError> {
        let service = candidate.service_id.as_str();
        let decision = transact_typed(
            self.store.as_ref(),
            Namespace::LastKnown,
            service,
            |prior: Option<LastKnownUpdate>| match prior {
                Some(prev) if candidate.same_fields(&prev.fields) => (None, Decision::Ghost),
                _ => (
                    Some(LastKnownUpdate::from_update(candidate)),
                    Decision::Accepted,
                ),
            },
        )
        .await?;

        match decision {
            Decision::Accepted => {
                counter!("status_accepted_total").increment(1);
                tracing::debug!(service, fields = candidate.fields.len(), "update accepted");
            }
            Decision::Ghost => {
                counter!("status_ghost_total").increment(1);
                tracing::debug!(service, "ghost status update detected, skipping");
            }
        }
        Ok(decision)
    }

    pub async fn last_known(&self, service: &str) -> Result<Option<LastKnownUpdate>, StoreError> {
        get_typed(self.store.as_ref(), Namespace::LastKnown, service).await
    }
}
