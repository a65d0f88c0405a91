// src/dispatch.rs
//! The polling scheduler.
//!
//! Every `interval` the loop walks the catalog once, sequentially:
//! fetch → normalize → change detection → fan-out. Failures are contained at
//! the smallest scope (destination, then service, then cycle); only external
//! cancellation stops the loop.
//!
//! ```text
//! NotStarted --ready--> Idle --tick--> Polling --done/timeout--> Idle
//!      \________________________\______________cancel_____________--> Stopped
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::catalog::{FeedCatalog, ServiceEntry};
use crate::change_detector::{ChangeDetector, Decision};
use crate::ingest::types::{FeedSource, FetchError, FetchOutcome};
use crate::normalize::{normalize, MalformedFeedError};
use crate::store::{get_typed, set_typed, KvStore, Namespace, StoreError};
use crate::subscriptions::{SubscriptionError, SubscriptionIndex};
use crate::notify::Notifier;
use crate::update::FeedUpdate;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    pub interval: Duration,
    pub cycle_timeout: Duration,
    pub start_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            cycle_timeout: Duration::from_secs(150),
            start_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    NotStarted,
    Idle,
    Polling,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoopStatus {
    pub state: LoopState,
    pub cycles: u64,
    pub last_cycle_started: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Malformed(#[from] MalformedFeedError),
    #[error("state store: {0}")]
    Store(#[from] StoreError),
    #[error("subscriptions: {0}")]
    Subscriptions(#[from] SubscriptionError),
    #[error("unknown service {0}")]
    UnknownService(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ServiceOutcome {
    /// Source reported the caching token as current.
    Unchanged,
    Ghost,
    Delivered { delivered: usize, failed: usize },
    Failed { error: String },
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CycleReport {
    pub outcomes: Vec<(String, ServiceOutcome)>,
    /// Services not reached because the cycle deadline expired.
    pub skipped: Vec<String>,
    pub timed_out: bool,
}

impl CycleReport {
    pub fn outcome(&self, service: &str) -> Option<&ServiceOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == service)
            .map(|(_, o)| o)
    }
}

pub struct DispatchLoop {
    catalog: Arc<FeedCatalog>,
    source: Arc<dyn FeedSource>,
    detector: ChangeDetector,
    index: SubscriptionIndex,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn KvStore>,
    cfg: DispatchConfig,
    // Serializes loop polls with manual checks of the same service.
    service_locks: HashMap<String, Mutex<()>>,
    status: watch::Sender<LoopStatus>,
}

impl DispatchLoop {
    pub fn new(
        catalog: Arc<FeedCatalog>,
        source: Arc<dyn FeedSource>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn KvStore>,
        cfg: DispatchConfig,
    ) -> Self {
        let service_locks = catalog
            .iter()
            .map(|e| (e.id.clone(), Mutex::new(())))
            .collect();
        let (status, _) = watch::channel(LoopStatus {
            state: LoopState::NotStarted,
            cycles: 0,
            last_cycle_started: None,
        });
        Self {
            detector: ChangeDetector::new(store.clone()),
            index: SubscriptionIndex::new(store.clone()),
            catalog,
            source,
            notifier,
            store,
            cfg,
            service_locks,
            status,
        }
    }

    pub fn config(&self) -> DispatchConfig {
        self.cfg
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn subscriptions(&self) -> &SubscriptionIndex {
        &self.index
    }

    pub fn catalog(&self) -> &FeedCatalog {
        &self.catalog
    }

    pub fn status(&self) -> LoopStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> LoopState {
        self.status.borrow().state
    }

    /// Watch state transitions.
    pub fn watch_status(&self) -> watch::Receiver<LoopStatus> {
        self.status.subscribe()
    }

    /// Running and the last cycle started recently enough.
    pub fn is_healthy(&self, now: DateTime<Utc>) -> bool {
        let s = self.status.borrow();
        if !matches!(s.state, LoopState::Idle | LoopState::Polling) {
            return false;
        }
        let grace = self.cfg.interval + self.cfg.cycle_timeout;
        match s.last_cycle_started {
            Some(ts) => (now - ts).to_std().map_or(true, |age| age <= grace),
            None => false,
        }
    }

    fn set_state(&self, state: LoopState) {
        self.status.send_modify(|s| s.state = state);
    }

    /// Run until `cancel` fires. Waits for `ready` before the first cycle.
    pub async fn run<R>(self: Arc<Self>, ready: R, cancel: CancellationToken)
    where
        R: Future<Output = ()> + Send,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.set_state(LoopState::Stopped);
                return;
            }
            _ = ready => {}
        }
        self.set_state(LoopState::Idle);
        tracing::info!(
            services = self.catalog.len(),
            interval_secs = self.cfg.interval.as_secs(),
            "status dispatch loop started"
        );

        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                // Abandoning mid-cycle is safe: every store write is its own transaction.
                _ = cancel.cancelled() => break,
                _ = self.run_cycle() => {}
            }
        }

        self.set_state(LoopState::Stopped);
        tracing::info!("status dispatch loop stopped");
    }

    /// One full cycle, bounded by the cycle timeout.
    pub async fn run_cycle(&self) -> CycleReport {
        tokio::time::sleep(self.cfg.start_delay).await;

        let now = Utc::now();
        self.status.send_modify(|s| {
            s.state = LoopState::Polling;
            s.cycles += 1;
            s.last_cycle_started = Some(now);
        });
        gauge!("status_last_cycle_ts").set(now.timestamp() as f64);

        let mut report = CycleReport::default();
        let finished = tokio::time::timeout(self.cfg.cycle_timeout, self.poll_all(&mut report))
            .await
            .is_ok();

        if !finished {
            report.timed_out = true;
            report.skipped = self
                .catalog
                .iter()
                .map(|e| e.id.clone())
                .filter(|id| report.outcome(id).is_none())
                .collect();
            counter!("status_cycle_timeouts_total").increment(1);
            tracing::warn!(
                timeout_secs = self.cfg.cycle_timeout.as_secs(),
                skipped = ?report.skipped,
                "status cycle timed out, remaining services deferred to next cycle"
            );
        }

        self.set_state(LoopState::Idle);
        report
    }

    async fn poll_all(&self, report: &mut CycleReport) {
        for entry in self.catalog.iter() {
            let outcome = self.poll_locked(entry).await;
            report.outcomes.push((entry.id.clone(), outcome));
        }
    }

    /// Poll one service right now, outside the schedule.
    pub async fn check_service(&self, service: &str) -> Result<ServiceOutcome, PollError> {
        let entry = self
            .catalog
            .get(service)
            .ok_or_else(|| PollError::UnknownService(service.to_string()))?;
        Ok(self.poll_locked(entry).await)
    }

    async fn poll_locked(&self, entry: &ServiceEntry) -> ServiceOutcome {
        let _guard = match self.service_locks.get(&entry.id) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        counter!("status_polls_total").increment(1);
        match self.poll_service(entry).await {
            Ok(outcome) => outcome,
            Err(e) => {
                match &e {
                    PollError::Fetch(_) => counter!("status_fetch_errors_total").increment(1),
                    PollError::Malformed(_) => counter!("status_malformed_total").increment(1),
                    _ => {}
                }
                tracing::warn!(service = %entry.id, error = %e, "status poll failed, skipping this cycle");
                ServiceOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn poll_service(&self, entry: &ServiceEntry) -> Result<ServiceOutcome, PollError> {
        let token: Option<String> =
            get_typed(self.store.as_ref(), Namespace::CachingToken, &entry.id).await?;

        let (document, new_token) = match self.source.fetch(entry, token.as_deref()).await? {
            FetchOutcome::Unchanged => {
                tracing::debug!(service = %entry.id, "no status update");
                return Ok(ServiceOutcome::Unchanged);
            }
            FetchOutcome::Fetched { status, .. } if status != 200 => {
                return Err(FetchError::Status {
                    service: entry.id.clone(),
                    status,
                }
                .into());
            }
            FetchOutcome::Fetched {
                document, token, ..
            } => (document, token),
        };

        let update = normalize(entry, &document)?;
        let decision = self.detector.evaluate(&update).await?;

        // The token is stored only after the detector has recorded this document.
        if let Some(t) = new_token.filter(|t| Some(t) != token.as_ref()) {
            if let Err(e) =
                set_typed(self.store.as_ref(), Namespace::CachingToken, &entry.id, &t).await
            {
                tracing::warn!(service = %entry.id, error = %e, "caching token not stored");
            }
        }

        match decision {
            Decision::Ghost => Ok(ServiceOutcome::Ghost),
            Decision::Accepted => self.fan_out(&update).await,
        }
    }

    /// Send `update` to every subscribed destination. A failing destination
    /// never stops the others and never rolls back the accepted state.
    async fn fan_out(&self, update: &FeedUpdate) -> Result<ServiceOutcome, PollError> {
        let destinations = self.index.list_destinations(&update.service_id).await?;
        tracing::debug!(
            service = %update.service_id,
            destinations = destinations.len(),
            "sending status update"
        );

        let (mut delivered, mut failed) = (0usize, 0usize);
        for dest in destinations {
            match self.notifier.send(dest, update).await {
                Ok(()) => {
                    delivered += 1;
                    counter!("status_deliveries_total").increment(1);
                }
                Err(e) => {
                    failed += 1;
                    counter!("status_delivery_failures_total").increment(1);
                    tracing::warn!(
                        service = %update.service_id,
                        destination = %dest,
                        error = %e,
                        "unable to deliver status update"
                    );
                }
            }
        }
        Ok(ServiceOutcome::Delivered { delivered, failed })
    }
}
