// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod catalog;
pub mod change_detector;
pub mod config;
pub mod dispatch;
pub mod ingest;
pub mod metrics;
pub mod normalize;
pub mod notify;
pub mod store;
pub mod subscriptions;
pub mod update;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::catalog::{FeedCatalog, ServiceEntry};
pub use crate::change_detector::{ChangeDetector, Decision};
pub use crate::dispatch::{DispatchConfig, DispatchLoop, LoopState};
pub use crate::notify::{DeliveryError, Notifier};
pub use crate::subscriptions::{DestinationId, SubscriptionError, SubscriptionIndex};
pub use crate::update::{FeedUpdate, FieldOrder, UpdateField};

use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::ingest::HttpFeedSource;
use crate::notify::{DiscordNotifier, LogNotifier};
use crate::store::JsonStore;

/// Wire the dispatch loop from configuration: catalog, state store, HTTP feed
/// source and the configured notifier.
pub async fn build_dispatch(cfg: &AppConfig) -> anyhow::Result<(Arc<DispatchLoop>, Arc<dyn Notifier>)> {
    let catalog = config::load_catalog_default().context("loading feed catalog")?;
    let store = JsonStore::open(&cfg.state_path)
        .await
        .with_context(|| format!("opening state store {}", cfg.state_path.display()))?;

    let notifier: Arc<dyn Notifier> = match &cfg.discord_token {
        Some(token) => {
            let mut n = DiscordNotifier::new(token.clone())
                .with_mode(cfg.render_mode)
                .with_timeout(cfg.http_timeout_secs);
            if let Some(base) = &cfg.discord_api_base {
                n = n.with_api_base(base.clone());
            }
            Arc::new(n)
        }
        None => {
            tracing::warn!("DISCORD_BOT_TOKEN not set, status updates will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let dispatch = DispatchLoop::new(
        Arc::new(catalog),
        Arc::new(HttpFeedSource::new().with_timeout(cfg.http_timeout_secs)),
        notifier.clone(),
        Arc::new(store),
        cfg.dispatch,
    );
    Ok((Arc::new(dispatch), notifier))
}
