// src/notify/mod.rs
pub mod discord;

use crate::subscriptions::DestinationId;
use crate::update::FeedUpdate;

pub use discord::{DiscordNotifier, RenderMode};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("missing permission to post in {0}")]
    Forbidden(DestinationId),
    #[error("destination {0} no longer exists")]
    UnknownDestination(DestinationId),
    #[error("delivery to {destination} failed with HTTP {status}")]
    Http {
        destination: DestinationId,
        status: u16,
    },
    #[error("delivery to {destination} failed: {message}")]
    Transport {
        destination: DestinationId,
        message: String,
    },
}

/// Renders and delivers a `FeedUpdate` to one destination.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destination: DestinationId, update: &FeedUpdate)
        -> Result<(), DeliveryError>;

    /// Resolves once the delivery backend is usable. Default: immediately.
    async fn wait_ready(&self) {}
}

/// Notifier that only logs; used when no delivery backend is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, destination: DestinationId, update: &FeedUpdate) -> Result<(), DeliveryError> {
        tracing::info!(
            %destination,
            service = %update.service_id,
            title = %update.title,
            fields = update.fields.len(),
            "status update (delivery disabled, no DISCORD_BOT_TOKEN)"
        );
        Ok(())
    }
}
