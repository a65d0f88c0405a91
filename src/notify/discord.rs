use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::{DeliveryError, Notifier};
use crate::normalize::paginate;
use crate::subscriptions::DestinationId;
use crate::update::FeedUpdate;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Discord caps an embed at 25 fields and 6000 characters in total.
const MAX_EMBED_FIELDS: usize = 25;
const MAX_EMBED_CHARS: usize = 6000;
/// Longest `content` Discord accepts in one message.
const MAX_CONTENT_CHARS: usize = 2000;

const MAX_READY_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Embed,
    PlainText,
}

impl RenderMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embed" => Some(Self::Embed),
            "plain" | "text" | "plaintext" => Some(Self::PlainText),
            _ => None,
        }
    }
}

/// Posts updates to channels through the Discord REST API with a bot token.
#[derive(Clone)]
pub struct DiscordNotifier {
    token: String,
    api_base: String,
    client: Client,
    timeout: Duration,
    mode: RenderMode,
}

impl DiscordNotifier {
    pub fn new(token: String) -> Self {
        Self {
            token,
            api_base: DEFAULT_API_BASE.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
            mode: RenderMode::Embed,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn post_message(
        &self,
        destination: DestinationId,
        payload: &MessagePayload,
    ) -> Result<(), DeliveryError> {
        let url = format!("{}/channels/{}/messages", self.api_base, destination);
        let rsp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport {
                destination,
                message: e.to_string(),
            })?;

        match rsp.status() {
            s if s.is_success() => Ok(()),
            StatusCode::FORBIDDEN => Err(DeliveryError::Forbidden(destination)),
            StatusCode::NOT_FOUND => Err(DeliveryError::UnknownDestination(destination)),
            s => Err(DeliveryError::Http {
                destination,
                status: s.as_u16(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn send(&self, destination: DestinationId, update: &FeedUpdate) -> Result<(), DeliveryError> {
        let payloads = match self.mode {
            RenderMode::Embed => vec![MessagePayload::embed(update)],
            RenderMode::PlainText => MessagePayload::text(update),
        };
        for payload in &payloads {
            self.post_message(destination, payload).await?;
        }
        Ok(())
    }

    /// Poll `/users/@me` until the token is accepted.
    async fn wait_ready(&self) {
        let url = format!("{}/users/@me", self.api_base);
        let mut delay = Duration::from_secs(1);
        loop {
            let res = self
                .client
                .get(&url)
                .timeout(self.timeout)
                .header(reqwest::header::AUTHORIZATION, self.auth())
                .send()
                .await;
            match res.map(|rsp| readiness(rsp.status())) {
                Ok(Readiness::Ready) => {
                    tracing::info!("discord API ready");
                    return;
                }
                Ok(Readiness::Rejected) => {
                    tracing::error!("discord rejected DISCORD_BOT_TOKEN (401), dispatch stays paused");
                    delay = MAX_READY_BACKOFF;
                }
                Ok(Readiness::NotReady(status)) => {
                    tracing::warn!(status, "discord API not ready")
                }
                Err(e) => tracing::warn!(error = %e, "discord API unreachable"),
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_READY_BACKOFF);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Ready,
    Rejected,
    NotReady(u16),
}

fn readiness(status: StatusCode) -> Readiness {
    match status {
        s if s.is_success() => Readiness::Ready,
        StatusCode::UNAUTHORIZED => Readiness::Rejected,
        s => Readiness::NotReady(s.as_u16()),
    }
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
    fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize)]
struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<DiscordEmbed>,
}

impl MessagePayload {
    fn embed(update: &FeedUpdate) -> Self {
        let chronological = update.chronological_fields();
        let mut total = update.title.chars().count() + update.description.chars().count();
        // Walk back from the newest field, keeping what fits.
        let mut kept = 0;
        for f in chronological.iter().rev().take(MAX_EMBED_FIELDS) {
            let size = f.name.chars().count() + f.value.chars().count();
            if total + size > MAX_EMBED_CHARS {
                break;
            }
            total += size;
            kept += 1;
        }
        let fields = chronological[chronological.len() - kept..]
            .iter()
            .map(|f| EmbedField {
                name: f.name.clone(),
                value: f.value.clone(),
                inline: false,
            })
            .collect();
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: update.title.clone(),
                description: update.description.clone(),
                color: update.color,
                timestamp: update.timestamp.to_rfc3339(),
                fields,
            }],
        }
    }

    /// One message per 2000-character page of the plain rendering.
    fn text(update: &FeedUpdate) -> Vec<Self> {
        paginate(&render_plain(update), MAX_CONTENT_CHARS)
            .into_iter()
            .map(|page| Self {
                content: Some(page),
                embeds: Vec::new(),
            })
            .collect()
    }
}

static RE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\b(https?://[^\s<>()"']+[^\s<>()"'.,;:!?])"#).unwrap());

/// Plain-text rendering; URLs are wrapped in `<...>` so Discord doesn't unfurl them.
pub fn render_plain(update: &FeedUpdate) -> String {
    let mut msg = format!("**{}**\n{}\n\n", update.title, update.description);
    for f in update.chronological_fields() {
        msg.push_str(&format!("**{}**\n{}\n", f.name, f.value));
    }
    RE_URL.replace_all(&msg, "<$1>").into_owned()
}
