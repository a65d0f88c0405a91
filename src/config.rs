// src/config.rs
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{FeedCatalog, ServiceOverride};
use crate::dispatch::DispatchConfig;
use crate::notify::RenderMode;

pub const ENV_FEEDS_PATH: &str = "STATUS_FEEDS_PATH";
pub const DEFAULT_STATE_PATH: &str = "state/status.json";

/// Process configuration, read from the environment (`.env` is loaded by the binary).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub dispatch: DispatchConfig,
    pub state_path: PathBuf,
    pub render_mode: RenderMode,
    pub discord_token: Option<String>,
    pub discord_api_base: Option<String>,
    /// Per-request timeout for feed fetches and deliveries.
    pub http_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            interval: env_u64("STATUS_POLL_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            cycle_timeout: env_u64("STATUS_CYCLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cycle_timeout),
            start_delay: env_u64("STATUS_START_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.start_delay),
        };

        let render_mode = match std::env::var("STATUS_RENDER_MODE") {
            Ok(raw) => RenderMode::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "unknown STATUS_RENDER_MODE, using embed");
                RenderMode::Embed
            }),
            Err(_) => RenderMode::Embed,
        };

        Self {
            dispatch,
            state_path: std::env::var("STATUS_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STATE_PATH)),
            render_mode,
            discord_token: non_empty_env("DISCORD_BOT_TOKEN"),
            discord_api_base: non_empty_env("DISCORD_API_BASE"),
            http_timeout_secs: env_u64("STATUS_HTTP_TIMEOUT_SECS").unwrap_or(30),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load catalog overrides from an explicit path. Supports TOML or JSON formats.
pub fn load_overrides_from(path: &Path) -> Result<Vec<ServiceOverride>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading feed catalog from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_overrides(&content, ext.as_str())
}

/// Build the catalog using env var + fallbacks:
/// 1) $STATUS_FEEDS_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
/// 4) built-in services only
pub fn load_catalog_default() -> Result<FeedCatalog> {
    let builtin = FeedCatalog::builtin();
    if let Ok(p) = std::env::var(ENV_FEEDS_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(builtin.with_overrides(load_overrides_from(&pb)?));
        } else {
            return Err(anyhow!("STATUS_FEEDS_PATH points to non-existent path"));
        }
    }
    for candidate in ["config/feeds.toml", "config/feeds.json"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return Ok(builtin.with_overrides(load_overrides_from(&p)?));
        }
    }
    Ok(builtin)
}

fn parse_overrides(s: &str, hint_ext: &str) -> Result<Vec<ServiceOverride>> {
    if hint_ext == "json" {
        return parse_json(s);
    }
    match parse_toml(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => parse_json(s).map_err(|_| {
            toml_err.context("unsupported feed catalog format (neither TOML nor a JSON array)")
        }),
    }
}

fn parse_toml(s: &str) -> Result<Vec<ServiceOverride>> {
    #[derive(serde::Deserialize)]
    struct TomlCatalog {
        #[serde(default)]
        service: Vec<ServiceOverride>,
    }
    let v: TomlCatalog = toml::from_str(s)?;
    Ok(v.service)
}

fn parse_json(s: &str) -> Result<Vec<ServiceOverride>> {
    Ok(serde_json::from_str(s)?)
}
