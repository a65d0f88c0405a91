//! # Feed Catalog
//!
//! Static registry of the status feeds this service knows how to poll.
//!
//! - Built-in seed with the common statuspage-hosted services.
//! - Optional overrides from a TOML/JSON file (see `config::load_catalog_default`).
//! - Case-insensitive lookup by service id.
//!
//! Entries are fixed for the lifetime of the process once the catalog is built.

use serde::{Deserialize, Serialize};

use crate::update::FieldOrder;

/// Fallback embed color for services without a palette entry.
pub const DEFAULT_COLOR: u32 = 2_985_215;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub id: String,
    pub url: String,
    pub friendly_name: String,
    #[serde(default = "default_color")]
    pub color: u32,
    #[serde(default)]
    pub field_order: FieldOrder,
}

fn default_color() -> u32 {
    DEFAULT_COLOR
}

/// Partial entry as read from a config file. Missing keys fall back to the
/// built-in entry with the same id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceOverride {
    pub id: String,
    pub url: Option<String>,
    pub friendly_name: Option<String>,
    pub color: Option<u32>,
    pub field_order: Option<FieldOrder>,
}

#[derive(Debug, Clone)]
pub struct FeedCatalog {
    entries: Vec<ServiceEntry>,
}

impl FeedCatalog {
    pub fn new(entries: Vec<ServiceEntry>) -> Self {
        let mut out: Vec<ServiceEntry> = Vec::with_capacity(entries.len());
        for mut e in entries {
            e.id = normalize_id(&e.id);
            if e.id.is_empty() {
                continue;
            }
            match out.iter_mut().find(|x| x.id == e.id) {
                Some(existing) => *existing = e,
                None => out.push(e),
            }
        }
        Self { entries: out }
    }

    /// Built-in seed.
    pub fn builtin() -> Self {
        let seed = [
            ("discord", "https://discordstatus.com/history.atom", "Discord", 7_506_394),
            ("github", "https://www.githubstatus.com/history.atom", "GitHub", 1_779_768),
            ("cloudflare", "https://www.cloudflarestatus.com/history.atom", "Cloudflare", 16_088_064),
            ("python", "https://status.python.org/history.atom", "Python", 3_564_200),
            ("twitter_api", "https://api.twitterstat.us/history.atom", "Twitter API", 1_942_002),
            ("statuspage", "https://metastatuspage.com/history.atom", "Statuspage", 1_729_015),
            ("zoom", "https://status.zoom.us/history.atom", "Zoom", 2_985_215),
            ("oracle_cloud", "https://ocistatus.oraclecloud.com/history.atom", "Oracle Cloud", 13_047_808),
        ];
        Self::new(
            seed.iter()
                .map(|(id, url, name, color)| ServiceEntry {
                    id: (*id).to_string(),
                    url: (*url).to_string(),
                    friendly_name: (*name).to_string(),
                    color: *color,
                    field_order: FieldOrder::NewestFirst,
                })
                .collect(),
        )
    }

    /// Apply file overrides on top of this catalog. Unknown ids need at least a url.
    pub fn with_overrides(self, overrides: Vec<ServiceOverride>) -> Self {
        let mut entries = self.entries;
        for o in overrides {
            let id = normalize_id(&o.id);
            if let Some(e) = entries.iter_mut().find(|e| e.id == id) {
                if let Some(url) = o.url {
                    e.url = url;
                }
                if let Some(name) = o.friendly_name {
                    e.friendly_name = name;
                }
                if let Some(color) = o.color {
                    e.color = color;
                }
                if let Some(order) = o.field_order {
                    e.field_order = order;
                }
                continue;
            }
            let Some(url) = o.url else {
                tracing::warn!(service = %id, "catalog override without url ignored");
                continue;
            };
            entries.push(ServiceEntry {
                friendly_name: o.friendly_name.unwrap_or_else(|| id.clone()),
                id,
                url,
                color: o.color.unwrap_or(DEFAULT_COLOR),
                field_order: o.field_order.unwrap_or_default(),
            });
        }
        Self::new(entries)
    }

    pub fn get(&self, id: &str) -> Option<&ServiceEntry> {
        let id = normalize_id(id);
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceEntry> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FeedCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn normalize_id(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}
