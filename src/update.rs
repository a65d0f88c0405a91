// src/update.rs
//! Canonical status update record produced by the normalizer and consumed by
//! the change detector and notifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `{name, value}` section of an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateField {
    pub name: String,
    pub value: String,
}

impl UpdateField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Order convention of `FeedUpdate::fields` for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedUpdate {
    pub service_id: String,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub fields: Vec<UpdateField>,
    #[serde(default)]
    pub order: FieldOrder,
    pub color: u32,
    pub friendly_name: String,
}

impl FeedUpdate {
    /// Fields oldest to newest, whatever the service convention is.
    pub fn chronological_fields(&self) -> Vec<&UpdateField> {
        match self.order {
            FieldOrder::OldestFirst => self.fields.iter().collect(),
            FieldOrder::NewestFirst => self.fields.iter().rev().collect(),
        }
    }

    /// Same substance as `other`: compares the field sequence only.
    pub fn same_fields(&self, other: &[UpdateField]) -> bool {
        self.fields.as_slice() == other
    }
}

// Timestamp and rendering hints never count towards equality, otherwise a feed
// that only refreshes its timestamp would be re-sent every cycle.
impl PartialEq for FeedUpdate {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for FeedUpdate {}
