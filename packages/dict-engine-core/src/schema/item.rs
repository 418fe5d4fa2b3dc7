//! Data records of a dictionary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field id to value map of a record (service fields excluded).
pub type ItemData = BTreeMap<String, Value>;

/// Snapshot of an item before an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Version the snapshot was taken at
    pub version: i64,
    /// Update timestamp of the snapshot
    pub updated: DateTime<Utc>,
    /// Field values at that version
    pub data: ItemData,
}

/// One data record conforming to a dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictItem {
    pub id: String,
    pub data: ItemData,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Optimistic-lock version, starts at 1
    pub version: i64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_reason: Option<String>,
}

impl DictItem {
    /// Creates a fresh item at version 1 with a random id.
    pub fn new(data: ItemData) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), data)
    }

    /// Creates a fresh item at version 1 with the given id.
    pub fn with_id(id: impl Into<String>, data: ItemData) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            data,
            history: Vec::new(),
            version: 1,
            created: now,
            updated: now,
            deleted: None,
            deletion_reason: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn get(&self, field_id: &str) -> Option<&Value> {
        self.data.get(field_id)
    }

    /// Returns the field ids whose value differs between `self.data` and `new_data`.
    ///
    /// A key missing on one side counts as `null`.
    pub fn changed_fields(&self, new_data: &ItemData) -> Vec<String> {
        let mut keys: Vec<&String> = self.data.keys().chain(new_data.keys()).collect();
        keys.sort();
        keys.dedup();
        keys.into_iter()
            .filter(|key| {
                let old = self.data.get(*key).unwrap_or(&Value::Null);
                let new = new_data.get(*key).unwrap_or(&Value::Null);
                old != new
            })
            .cloned()
            .collect()
    }

    /// Applies an update: snapshots the prior state into history,
    /// replaces the data and bumps the version.
    pub fn apply_update(&mut self, new_data: ItemData, now: DateTime<Utc>) {
        let snapshot = HistoryEntry {
            version: self.version,
            updated: self.updated,
            data: std::mem::replace(&mut self.data, new_data),
        };
        self.history.push(snapshot);
        self.version += 1;
        self.updated = now;
    }

    /// Marks the item soft-deleted.
    pub fn mark_deleted(&mut self, reason: Option<String>, now: DateTime<Utc>) {
        self.deleted = Some(now);
        self.deletion_reason = reason;
        self.updated = now;
    }
}
