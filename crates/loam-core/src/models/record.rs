//! Syncable record model

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Timestamp;

/// Stable identity used to match local and remote copies of a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh time-sortable key (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for RecordKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Entity-agnostic row the sync engine reconciles.
///
/// `payload` is never interpreted by the engine; only `key`, `parent_key`,
/// `updated_at` and `is_deleted` drive sync decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub key: RecordKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<RecordKey>,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SyncRecord {
    #[must_use]
    pub fn new(key: impl Into<RecordKey>, updated_at: Timestamp) -> Self {
        Self {
            key: key.into(),
            parent_key: None,
            updated_at,
            is_deleted: false,
            payload: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_key: impl Into<RecordKey>) -> Self {
        self.parent_key = Some(parent_key.into());
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub const fn deleted(mut self) -> Self {
        self.is_deleted = true;
        self
    }

    /// Mark as a tombstone and bump `updated_at`.
    pub fn soft_delete(&mut self, now: Timestamp) {
        self.is_deleted = true;
        self.updated_at = now.max(self.updated_at);
    }
}
