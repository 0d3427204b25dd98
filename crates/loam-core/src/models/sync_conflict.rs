//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::{EntityKind, RecordKey};
use crate::clock::Timestamp;

/// Write rejected by the local last-write-wins guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    pub entity: EntityKind,
    pub record_key: RecordKey,
    /// Stored row's timestamp when the conflict occurred
    pub local_updated_at: Timestamp,
    /// Incoming row's timestamp that was rejected
    pub incoming_updated_at: Timestamp,
    pub resolved_at: Timestamp,
    /// Resolution strategy name
    pub strategy: String,
}
