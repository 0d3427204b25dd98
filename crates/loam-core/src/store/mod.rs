//! Storage contracts the sync engine runs against.
//!
//! [`LocalStore`] and [`CursorStore`] abstract the embedded database,
//! [`RemoteStore`] abstracts the cloud backend. Backends only supply adapters;
//! reconciliation lives in [`crate::sync`].

mod backend;
mod form;
mod memory;
mod rest;

use std::collections::HashSet;
use std::time::Duration;

use crate::clock::Timestamp;
use crate::error::Result;
use crate::models::{EntityKind, RecordKey, SyncRecord};

pub use backend::RemoteBackend;
pub use form::{FormAction, FormEnvelope, FormPostRemote};
pub use memory::{MemoryCursorStore, MemoryLocalStore, MemoryRemoteStore, LOCAL_KEY_PREFIX};
pub use rest::{KeysEnvelope, RecordsEnvelope, RestJsonRemote};

/// Embedded-database access over one table per entity.
#[allow(async_fn_in_trait)]
pub trait LocalStore {
    /// Every row, tombstones included
    async fn get_all(&self, entity: EntityKind) -> Result<Vec<SyncRecord>>;

    async fn get(&self, entity: EntityKind, key: &RecordKey) -> Result<Option<SyncRecord>>;

    /// Insert or replace one row
    async fn put(&self, entity: EntityKind, record: &SyncRecord) -> Result<()>;

    /// Insert or replace many rows atomically
    async fn bulk_put(&self, entity: EntityKind, records: &[SyncRecord]) -> Result<()>;

    /// Insert many new rows atomically; fails without writing if any key exists
    async fn bulk_insert(&self, entity: EntityKind, records: &[SyncRecord]) -> Result<()>;

    async fn delete(&self, entity: EntityKind, key: &RecordKey) -> Result<()> {
        self.delete_by_keys(entity, std::slice::from_ref(key)).await
    }

    async fn delete_by_keys(&self, entity: EntityKind, keys: &[RecordKey]) -> Result<()>;

    /// Rows with `updated_at >= since` (all rows when `since` is `None`)
    async fn get_changed_since(
        &self,
        entity: EntityKind,
        since: Option<Timestamp>,
    ) -> Result<Vec<SyncRecord>> {
        let records = self.get_all(entity).await?;
        Ok(match since {
            Some(since) => records
                .into_iter()
                .filter(|record| record.updated_at >= since)
                .collect(),
            None => records,
        })
    }

    /// Soft-deleted rows whose tombstone is older than `grace_period`
    async fn get_expired_tombstones(
        &self,
        entity: EntityKind,
        grace_period: Duration,
        now: Timestamp,
    ) -> Result<Vec<SyncRecord>> {
        let records = self.get_all(entity).await?;
        Ok(records
            .into_iter()
            .filter(|record| record.is_deleted && record.updated_at.is_older_than(grace_period, now))
            .collect())
    }

    /// Remember hard-deleted keys so they are never resurrected
    async fn mark_purged(&self, entity: EntityKind, keys: &[RecordKey]) -> Result<()>;

    async fn purged_keys(&self, entity: EntityKind) -> Result<HashSet<RecordKey>>;
}

/// Persisted per-entity `lastSyncedAt` watermark.
#[allow(async_fn_in_trait)]
pub trait CursorStore {
    async fn load_cursor(&self, entity: EntityKind) -> Result<Option<Timestamp>>;

    async fn save_cursor(&self, entity: EntityKind, cursor: Timestamp) -> Result<()>;
}

/// Cloud backend contract. Each call is expected to carry its own timeout.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Fail fast (before any I/O) when the adapter cannot possibly succeed
    fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    /// Records with `updated_at >= since` (everything when `since` is `None`)
    async fn fetch_changed_since(
        &self,
        entity: EntityKind,
        since: Option<Timestamp>,
    ) -> Result<Vec<SyncRecord>>;

    /// Idempotent upsert-by-key; `Ok(false)` when the backend rejected the batch
    async fn upsert(&self, entity: EntityKind, records: &[SyncRecord]) -> Result<bool>;

    /// Upsert a single record and return what the backend stored (its key may differ)
    async fn upsert_one(&self, entity: EntityKind, record: &SyncRecord) -> Result<SyncRecord>;

    /// `Ok(false)` when the backend refused the delete
    async fn delete(&self, entity: EntityKind, keys: &[RecordKey]) -> Result<bool>;
}
