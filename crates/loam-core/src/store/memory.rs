//! In-memory adapters, used by tests and by embedders without a database.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::models::{EntityKind, RecordKey, SyncRecord};

use super::{CursorStore, LocalStore, RemoteStore};

type Table = BTreeMap<RecordKey, SyncRecord>;

/// Prefix of provisional client keys a backend may replace on first upload.
pub const LOCAL_KEY_PREFIX: &str = "local-";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Local store backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    tables: Mutex<HashMap<EntityKind, Table>>,
    purged: Mutex<HashMap<EntityKind, HashSet<RecordKey>>>,
}

impl MemoryLocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed rows without going through the async API.
    #[must_use]
    pub fn with_records(self, entity: EntityKind, records: impl IntoIterator<Item = SyncRecord>) -> Self {
        {
            let mut tables = lock(&self.tables);
            let table = tables.entry(entity).or_default();
            for record in records {
                table.insert(record.key.clone(), record);
            }
        }
        self
    }

    /// Snapshot of a table, ordered by key.
    pub fn records(&self, entity: EntityKind) -> Vec<SyncRecord> {
        lock(&self.tables)
            .get(&entity)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl LocalStore for MemoryLocalStore {
    async fn get_all(&self, entity: EntityKind) -> Result<Vec<SyncRecord>> {
        Ok(self.records(entity))
    }

    async fn get(&self, entity: EntityKind, key: &RecordKey) -> Result<Option<SyncRecord>> {
        Ok(lock(&self.tables)
            .get(&entity)
            .and_then(|table| table.get(key))
            .cloned())
    }

    async fn put(&self, entity: EntityKind, record: &SyncRecord) -> Result<()> {
        lock(&self.tables)
            .entry(entity)
            .or_default()
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn bulk_put(&self, entity: EntityKind, records: &[SyncRecord]) -> Result<()> {
        let mut tables = lock(&self.tables);
        let table = tables.entry(entity).or_default();
        for record in records {
            table.insert(record.key.clone(), record.clone());
        }
        Ok(())
    }

    async fn bulk_insert(&self, entity: EntityKind, records: &[SyncRecord]) -> Result<()> {
        let mut tables = lock(&self.tables);
        let table = tables.entry(entity).or_default();
        let mut seen = HashSet::new();
        for record in records {
            if table.contains_key(&record.key) || !seen.insert(&record.key) {
                return Err(Error::Database(format!(
                    "duplicate key {} in {}",
                    record.key, entity
                )));
            }
        }
        for record in records {
            table.insert(record.key.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete_by_keys(&self, entity: EntityKind, keys: &[RecordKey]) -> Result<()> {
        if let Some(table) = lock(&self.tables).get_mut(&entity) {
            for key in keys {
                table.remove(key);
            }
        }
        Ok(())
    }

    async fn mark_purged(&self, entity: EntityKind, keys: &[RecordKey]) -> Result<()> {
        lock(&self.purged)
            .entry(entity)
            .or_default()
            .extend(keys.iter().cloned());
        Ok(())
    }

    async fn purged_keys(&self, entity: EntityKind) -> Result<HashSet<RecordKey>> {
        Ok(lock(&self.purged).get(&entity).cloned().unwrap_or_default())
    }
}

/// Cursor store that forgets everything on drop.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<EntityKind, Timestamp>>,
    writes: Mutex<Vec<(EntityKind, Timestamp)>>,
}

impl MemoryCursorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every cursor write in order, for inspecting incremental advancement.
    pub fn history(&self) -> Vec<(EntityKind, Timestamp)> {
        lock(&self.writes).clone()
    }
}

impl CursorStore for MemoryCursorStore {
    async fn load_cursor(&self, entity: EntityKind) -> Result<Option<Timestamp>> {
        Ok(lock(&self.cursors).get(&entity).copied())
    }

    async fn save_cursor(&self, entity: EntityKind, cursor: Timestamp) -> Result<()> {
        lock(&self.cursors).insert(entity, cursor);
        lock(&self.writes).push((entity, cursor));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    tables: HashMap<EntityKind, Table>,
    upload_log: Vec<RecordKey>,
    conflicts: usize,
    next_server_key: u64,
    offline: bool,
    fail_deletes: bool,
    rejected: HashSet<RecordKey>,
}

/// Remote collection held in memory, with last-write-wins upserts.
///
/// Fault switches (`set_offline`, `reject_key`, `set_fail_deletes`) let callers
/// exercise the engine's failure paths without a network.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    state: Mutex<RemoteState>,
    assign_server_keys: bool,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `upsert_one` of an unknown `local-` key stores it under a new `srv-N` key.
    #[must_use]
    pub fn with_server_keys(mut self) -> Self {
        self.assign_server_keys = true;
        self
    }

    #[must_use]
    pub fn with_records(self, entity: EntityKind, records: impl IntoIterator<Item = SyncRecord>) -> Self {
        {
            let mut state = lock(&self.state);
            let table = state.tables.entry(entity).or_default();
            for record in records {
                table.insert(record.key.clone(), record);
            }
        }
        self
    }

    pub fn records(&self, entity: EntityKind) -> Vec<SyncRecord> {
        lock(&self.state)
            .tables
            .get(&entity)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, entity: EntityKind, key: &str) -> Option<SyncRecord> {
        lock(&self.state)
            .tables
            .get(&entity)
            .and_then(|table| table.get(key))
            .cloned()
    }

    /// Keys in the order they were accepted by `upsert`/`upsert_one`.
    pub fn upload_log(&self) -> Vec<RecordKey> {
        lock(&self.state).upload_log.clone()
    }

    /// Number of incoming versions ignored because a newer one was stored.
    pub fn conflicts(&self) -> usize {
        lock(&self.state).conflicts
    }

    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        lock(&self.state).fail_deletes = fail;
    }

    pub fn reject_key(&self, key: impl Into<RecordKey>) {
        lock(&self.state).rejected.insert(key.into());
    }

    pub fn clear_rejections(&self) {
        lock(&self.state).rejected.clear();
    }

    fn check_online(state: &RemoteState) -> Result<()> {
        if state.offline {
            Err(Error::Remote("backend unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn store_lww(state: &mut RemoteState, entity: EntityKind, record: SyncRecord) {
        let table = state.tables.entry(entity).or_default();
        match table.get(&record.key) {
            Some(existing) if existing.updated_at > record.updated_at => {
                state.conflicts += 1;
            }
            _ => {
                state.upload_log.push(record.key.clone());
                table.insert(record.key.clone(), record);
            }
        }
    }
}

impl RemoteStore for MemoryRemoteStore {
    async fn fetch_changed_since(
        &self,
        entity: EntityKind,
        since: Option<Timestamp>,
    ) -> Result<Vec<SyncRecord>> {
        let state = lock(&self.state);
        Self::check_online(&state)?;
        Ok(state
            .tables
            .get(&entity)
            .map(|table| {
                table
                    .values()
                    .filter(|record| since.map_or(true, |since| record.updated_at >= since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert(&self, entity: EntityKind, records: &[SyncRecord]) -> Result<bool> {
        let mut state = lock(&self.state);
        Self::check_online(&state)?;
        if records.iter().any(|record| state.rejected.contains(&record.key)) {
            return Ok(false);
        }
        for record in records {
            Self::store_lww(&mut state, entity, record.clone());
        }
        Ok(true)
    }

    async fn upsert_one(&self, entity: EntityKind, record: &SyncRecord) -> Result<SyncRecord> {
        let mut state = lock(&self.state);
        Self::check_online(&state)?;
        if state.rejected.contains(&record.key) {
            return Err(Error::Remote(format!("record {} rejected", record.key)));
        }

        let known = state
            .tables
            .get(&entity)
            .is_some_and(|table| table.contains_key(&record.key));
        let mut stored = record.clone();
        if self.assign_server_keys && !known && record.key.as_str().starts_with(LOCAL_KEY_PREFIX) {
            state.next_server_key += 1;
            stored.key = RecordKey::new(format!("srv-{}", state.next_server_key));
        }

        Self::store_lww(&mut state, entity, stored.clone());
        Ok(state
            .tables
            .get(&entity)
            .and_then(|table| table.get(&stored.key))
            .cloned()
            .unwrap_or(stored))
    }

    async fn delete(&self, entity: EntityKind, keys: &[RecordKey]) -> Result<bool> {
        let mut state = lock(&self.state);
        Self::check_online(&state)?;
        if state.fail_deletes {
            return Ok(false);
        }
        if let Some(table) = state.tables.get_mut(&entity) {
            for key in keys {
                table.remove(key);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, millis: i64) -> SyncRecord {
        SyncRecord::new(key, Timestamp::from_millis(millis))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bulk_insert_is_all_or_nothing() {
        let store = MemoryLocalStore::new().with_records(EntityKind::Note, [record("A", 1)]);

        let result = store
            .bulk_insert(EntityKind::Note, &[record("B", 2), record("A", 3)])
            .await;
        assert!(result.is_err());
        assert!(store.get(EntityKind::Note, &"B".into()).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn changed_since_is_inclusive() {
        let store = MemoryLocalStore::new()
            .with_records(EntityKind::Note, [record("A", 1), record("B", 5), record("C", 9)]);

        let changed = store
            .get_changed_since(EntityKind::Note, Some(Timestamp::from_millis(5)))
            .await
            .unwrap();
        let keys: Vec<_> = changed.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["B", "C"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_upsert_keeps_newer_version() {
        let remote = MemoryRemoteStore::new().with_records(EntityKind::Note, [record("A", 10)]);

        assert!(remote.upsert(EntityKind::Note, &[record("A", 5)]).await.unwrap());
        assert_eq!(
            remote.get(EntityKind::Note, "A").unwrap().updated_at,
            Timestamp::from_millis(10)
        );
        assert_eq!(remote.conflicts(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_assigns_server_keys_to_new_records() {
        let remote = MemoryRemoteStore::new().with_server_keys();
        let stored = remote
            .upsert_one(EntityKind::Note, &record("local-1", 1))
            .await
            .unwrap();
        assert_eq!(stored.key.as_str(), "srv-1");

        let again = remote.upsert_one(EntityKind::Note, &stored).await.unwrap();
        assert_eq!(again.key.as_str(), "srv-1");

        let client_keyed = remote
            .upsert_one(EntityKind::Note, &record("0190-abc", 2))
            .await
            .unwrap();
        assert_eq!(client_keyed.key.as_str(), "0190-abc");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_remote_errors() {
        let remote = MemoryRemoteStore::new();
        remote.set_offline(true);
        assert!(remote.fetch_changed_since(EntityKind::Note, None).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cursor_store_records_history() {
        let cursors = MemoryCursorStore::new();
        cursors
            .save_cursor(EntityKind::File, Timestamp::from_millis(3))
            .await
            .unwrap();
        assert_eq!(
            cursors.load_cursor(EntityKind::File).await.unwrap(),
            Some(Timestamp::from_millis(3))
        );
        assert_eq!(cursors.history().len(), 1);
    }
}
