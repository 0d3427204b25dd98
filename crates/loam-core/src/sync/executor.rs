//! Applies an [`OperationSet`] to the local and remote stores.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::models::{EntityKind, RecordKey, SyncRecord};
use crate::store::{CursorStore, LocalStore, RemoteStore};

use super::analyzer::{keys_of, OperationSet};
use super::cursor::CursorTracker;
use super::hierarchy::sort_for_upload;
use super::{HierarchicalUploadMode, SyncConfig};

/// Outcome of applying one entity's operation set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub entity: Option<EntityKind>,
    pub inserted: usize,
    pub updated: usize,
    pub uploaded: usize,
    pub deleted: usize,
    /// Records whose local or remote step failed; retried next pass
    pub failed: usize,
    /// Provisional keys replaced by server-assigned ones (`old -> new`)
    pub remapped: BTreeMap<RecordKey, RecordKey>,
    /// Cursor after this entity finished
    pub cursor: Option<Timestamp>,
}

impl ExecutionReport {
    pub const fn downloaded(&self) -> usize {
        self.inserted + self.updated
    }
}

pub struct SyncExecutor<'a, L, R, C> {
    local: &'a L,
    remote: &'a R,
    cursors: &'a C,
    config: &'a SyncConfig,
}

impl<'a, L, R, C> SyncExecutor<'a, L, R, C>
where
    L: LocalStore,
    R: RemoteStore,
    C: CursorStore,
{
    pub const fn new(local: &'a L, remote: &'a R, cursors: &'a C, config: &'a SyncConfig) -> Self {
        Self {
            local,
            remote,
            cursors,
            config,
        }
    }

    /// Apply local writes, then uploads, then hard deletes.
    ///
    /// Bulk groups log failures and carry on. The sequential hierarchical
    /// upload path stops at the first rejected record and returns
    /// [`Error::UploadAborted`]; the cursor has already been persisted for
    /// everything completed before it.
    pub async fn execute(
        &self,
        entity: EntityKind,
        ops: OperationSet,
        tracker: &mut CursorTracker,
    ) -> Result<ExecutionReport> {
        let mut report = ExecutionReport {
            entity: Some(entity),
            cursor: tracker.stored(),
            ..ExecutionReport::default()
        };

        let OperationSet {
            to_insert_local,
            to_update_local,
            to_upload,
            to_hard_delete,
        } = ops;

        if !to_insert_local.is_empty() {
            match self.local.bulk_insert(entity, &to_insert_local).await {
                Ok(()) => {
                    tracker.complete_all(&to_insert_local);
                    report.inserted = to_insert_local.len();
                }
                Err(error) => {
                    tracing::warn!(entity = %entity, count = to_insert_local.len(), "Local insert failed: {error}");
                    tracker.fail_all(&to_insert_local);
                }
            }
            tracker.persist(self.cursors).await?;
        }

        if !to_update_local.is_empty() {
            match self.local.bulk_put(entity, &to_update_local).await {
                Ok(()) => {
                    tracker.complete_all(&to_update_local);
                    report.updated = to_update_local.len();
                }
                Err(error) => {
                    tracing::warn!(entity = %entity, count = to_update_local.len(), "Local update failed: {error}");
                    tracker.fail_all(&to_update_local);
                }
            }
            tracker.persist(self.cursors).await?;
        }

        if !to_upload.is_empty() {
            let ordered = sort_for_upload(to_upload);
            let sequential = entity.is_hierarchical()
                && self.config.hierarchical_upload == HierarchicalUploadMode::Sequential;
            let outcome = if sequential {
                self.upload_sequential(entity, ordered, tracker, &mut report)
                    .await
            } else {
                self.upload_bulk(entity, &ordered, tracker, &mut report)
                    .await
            };
            if let Err(error) = outcome {
                report.failed = tracker.failed_count();
                return Err(error);
            }
        }

        if !to_hard_delete.is_empty() {
            self.hard_delete(entity, &to_hard_delete, &mut report).await;
            tracker.complete_all(&to_hard_delete);
            tracker.persist(self.cursors).await?;
        }

        tracker.persist(self.cursors).await?;
        report.failed = tracker.failed_count();
        report.cursor = tracker.stored();
        Ok(report)
    }

    async fn upload_bulk(
        &self,
        entity: EntityKind,
        records: &[SyncRecord],
        tracker: &mut CursorTracker,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        for chunk in records.chunks(self.config.upload_batch_size.max(1)) {
            match self.remote.upsert(entity, chunk).await {
                Ok(true) => {
                    tracker.complete_all(chunk);
                    report.uploaded += chunk.len();
                }
                Ok(false) => {
                    tracing::warn!(entity = %entity, count = chunk.len(), "Remote rejected upload batch");
                    tracker.fail_all(chunk);
                }
                Err(error) => {
                    tracing::warn!(entity = %entity, count = chunk.len(), "Upload batch failed: {error}");
                    tracker.fail_all(chunk);
                }
            }
            tracker.persist(self.cursors).await?;
        }
        Ok(())
    }

    async fn upload_sequential(
        &self,
        entity: EntityKind,
        records: Vec<SyncRecord>,
        tracker: &mut CursorTracker,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        for record in records {
            let mut outgoing = record.clone();
            if let Some(new_parent) = outgoing
                .parent_key
                .as_ref()
                .and_then(|parent| report.remapped.get(parent))
            {
                outgoing.parent_key = Some(new_parent.clone());
            }

            let stored = match self.remote.upsert_one(entity, &outgoing).await {
                Ok(stored) => stored,
                Err(error) => {
                    tracker.fail(&record);
                    tracing::error!(
                        entity = %entity,
                        key = %record.key,
                        "Sequential upload aborted: {error}"
                    );
                    return Err(Error::UploadAborted {
                        key: record.key.to_string(),
                        reason: error.to_string(),
                    });
                }
            };

            if stored.key != record.key {
                tracing::info!(
                    entity = %entity,
                    old = %record.key,
                    new = %stored.key,
                    "Backend assigned a new key"
                );
                self.replace_key(entity, &record.key, &stored).await?;
                report
                    .remapped
                    .insert(record.key.clone(), stored.key.clone());
            } else if stored.parent_key != record.parent_key {
                self.local.put(entity, &stored).await?;
            }

            tracker.complete(&record);
            report.uploaded += 1;
            tracker.persist(self.cursors).await?;
        }
        Ok(())
    }

    /// Move a local row to its server-assigned key and repoint its children
    async fn replace_key(&self, entity: EntityKind, old: &RecordKey, stored: &SyncRecord) -> Result<()> {
        self.local.put(entity, stored).await?;
        self.local.delete(entity, old).await?;

        let remap = BTreeMap::from([(old.clone(), stored.key.clone())]);
        rewrite_parent_keys(self.local, entity, &remap).await?;
        Ok(())
    }

    /// Remote first, then local regardless of the remote outcome
    async fn hard_delete(&self, entity: EntityKind, records: &[SyncRecord], report: &mut ExecutionReport) {
        let keys = keys_of(records);

        match self.remote.delete(entity, &keys).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(entity = %entity, count = keys.len(), "Remote refused hard delete");
            }
            Err(error) => {
                tracing::warn!(entity = %entity, count = keys.len(), "Remote hard delete failed: {error}");
            }
        }

        match self.local.delete_by_keys(entity, &keys).await {
            Ok(()) => report.deleted = keys.len(),
            Err(error) => {
                tracing::warn!(entity = %entity, count = keys.len(), "Local hard delete failed: {error}");
            }
        }

        if let Err(error) = self.local.mark_purged(entity, &keys).await {
            tracing::warn!(entity = %entity, "Failed to record purged keys: {error}");
        }
    }
}

/// Point local rows whose parent was remapped at the new key.
///
/// `updated_at` is left untouched: the rows are otherwise unchanged.
pub async fn rewrite_parent_keys<L: LocalStore>(
    local: &L,
    entity: EntityKind,
    remap: &BTreeMap<RecordKey, RecordKey>,
) -> Result<usize> {
    if remap.is_empty() {
        return Ok(0);
    }

    let rewritten: Vec<SyncRecord> = local
        .get_all(entity)
        .await?
        .into_iter()
        .filter_map(|mut record| {
            let new_parent = remap.get(record.parent_key.as_ref()?)?.clone();
            record.parent_key = Some(new_parent);
            Some(record)
        })
        .collect();

    if !rewritten.is_empty() {
        local.bulk_put(entity, &rewritten).await?;
        tracing::debug!(entity = %entity, count = rewritten.len(), "Rewrote parent keys");
    }
    Ok(rewritten.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryCursorStore, MemoryLocalStore, MemoryRemoteStore};
    use pretty_assertions::assert_eq;

    fn record(key: &str, millis: i64) -> SyncRecord {
        SyncRecord::new(key, Timestamp::from_millis(millis))
    }

    struct Harness {
        local: MemoryLocalStore,
        remote: MemoryRemoteStore,
        cursors: MemoryCursorStore,
        config: SyncConfig,
    }

    impl Harness {
        fn new(local: MemoryLocalStore, remote: MemoryRemoteStore) -> Self {
            Self {
                local,
                remote,
                cursors: MemoryCursorStore::new(),
                config: SyncConfig::default(),
            }
        }

        async fn run(&self, entity: EntityKind, ops: OperationSet) -> (Result<ExecutionReport>, CursorTracker) {
            let mut tracker = CursorTracker::new(entity, None, ops.records());
            let executor = SyncExecutor::new(&self.local, &self.remote, &self.cursors, &self.config);
            let result = executor.execute(entity, ops, &mut tracker).await;
            (result, tracker)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn applies_every_group() {
        let harness = Harness::new(
            MemoryLocalStore::new().with_records(
                EntityKind::File,
                [record("upd", 1), record("up", 9), record("gone", 1).deleted()],
            ),
            MemoryRemoteStore::new()
                .with_records(EntityKind::File, [record("gone", 1).deleted()]),
        );
        let ops = OperationSet {
            to_insert_local: vec![record("ins", 2)],
            to_update_local: vec![record("upd", 3)],
            to_upload: vec![record("up", 9)],
            to_hard_delete: vec![record("gone", 1).deleted()],
        };

        let (report, _) = harness.run(EntityKind::File, ops).await;
        let report = report.unwrap();
        assert_eq!(
            (report.inserted, report.updated, report.uploaded, report.deleted, report.failed),
            (1, 1, 1, 1, 0)
        );
        assert_eq!(report.cursor, Some(Timestamp::from_millis(9)));
        assert!(harness.remote.get(EntityKind::File, "up").is_some());
        assert!(harness.remote.get(EntityKind::File, "gone").is_none());
        assert!(harness.local.get(EntityKind::File, &"gone".into()).await.unwrap().is_none());
        assert!(harness.local.purged_keys(EntityKind::File).await.unwrap().contains("gone"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_bulk_batch_is_logged_and_skipped() {
        let mut harness = Harness::new(MemoryLocalStore::new(), MemoryRemoteStore::new());
        harness.config.upload_batch_size = 1;
        harness.remote.reject_key("bad");

        let ops = OperationSet {
            to_upload: vec![record("ok-1", 10), record("bad", 20), record("ok-2", 30)],
            ..OperationSet::default()
        };

        let (report, tracker) = harness.run(EntityKind::File, ops).await;
        let report = report.unwrap();
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(tracker.stored(), Some(Timestamp::from_millis(10)));
        assert!(harness.remote.get(EntityKind::File, "ok-2").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sequential_upload_aborts_on_first_error() {
        let harness = Harness::new(MemoryLocalStore::new(), MemoryRemoteStore::new());
        harness.remote.reject_key("folder");

        let ops = OperationSet {
            to_upload: vec![
                record("child", 20).with_parent("folder"),
                record("folder", 10),
                record("sibling", 30),
            ],
            ..OperationSet::default()
        };

        let (result, tracker) = harness.run(EntityKind::Note, ops).await;
        assert!(matches!(result, Err(Error::UploadAborted { ref key, .. }) if key == "folder"));
        assert!(harness.remote.upload_log().is_empty());
        assert_eq!(tracker.stored(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sequential_upload_follows_server_keys() {
        let folder = record("local-folder", 10);
        let child = record("note-1", 20).with_parent("local-folder");
        let harness = Harness::new(
            MemoryLocalStore::new().with_records(EntityKind::Note, [folder.clone(), child.clone()]),
            MemoryRemoteStore::new().with_server_keys(),
        );

        let ops = OperationSet {
            to_upload: vec![child, folder],
            ..OperationSet::default()
        };
        let (report, _) = harness.run(EntityKind::Note, ops).await;
        let report = report.unwrap();

        assert_eq!(report.uploaded, 2);
        assert_eq!(
            report.remapped.get("local-folder").map(RecordKey::as_str),
            Some("srv-1")
        );

        let remote_child = harness.remote.get(EntityKind::Note, "note-1").unwrap();
        assert_eq!(remote_child.parent_key.unwrap().as_str(), "srv-1");

        let local_keys: Vec<_> = harness
            .local
            .records(EntityKind::Note)
            .into_iter()
            .map(|record| (record.key.into_inner(), record.parent_key.map(RecordKey::into_inner)))
            .collect();
        assert_eq!(
            local_keys,
            vec![
                ("note-1".to_string(), Some("srv-1".to_string())),
                ("srv-1".to_string(), None),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hard_delete_proceeds_locally_when_remote_refuses() {
        let harness = Harness::new(
            MemoryLocalStore::new().with_records(EntityKind::Note, [record("old", 1).deleted()]),
            MemoryRemoteStore::new().with_records(EntityKind::Note, [record("old", 1).deleted()]),
        );
        harness.remote.set_fail_deletes(true);

        let ops = OperationSet {
            to_hard_delete: vec![record("old", 1).deleted()],
            ..OperationSet::default()
        };
        let (report, _) = harness.run(EntityKind::Note, ops).await;

        assert_eq!(report.unwrap().deleted, 1);
        assert!(harness.local.records(EntityKind::Note).is_empty());
        assert!(harness.remote.get(EntityKind::Note, "old").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_local_insert_holds_cursor() {
        let harness = Harness::new(
            MemoryLocalStore::new().with_records(EntityKind::File, [record("dup", 1)]),
            MemoryRemoteStore::new(),
        );
        let ops = OperationSet {
            to_insert_local: vec![record("dup", 5)],
            to_upload: vec![record("later", 50)],
            ..OperationSet::default()
        };

        let (report, tracker) = harness.run(EntityKind::File, ops).await;
        let report = report.unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(tracker.stored(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rewrite_parent_keys_touches_only_remapped_children() {
        let local = MemoryLocalStore::new().with_records(
            EntityKind::FileReference,
            [
                record("ref-1", 1).with_parent("local-a"),
                record("ref-2", 2).with_parent("kept"),
            ],
        );
        let remap = BTreeMap::from([(RecordKey::from("local-a"), RecordKey::from("srv-9"))]);

        let count = rewrite_parent_keys(&local, EntityKind::FileReference, &remap)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let rewritten = local
            .get(EntityKind::FileReference, &"ref-1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rewritten.parent_key.unwrap().as_str(), "srv-9");
        assert_eq!(rewritten.updated_at, Timestamp::from_millis(1));
    }
}
