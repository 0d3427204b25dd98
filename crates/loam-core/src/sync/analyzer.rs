//! Snapshot comparison.
//!
//! [`analyze`] is pure: it classifies every key seen on either side into at
//! most one operation group using last-write-wins on `updated_at`.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::clock::Timestamp;
use crate::models::{RecordKey, SyncRecord};

/// Classified work for one entity type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationSet {
    /// Remote records with no local row
    pub to_insert_local: Vec<SyncRecord>,
    /// Remote records strictly newer than the local row
    pub to_update_local: Vec<SyncRecord>,
    /// Local records missing remotely or strictly newer than the remote copy
    pub to_upload: Vec<SyncRecord>,
    /// Tombstones past the grace period, removed from both sides
    pub to_hard_delete: Vec<SyncRecord>,
}

impl OperationSet {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.to_insert_local.len()
            + self.to_update_local.len()
            + self.to_upload.len()
            + self.to_hard_delete.len()
    }

    /// Every record in the set, in group order
    pub fn records(&self) -> impl Iterator<Item = &SyncRecord> {
        self.to_insert_local
            .iter()
            .chain(&self.to_update_local)
            .chain(&self.to_upload)
            .chain(&self.to_hard_delete)
    }
}

/// Index a snapshot by key, keeping the newest version of duplicated keys
fn index(snapshot: &[SyncRecord]) -> HashMap<&str, &SyncRecord> {
    let mut map: HashMap<&str, &SyncRecord> = HashMap::with_capacity(snapshot.len());
    for record in snapshot {
        map.entry(record.key.as_str())
            .and_modify(|existing| {
                if record.updated_at > existing.updated_at {
                    *existing = record;
                }
            })
            .or_insert(record);
    }
    map
}

/// The version that survives a last-write-wins merge; a tombstone wins ties
fn winner<'a>(remote: Option<&'a SyncRecord>, local: Option<&'a SyncRecord>) -> Option<&'a SyncRecord> {
    match (remote, local) {
        (Some(remote), Some(local)) => {
            if remote.updated_at > local.updated_at
                || (remote.updated_at == local.updated_at && remote.is_deleted)
            {
                Some(remote)
            } else {
                Some(local)
            }
        }
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    }
}

/// Compare a remote and a local snapshot of the same entity type.
///
/// Equal timestamps are convergent and produce no operation. Soft deletes
/// travel as ordinary newer versions until `now - updated_at > grace_period`,
/// after which the key is hard-deleted on both sides and dropped from the
/// other groups.
pub fn analyze(
    remote: &[SyncRecord],
    local: &[SyncRecord],
    now: Timestamp,
    grace_period: Duration,
) -> OperationSet {
    let remote_by_key = index(remote);
    let local_by_key = index(local);

    let mut ops = OperationSet::default();
    let mut hard_deleted: HashSet<&str> = HashSet::new();

    // Walk remote keys first, then local-only keys, preserving input order
    let mut seen: HashSet<&str> = HashSet::new();
    let keys = remote
        .iter()
        .chain(local)
        .map(|record| record.key.as_str())
        .filter(|key| seen.insert(*key));

    for key in keys {
        let Some(winning) = winner(
            remote_by_key.get(key).copied(),
            local_by_key.get(key).copied(),
        ) else {
            continue;
        };
        if winning.is_deleted && winning.updated_at.is_older_than(grace_period, now) {
            hard_deleted.insert(key);
            ops.to_hard_delete.push(winning.clone());
        }
    }

    for remote_record in remote {
        let key = remote_record.key.as_str();
        if hard_deleted.contains(key) || !is_indexed(&remote_by_key, remote_record) {
            continue;
        }
        match local_by_key.get(key) {
            None => ops.to_insert_local.push(remote_record.clone()),
            Some(local_record) if remote_record.updated_at > local_record.updated_at => {
                ops.to_update_local.push(remote_record.clone());
            }
            Some(_) => {}
        }
    }

    for local_record in local {
        let key = local_record.key.as_str();
        if hard_deleted.contains(key) || !is_indexed(&local_by_key, local_record) {
            continue;
        }
        match remote_by_key.get(key) {
            None => ops.to_upload.push(local_record.clone()),
            Some(remote_record) if local_record.updated_at > remote_record.updated_at => {
                ops.to_upload.push(local_record.clone());
            }
            Some(_) => {}
        }
    }

    ops
}

/// Whether `record` is the version chosen for its key (skips stale duplicates)
fn is_indexed(map: &HashMap<&str, &SyncRecord>, record: &SyncRecord) -> bool {
    map.get(record.key.as_str())
        .is_some_and(|chosen| std::ptr::eq(*chosen, record))
}

/// Keys of a record slice, in order
pub fn keys_of(records: &[SyncRecord]) -> Vec<RecordKey> {
    records.iter().map(|record| record.key.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DAY_MS: i64 = 86_400_000;
    const GRACE: Duration = Duration::from_secs(30 * 86_400);

    fn at(date: &str) -> Timestamp {
        Timestamp::parse(date).unwrap()
    }

    fn record(key: &str, updated_at: Timestamp) -> SyncRecord {
        SyncRecord::new(key, updated_at)
    }

    fn keys(records: &[SyncRecord]) -> Vec<&str> {
        records.iter().map(|record| record.key.as_str()).collect()
    }

    #[test]
    fn newer_local_is_uploaded() {
        let local = vec![record("A", at("2024-01-02"))];
        let remote = vec![record("A", at("2024-01-01"))];

        let ops = analyze(&remote, &local, at("2024-01-03"), GRACE);
        assert_eq!(keys(&ops.to_upload), vec!["A"]);
        assert!(ops.to_update_local.is_empty());
        assert!(ops.to_insert_local.is_empty());
    }

    #[test]
    fn remote_only_record_is_inserted_locally() {
        let remote = vec![record("B", at("2024-01-01"))];

        let ops = analyze(&remote, &[], at("2024-01-03"), GRACE);
        assert_eq!(keys(&ops.to_insert_local), vec!["B"]);
        assert!(ops.to_upload.is_empty());
    }

    #[test]
    fn equal_timestamps_are_a_no_op() {
        let local = vec![record("C", at("2024-01-01")).with_payload(serde_json::json!("mine"))];
        let remote = vec![record("C", at("2024-01-01")).with_payload(serde_json::json!("theirs"))];

        let ops = analyze(&remote, &local, at("2024-01-03"), GRACE);
        assert!(ops.is_empty());
    }

    #[test]
    fn newer_remote_updates_local() {
        let local = vec![record("D", at("2024-01-01"))];
        let remote = vec![record("D", at("2024-01-05"))];

        let ops = analyze(&remote, &local, at("2024-01-06"), GRACE);
        assert_eq!(keys(&ops.to_update_local), vec!["D"]);
        assert!(ops.to_upload.is_empty());
    }

    #[test]
    fn local_only_record_is_uploaded() {
        let local = vec![record("E", at("2024-01-01"))];

        let ops = analyze(&[], &local, at("2024-01-02"), GRACE);
        assert_eq!(keys(&ops.to_upload), vec!["E"]);
    }

    #[test]
    fn fresh_tombstone_propagates_as_update() {
        let now = at("2024-03-01");
        let tombstone = record("F", Timestamp::from_millis(now.as_millis() - DAY_MS)).deleted();
        let remote = vec![record("F", at("2024-01-01"))];

        let ops = analyze(&remote, &[tombstone], now, GRACE);
        assert_eq!(keys(&ops.to_upload), vec!["F"]);
        assert!(ops.to_upload[0].is_deleted);
        assert!(ops.to_hard_delete.is_empty());
    }

    #[test]
    fn grace_period_boundary() {
        let now = Timestamp::from_millis(100 * DAY_MS);
        let grace_ms = 30 * DAY_MS;
        let expired = record("old", Timestamp::from_millis(now.as_millis() - grace_ms - 1)).deleted();
        let pending = record("new", Timestamp::from_millis(now.as_millis() - grace_ms + 1)).deleted();

        let ops = analyze(&[], &[expired, pending], now, GRACE);
        assert_eq!(keys(&ops.to_hard_delete), vec!["old"]);
        assert_eq!(keys(&ops.to_upload), vec!["new"]);
        assert!(ops.to_upload[0].is_deleted);
    }

    #[test]
    fn expired_remote_tombstone_is_hard_deleted_not_inserted() {
        let now = Timestamp::from_millis(100 * DAY_MS);
        let remote = vec![record("R", Timestamp::from_millis(DAY_MS)).deleted()];
        let local = vec![record("R", Timestamp::from_millis(DAY_MS / 2))];

        let ops = analyze(&remote, &local, now, GRACE);
        assert_eq!(keys(&ops.to_hard_delete), vec!["R"]);
        assert!(ops.to_update_local.is_empty());
        assert!(ops.to_insert_local.is_empty());
    }

    #[test]
    fn newer_live_version_beats_expired_tombstone() {
        let now = Timestamp::from_millis(100 * DAY_MS);
        let local = vec![record("G", Timestamp::from_millis(DAY_MS)).deleted()];
        let remote = vec![record("G", Timestamp::from_millis(90 * DAY_MS))];

        let ops = analyze(&remote, &local, now, GRACE);
        assert!(ops.to_hard_delete.is_empty());
        assert_eq!(keys(&ops.to_update_local), vec!["G"]);
    }

    #[test]
    fn each_key_lands_in_at_most_one_group() {
        let now = at("2024-06-01");
        let remote = vec![
            record("a", at("2024-05-01")),
            record("b", at("2024-05-03")),
            record("c", at("2024-05-01")),
            record("d", at("2024-01-01")).deleted(),
        ];
        let local = vec![
            record("b", at("2024-05-02")),
            record("c", at("2024-05-04")),
            record("e", at("2024-05-05")),
            record("d", at("2024-01-01")).deleted(),
        ];

        let ops = analyze(&remote, &local, now, GRACE);
        let mut all: Vec<_> = ops.records().map(|record| record.key.as_str()).collect();
        all.sort_unstable();
        assert_eq!(all, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(keys(&ops.to_insert_local), vec!["a"]);
        assert_eq!(keys(&ops.to_update_local), vec!["b"]);
        assert_eq!(keys(&ops.to_upload), vec!["c", "e"]);
        assert_eq!(keys(&ops.to_hard_delete), vec!["d"]);
    }

    #[test]
    fn duplicate_keys_keep_newest_version() {
        let remote = vec![record("A", at("2024-01-01")), record("A", at("2024-01-03"))];
        let local = vec![record("A", at("2024-01-02"))];

        let ops = analyze(&remote, &local, at("2024-01-04"), GRACE);
        assert_eq!(ops.to_update_local.len(), 1);
        assert_eq!(ops.to_update_local[0].updated_at, at("2024-01-03"));
        assert!(ops.to_upload.is_empty());
    }

    #[test]
    fn dangling_parent_is_classified_normally() {
        let local = vec![record("child", at("2024-01-01")).with_parent("ghost")];

        let ops = analyze(&[], &local, at("2024-01-02"), GRACE);
        assert_eq!(keys(&ops.to_upload), vec!["child"]);
    }
}
