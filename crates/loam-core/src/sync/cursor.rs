//! Per-record cursor watermark

use std::collections::BTreeMap;

use crate::clock::Timestamp;
use crate::error::Result;
use crate::models::{EntityKind, RecordKey, SyncRecord};
use crate::store::CursorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Pending,
    Done,
    Failed,
}

/// Tracks which records of a pass have been fully applied and derives the
/// `lastSyncedAt` watermark from them.
///
/// The watermark only moves through the contiguous run of completed records
/// ordered by `updated_at`. A failed or unfinished record holds it back, so the
/// next inclusive `changed since` query fetches that record again. The
/// persisted value never decreases.
#[derive(Debug)]
pub struct CursorTracker {
    entity: EntityKind,
    stored: Option<Timestamp>,
    progress: BTreeMap<(Timestamp, RecordKey), Progress>,
}

impl CursorTracker {
    pub fn new<'a>(
        entity: EntityKind,
        stored: Option<Timestamp>,
        records: impl IntoIterator<Item = &'a SyncRecord>,
    ) -> Self {
        let progress = records
            .into_iter()
            .map(|record| ((record.updated_at, record.key.clone()), Progress::Pending))
            .collect();
        Self {
            entity,
            stored,
            progress,
        }
    }

    pub const fn entity(&self) -> EntityKind {
        self.entity
    }

    /// Last persisted (or initially loaded) cursor
    pub const fn stored(&self) -> Option<Timestamp> {
        self.stored
    }

    pub fn complete(&mut self, record: &SyncRecord) {
        self.mark(record, Progress::Done);
    }

    pub fn fail(&mut self, record: &SyncRecord) {
        self.mark(record, Progress::Failed);
    }

    pub fn complete_all<'a>(&mut self, records: impl IntoIterator<Item = &'a SyncRecord>) {
        for record in records {
            self.complete(record);
        }
    }

    pub fn fail_all<'a>(&mut self, records: impl IntoIterator<Item = &'a SyncRecord>) {
        for record in records {
            self.fail(record);
        }
    }

    fn mark(&mut self, record: &SyncRecord, status: Progress) {
        if let Some(entry) = self
            .progress
            .get_mut(&(record.updated_at, record.key.clone()))
        {
            // A failure is sticky for the rest of the pass
            if *entry != Progress::Failed {
                *entry = status;
            }
        }
    }

    /// Highest timestamp reachable through completed records only
    pub fn watermark(&self) -> Option<Timestamp> {
        let mut watermark = self.stored;
        for ((updated_at, _), status) in &self.progress {
            if *status != Progress::Done {
                break;
            }
            watermark = Some(watermark.map_or(*updated_at, |current| current.max(*updated_at)));
        }
        watermark
    }

    /// Persist the watermark if it moved past the stored cursor
    pub async fn persist<C: CursorStore>(&mut self, cursors: &C) -> Result<Option<Timestamp>> {
        let Some(candidate) = self.watermark() else {
            return Ok(None);
        };
        if self.stored.is_some_and(|stored| candidate <= stored) {
            return Ok(None);
        }

        cursors.save_cursor(self.entity, candidate).await?;
        tracing::debug!(entity = %self.entity, cursor = %candidate, "Advanced sync cursor");
        self.stored = Some(candidate);
        Ok(Some(candidate))
    }

    pub fn failed_count(&self) -> usize {
        self.progress
            .values()
            .filter(|status| **status == Progress::Failed)
            .count()
    }
}
