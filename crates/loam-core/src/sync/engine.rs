//! Sync orchestrator.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::error::{Error, Result};
use crate::models::{EntityKind, RecordKey, SyncRecord};
use crate::store::{CursorStore, LocalStore, RemoteStore};

use super::analyzer::analyze;
use super::cursor::CursorTracker;
use super::events::{ListenerRegistry, Subscription};
use super::executor::{rewrite_parent_keys, ExecutionReport, SyncExecutor};
use super::SyncConfig;

/// Orchestrator state: `Idle -> Syncing -> Success | Failed -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Syncing,
    Success,
    Failed,
}

impl SyncPhase {
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Syncing)
                | (Self::Syncing, Self::Success | Self::Failed)
                | (Self::Success | Self::Failed, Self::Idle)
        )
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Failed,
}

/// Payload handed to "synced" listeners
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted: usize,
}

impl SyncSummary {
    fn from_reports(reports: &[ExecutionReport]) -> Self {
        reports.iter().fold(Self::default(), |total, report| Self {
            uploaded: total.uploaded + report.uploaded,
            downloaded: total.downloaded + report.downloaded(),
            deleted: total.deleted + report.deleted,
        })
    }

    pub const fn is_empty(&self) -> bool {
        self.uploaded == 0 && self.downloaded == 0 && self.deleted == 0
    }
}

/// Result of one pass, shared with every caller that awaited it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub summary: SyncSummary,
    /// Records left for the next pass after group-level failures
    pub failed: usize,
    pub entities: Vec<ExecutionReport>,
    pub error: Option<String>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.outcome == SyncOutcome::Success
    }

    fn interrupted(now: Timestamp) -> Self {
        Self {
            outcome: SyncOutcome::Failed,
            summary: SyncSummary::default(),
            failed: 0,
            entities: Vec::new(),
            error: Some("sync pass was interrupted before completing".to_string()),
            started_at: now,
            finished_at: now,
        }
    }
}

struct RunState {
    phase: SyncPhase,
    in_flight: Option<watch::Receiver<Option<SyncReport>>>,
    last_report: Option<SyncReport>,
}

enum Begin {
    Started(watch::Sender<Option<SyncReport>>),
    Joined(watch::Receiver<Option<SyncReport>>),
}

fn lock(run: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    run.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resets the run state if a pass future is dropped mid-flight
struct PassGuard<'a> {
    run: &'a Mutex<RunState>,
    phase: &'a watch::Sender<SyncPhase>,
    armed: bool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Sync pass dropped before completion");
            let mut state = lock(self.run);
            state.in_flight = None;
            state.phase = SyncPhase::Idle;
            self.phase.send_replace(SyncPhase::Idle);
        }
    }
}

/// Reconciles every entity type between one local and one remote store.
///
/// Construct once per session and share by reference. `sync()` never runs two
/// passes at once: a caller arriving mid-pass awaits the running pass and
/// receives the same [`SyncReport`].
pub struct SyncEngine<L, R, C> {
    local: L,
    remote: R,
    cursors: C,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    run: Mutex<RunState>,
    phase: watch::Sender<SyncPhase>,
    listeners: ListenerRegistry,
}

impl<L, R, C> fmt::Debug for SyncEngine<L, R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("phase", &self.phase())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl<L, R, C> SyncEngine<L, R, C> {
    pub fn new(local: L, remote: R, cursors: C) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            local,
            remote,
            cursors,
            clock: Arc::new(SystemClock),
            config: SyncConfig::default(),
            run: Mutex::new(RunState {
                phase: SyncPhase::Idle,
                in_flight: None,
                last_report: None,
            }),
            phase,
            listeners: ListenerRegistry::new(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub const fn local(&self) -> &L {
        &self.local
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    pub const fn cursors(&self) -> &C {
        &self.cursors
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn phase(&self) -> SyncPhase {
        lock(&self.run).phase
    }

    /// Watch phase changes
    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        lock(&self.run).in_flight.is_some()
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        lock(&self.run).last_report.clone()
    }

    /// Register a callback fired after every successful pass
    pub fn on_synced<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncSummary) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    pub const fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    fn transition(&self, state: &mut RunState, next: SyncPhase) -> Result<()> {
        if !state.phase.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: state.phase.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(from = %state.phase, to = %next, "Sync phase changed");
        state.phase = next;
        self.phase.send_replace(next);
        Ok(())
    }

    fn begin(&self) -> Result<Begin> {
        let mut state = lock(&self.run);
        if let Some(receiver) = &state.in_flight {
            return Ok(Begin::Joined(receiver.clone()));
        }

        self.transition(&mut state, SyncPhase::Syncing)?;
        let (sender, receiver) = watch::channel(None);
        state.in_flight = Some(receiver);
        Ok(Begin::Started(sender))
    }

    fn finish(&self, report: &SyncReport) {
        let mut state = lock(&self.run);
        let terminal = if report.is_success() {
            SyncPhase::Success
        } else {
            SyncPhase::Failed
        };
        if let Err(error) = self
            .transition(&mut state, terminal)
            .and_then(|()| self.transition(&mut state, SyncPhase::Idle))
        {
            tracing::error!("Sync state machine out of step: {error}");
            state.phase = SyncPhase::Idle;
            self.phase.send_replace(SyncPhase::Idle);
        }
        state.last_report = Some(report.clone());
        state.in_flight = None;
    }

    async fn join(&self, mut receiver: watch::Receiver<Option<SyncReport>>) -> SyncReport {
        tracing::debug!("Sync already running; awaiting the in-flight pass");
        match receiver.wait_for(Option::is_some).await {
            Ok(report) => report
                .clone()
                .unwrap_or_else(|| SyncReport::interrupted(self.clock.now())),
            Err(_) => SyncReport::interrupted(self.clock.now()),
        }
    }
}

impl<L, R, C> SyncEngine<L, R, C>
where
    L: LocalStore,
    R: RemoteStore,
    C: CursorStore,
{
    /// Run one full pass over every entity type, or await the pass already running.
    ///
    /// Returns `Err` only for configuration problems detected before any I/O.
    /// Failures during the pass are reported through [`SyncReport::error`];
    /// records completed before the failure keep their advanced cursor.
    pub async fn sync(&self) -> Result<SyncReport> {
        self.remote.ensure_ready()?;

        let sender = match self.begin()? {
            Begin::Joined(receiver) => return Ok(self.join(receiver).await),
            Begin::Started(sender) => sender,
        };

        let mut guard = PassGuard {
            run: &self.run,
            phase: &self.phase,
            armed: true,
        };
        let report = self.run_pass().await;
        self.finish(&report);
        guard.armed = false;
        sender.send_replace(Some(report.clone()));

        if report.is_success() {
            self.listeners.emit(&report.summary);
        }
        Ok(report)
    }

    async fn run_pass(&self) -> SyncReport {
        let started_at = self.clock.now();
        tracing::info!("Sync pass started");

        let mut entities = Vec::with_capacity(self.config.entity_order.len());
        let mut remapped: BTreeMap<RecordKey, RecordKey> = BTreeMap::new();
        let mut error = None;

        for &entity in &self.config.entity_order {
            match self.sync_entity(entity, &remapped).await {
                Ok(report) => {
                    remapped.extend(
                        report
                            .remapped
                            .iter()
                            .map(|(old, new)| (old.clone(), new.clone())),
                    );
                    entities.push(report);
                }
                Err(entity_error) => {
                    tracing::error!(entity = %entity, "Sync pass failed: {entity_error}");
                    error = Some(format!("{entity}: {entity_error}"));
                    break;
                }
            }
        }

        let summary = SyncSummary::from_reports(&entities);
        let failed = entities.iter().map(|report| report.failed).sum();
        let outcome = if error.is_none() {
            SyncOutcome::Success
        } else {
            SyncOutcome::Failed
        };

        tracing::info!(
            outcome = ?outcome,
            uploaded = summary.uploaded,
            downloaded = summary.downloaded,
            deleted = summary.deleted,
            failed,
            "Sync pass finished"
        );

        SyncReport {
            outcome,
            summary,
            failed,
            entities,
            error,
            started_at,
            finished_at: self.clock.now(),
        }
    }

    async fn sync_entity(
        &self,
        entity: EntityKind,
        remapped: &BTreeMap<RecordKey, RecordKey>,
    ) -> Result<ExecutionReport> {
        let now = self.clock.now();
        rewrite_parent_keys(&self.local, entity, remapped).await?;

        let cursor = self.cursors.load_cursor(entity).await?;
        let purged = self.local.purged_keys(entity).await?;

        let mut remote_records = self.remote.fetch_changed_since(entity, cursor).await?;
        let fetched = remote_records.len();
        remote_records.retain(|record| !purged.contains(&record.key));
        if remote_records.len() < fetched {
            tracing::debug!(
                entity = %entity,
                dropped = fetched - remote_records.len(),
                "Ignored remote records for purged keys"
            );
        }

        let local_records = self
            .local_snapshot(entity, cursor, &remote_records, now)
            .await?;
        let ops = analyze(&remote_records, &local_records, now, self.config.grace_period);
        tracing::debug!(
            entity = %entity,
            remote = remote_records.len(),
            local = local_records.len(),
            insert = ops.to_insert_local.len(),
            update = ops.to_update_local.len(),
            upload = ops.to_upload.len(),
            hard_delete = ops.to_hard_delete.len(),
            "Analyzed snapshots"
        );

        let mut tracker = {
            // Records already in agreement count as done for the watermark
            let seen = remote_records.iter().chain(&local_records);
            let pending: HashSet<(Timestamp, &RecordKey)> = ops
                .records()
                .map(|record| (record.updated_at, &record.key))
                .collect();
            let mut tracker = CursorTracker::new(entity, cursor, seen.clone());
            tracker.complete_all(
                seen.filter(|record| !pending.contains(&(record.updated_at, &record.key))),
            );
            tracker
        };
        let executor = SyncExecutor::new(&self.local, &self.remote, &self.cursors, &self.config);
        let report = executor.execute(entity, ops, &mut tracker).await?;

        tracing::info!(
            entity = %entity,
            inserted = report.inserted,
            updated = report.updated,
            uploaded = report.uploaded,
            deleted = report.deleted,
            failed = report.failed,
            "Entity synced"
        );
        Ok(report)
    }

    /// Local rows changed since the cursor, plus the local copy of every
    /// fetched remote key and every expired tombstone
    async fn local_snapshot(
        &self,
        entity: EntityKind,
        cursor: Option<Timestamp>,
        remote_records: &[SyncRecord],
        now: Timestamp,
    ) -> Result<Vec<SyncRecord>> {
        let mut snapshot = self.local.get_changed_since(entity, cursor).await?;
        if cursor.is_none() {
            return Ok(snapshot);
        }

        let mut seen: HashSet<RecordKey> = snapshot.iter().map(|record| record.key.clone()).collect();
        for remote in remote_records {
            if seen.contains(&remote.key) {
                continue;
            }
            if let Some(local) = self.local.get(entity, &remote.key).await? {
                seen.insert(local.key.clone());
                snapshot.push(local);
            }
        }

        let expired = self
            .local
            .get_expired_tombstones(entity, self.config.grace_period, now)
            .await?;
        for tombstone in expired {
            if seen.insert(tombstone.key.clone()) {
                snapshot.push(tombstone);
            }
        }
        Ok(snapshot)
    }
}
