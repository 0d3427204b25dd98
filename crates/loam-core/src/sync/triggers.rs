//! Events that start a sync pass.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::models::EntityKind;
use crate::store::{CursorStore, LocalStore, RemoteStore};

use super::engine::SyncEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "trigger", content = "entity", rename_all = "snake_case")]
pub enum SyncTrigger {
    Manual,
    Login,
    Reconnect,
    Periodic,
    /// Push notification that another device changed this entity
    RemoteChange(EntityKind),
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Login => f.write_str("login"),
            Self::Reconnect => f.write_str("reconnect"),
            Self::Periodic => f.write_str("periodic"),
            Self::RemoteChange(entity) => write!(f, "remote change ({entity})"),
        }
    }
}

async fn run_once<L, R, C>(engine: &SyncEngine<L, R, C>, trigger: SyncTrigger) -> bool
where
    L: LocalStore,
    R: RemoteStore,
    C: CursorStore,
{
    tracing::debug!(trigger = %trigger, "Sync triggered");
    match engine.sync().await {
        Ok(report) if report.is_success() => true,
        Ok(report) => {
            tracing::warn!(
                trigger = %trigger,
                "Triggered sync failed: {}",
                report.error.as_deref().unwrap_or("unknown error")
            );
            false
        }
        Err(error) => {
            tracing::error!(trigger = %trigger, "Triggered sync could not start: {error}");
            false
        }
    }
}

/// Run one pass per batch of queued triggers until every sender is dropped.
///
/// Triggers that pile up while a pass runs collapse into the next pass.
/// Returns how many passes were started.
pub async fn drive_triggers<L, R, C>(
    engine: &SyncEngine<L, R, C>,
    mut triggers: mpsc::Receiver<SyncTrigger>,
) -> usize
where
    L: LocalStore,
    R: RemoteStore,
    C: CursorStore,
{
    let mut passes = 0;
    while let Some(trigger) = triggers.recv().await {
        let mut coalesced = 0usize;
        while triggers.try_recv().is_ok() {
            coalesced += 1;
        }
        if coalesced > 0 {
            tracing::debug!(coalesced, "Coalesced queued sync triggers");
        }

        run_once(engine, trigger).await;
        passes += 1;
    }
    passes
}

/// Sync every `interval` until `shutdown` resolves.
///
/// The first pass runs immediately. Ticks missed while a pass was running are
/// skipped rather than replayed.
pub async fn run_periodic<L, R, C, S>(engine: &SyncEngine<L, R, C>, interval: Duration, shutdown: S) -> usize
where
    L: LocalStore,
    R: RemoteStore,
    C: CursorStore,
    S: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    let mut passes = 0;
    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!(passes, "Periodic sync stopped");
                break;
            }
            _ = ticker.tick() => {
                run_once(engine, SyncTrigger::Periodic).await;
                passes += 1;
            }
        }
    }
    passes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::models::SyncRecord;
    use crate::store::{MemoryCursorStore, MemoryLocalStore, MemoryRemoteStore};
    use pretty_assertions::assert_eq;

    fn engine() -> SyncEngine<MemoryLocalStore, MemoryRemoteStore, MemoryCursorStore> {
        let local = MemoryLocalStore::new().with_records(
            EntityKind::Note,
            [SyncRecord::new("n", Timestamp::from_millis(1))],
        );
        SyncEngine::new(local, MemoryRemoteStore::new(), MemoryCursorStore::new())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_triggers_collapse_into_one_pass() {
        let engine = engine();
        let (sender, receiver) = mpsc::channel(8);
        sender.send(SyncTrigger::Login).await.unwrap();
        sender.send(SyncTrigger::Manual).await.unwrap();
        sender
            .send(SyncTrigger::RemoteChange(EntityKind::File))
            .await
            .unwrap();
        drop(sender);

        let passes = drive_triggers(&engine, receiver).await;
        assert_eq!(passes, 1);
        assert!(engine.remote().get(EntityKind::Note, "n").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_trigger_does_not_stop_the_driver() {
        let engine = engine();
        engine.remote().set_offline(true);
        let (sender, receiver) = mpsc::channel(8);

        let driver = async {
            let passes = drive_triggers(&engine, receiver).await;
            assert!(engine.last_report().is_some_and(|report| report.is_success()));
            passes
        };
        let producer = async {
            sender.send(SyncTrigger::Manual).await.unwrap();
            while engine.last_report().is_none() {
                tokio::task::yield_now().await;
            }
            engine.remote().set_offline(false);
            sender.send(SyncTrigger::Reconnect).await.unwrap();
            drop(sender);
        };

        let (passes, ()) = tokio::join!(driver, producer);
        assert_eq!(passes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_runs_until_shutdown() {
        let engine = engine();
        let shutdown = tokio::time::sleep(Duration::from_secs(125));

        let passes = run_periodic(&engine, Duration::from_secs(60), shutdown).await;
        // Ticks at 0s, 60s and 120s
        assert_eq!(passes, 3);
    }
}
