//! Bidirectional sync engine.
//!
//! One generic engine reconciles every entity type against any
//! [`RemoteStore`](crate::store::RemoteStore): the analyzer classifies, the
//! hierarchy sorter orders uploads, the executor applies, and [`SyncEngine`]
//! orchestrates passes and notifies listeners.

mod analyzer;
mod cursor;
mod engine;
mod events;
mod executor;
mod hierarchy;
mod realtime;
mod triggers;

use std::time::Duration;

use crate::config::ClientConfig;
use crate::models::{EntityKind, SYNC_ORDER};

pub use analyzer::{analyze, OperationSet};
pub use cursor::CursorTracker;
pub use engine::{SyncEngine, SyncOutcome, SyncPhase, SyncReport, SyncSummary};
pub use events::{ListenerRegistry, Subscription};
pub use executor::{rewrite_parent_keys, ExecutionReport, SyncExecutor};
pub use hierarchy::sort_for_upload;
pub use realtime::{forward_reconnects, ConnectionMonitor, ConnectionStatus};
pub use triggers::{drive_triggers, run_periodic, SyncTrigger};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30 * 86_400);
const DEFAULT_UPLOAD_BATCH_SIZE: usize = 50;

/// How hierarchical entities (notes) are pushed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HierarchicalUploadMode {
    /// One `upsert_one` at a time, observing server-assigned keys; aborts on error
    #[default]
    Sequential,
    /// Same batched path as flat entities
    Bulk,
}

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Tombstones older than this are hard-deleted on both sides
    pub grace_period: Duration,
    /// Entity types in pass order; parents' types first
    pub entity_order: Vec<EntityKind>,
    pub upload_batch_size: usize,
    pub hierarchical_upload: HierarchicalUploadMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            entity_order: SYNC_ORDER.to_vec(),
            upload_batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
            hierarchical_upload: HierarchicalUploadMode::default(),
        }
    }
}

impl From<&ClientConfig> for SyncConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            grace_period: config.grace_period(),
            upload_batch_size: config.upload_batch_size.max(1),
            ..Self::default()
        }
    }
}
