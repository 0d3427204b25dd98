//! loam-core - Core library for loam
//!
//! Offline-first records kept in an embedded libSQL database and reconciled
//! with a cloud backend by a bidirectional, last-write-wins sync engine. Used by
//! the `loam` CLI and the reference `loam-api` server.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;
mod util;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{BackendKind, ClientConfig};
pub use error::{Error, Result};
pub use models::{EntityKind, Note, RecordKey, SyncRecord};
pub use sync::{SyncEngine, SyncReport, SyncSummary};
