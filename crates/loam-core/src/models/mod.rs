//! Data models for loam

mod entity;
mod file;
mod note;
mod record;
mod sync_conflict;

pub use entity::{EntityKind, SYNC_ORDER};
pub use file::{FileMeta, FileReference};
pub use note::Note;
pub use record::{RecordKey, SyncRecord};
pub use sync_conflict::SyncConflict;
