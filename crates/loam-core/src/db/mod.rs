//! Database layer for loam

mod connection;
mod cursor_store;
mod migrations;
mod note_repository;
mod record_store;

pub use connection::Database;
pub use cursor_store::LibSqlCursorStore;
pub use note_repository::{LibSqlNoteRepository, NoteRepository};
pub use record_store::LibSqlRecordStore;
