//! Note repository implementation

use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::models::{EntityKind, Note, RecordKey, SyncRecord};
use crate::store::LocalStore;
use libsql::{Connection, Value};

use super::LibSqlRecordStore;

/// Trait for note storage operations (async)
#[allow(async_fn_in_trait)]
pub trait NoteRepository {
    /// Store a newly created note or folder
    async fn create(&self, note: &Note) -> Result<()>;

    /// Get a note by ID (tombstones included)
    async fn get(&self, id: &RecordKey) -> Result<Option<Note>>;

    /// Resolve a full ID or unique ID prefix to a live note
    async fn resolve(&self, id_or_prefix: &str) -> Result<Note>;

    /// List live notes, most recently updated first
    async fn list(&self, limit: usize) -> Result<Vec<Note>>;

    /// Live notes directly under a folder
    async fn list_children(&self, parent: &RecordKey) -> Result<Vec<Note>>;

    /// Replace a note's content and bump its timestamp
    async fn update(&self, id: &RecordKey, content: &str) -> Result<Note>;

    /// Soft delete a note; sync uploads the tombstone
    async fn delete(&self, id: &RecordKey) -> Result<()>;
}

/// libSQL implementation of `NoteRepository`
pub struct LibSqlNoteRepository<'a> {
    conn: &'a Connection,
    records: LibSqlRecordStore<'a>,
}

impl<'a> LibSqlNoteRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            records: LibSqlRecordStore::new(conn),
        }
    }

    async fn query_notes(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Note>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next().await? {
            let key: String = row.get(0)?;
            let parent_key = match row.get_value(1)? {
                Value::Text(parent) => Some(RecordKey::from(parent)),
                _ => None,
            };
            let updated_at: i64 = row.get(2)?;
            let is_deleted: i64 = row.get(3)?;
            let payload: String = row.get(4)?;

            let record = SyncRecord {
                key: RecordKey::from(key),
                parent_key,
                updated_at: Timestamp::from_millis(updated_at),
                is_deleted: is_deleted != 0,
                payload: serde_json::from_str(&payload)?,
            };
            notes.push(Note::from_record(&record)?);
        }
        Ok(notes)
    }

    /// Write a modified note, never moving `updated_at` backwards
    async fn touch(&self, mut note: Note) -> Result<Note> {
        note.updated_at = Timestamp::now().max(note.updated_at.saturating_add(
            std::time::Duration::from_millis(1),
        ));
        self.records
            .put(EntityKind::Note, &note.to_record()?)
            .await?;
        Ok(note)
    }
}

impl NoteRepository for LibSqlNoteRepository<'_> {
    async fn create(&self, note: &Note) -> Result<()> {
        if let Some(parent) = &note.parent_id {
            match self.get(parent).await? {
                Some(folder) if folder.is_folder && !folder.is_deleted => {}
                Some(_) => {
                    return Err(Error::InvalidInput(format!("{parent} is not a folder")));
                }
                None => return Err(Error::NotFound(parent.to_string())),
            }
        }

        self.records
            .bulk_insert(EntityKind::Note, &[note.to_record()?])
            .await
    }

    async fn get(&self, id: &RecordKey) -> Result<Option<Note>> {
        self.records
            .get(EntityKind::Note, id)
            .await?
            .map(|record| Note::from_record(&record))
            .transpose()
    }

    async fn resolve(&self, id_or_prefix: &str) -> Result<Note> {
        let id_or_prefix = id_or_prefix.trim();
        if id_or_prefix.is_empty() {
            return Err(Error::InvalidInput("note id must not be empty".to_string()));
        }

        if let Some(note) = self.get(&RecordKey::from(id_or_prefix)).await? {
            if !note.is_deleted {
                return Ok(note);
            }
        }

        let mut matches = self
            .query_notes(
                "SELECT key, parent_key, updated_at, is_deleted, payload
                 FROM notes
                 WHERE is_deleted = 0 AND key LIKE ?
                 ORDER BY updated_at DESC
                 LIMIT 3",
                vec![Value::Text(format!("{id_or_prefix}%"))],
            )
            .await?;

        match matches.len() {
            0 => Err(Error::NotFound(id_or_prefix.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::InvalidInput(format!(
                "note id prefix '{id_or_prefix}' is ambiguous"
            ))),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<Note>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_notes(
            "SELECT key, parent_key, updated_at, is_deleted, payload
             FROM notes
             WHERE is_deleted = 0
             ORDER BY updated_at DESC, key DESC
             LIMIT ?",
            vec![Value::Integer(limit)],
        )
        .await
    }

    async fn list_children(&self, parent: &RecordKey) -> Result<Vec<Note>> {
        self.query_notes(
            "SELECT key, parent_key, updated_at, is_deleted, payload
             FROM notes
             WHERE is_deleted = 0 AND parent_key = ?
             ORDER BY updated_at DESC",
            vec![Value::Text(parent.to_string())],
        )
        .await
    }

    async fn update(&self, id: &RecordKey, content: &str) -> Result<Note> {
        let mut note = self
            .get(id)
            .await?
            .filter(|note| !note.is_deleted)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        note.content = content.to_string();
        self.touch(note).await
    }

    async fn delete(&self, id: &RecordKey) -> Result<()> {
        let mut note = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if note.is_deleted {
            return Ok(());
        }
        note.is_deleted = true;
        self.touch(note).await?;
        Ok(())
    }
}
