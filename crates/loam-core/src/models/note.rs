//! Note model

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::Result;

use super::record::{RecordKey, SyncRecord};

/// A note or folder. Folders are notes with `is_folder` set; any note may have a parent folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier (UUID v7 when created locally, possibly server-assigned after upload)
    pub id: RecordKey,
    /// Parent folder, if nested
    pub parent_id: Option<RecordKey>,
    /// Optional title; empty means "use the first line"
    pub title: String,
    /// Plain text content
    pub content: String,
    /// Folder marker
    pub is_folder: bool,
    /// Creation timestamp
    pub created_at: Timestamp,
    /// Last update timestamp
    pub updated_at: Timestamp,
    /// Soft delete flag for sync
    pub is_deleted: bool,
}

/// Entity-specific part of a note record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotePayload {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    is_folder: bool,
    created_at: Timestamp,
}

impl Note {
    /// Create a new note with the given content
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            id: RecordKey::generate(),
            parent_id: None,
            title: String::new(),
            content: content.into(),
            is_folder: false,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }

    /// Create an empty folder
    #[must_use]
    pub fn folder(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            is_folder: true,
            ..Self::new("")
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: RecordKey) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Title, falling back to the first content line, truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        let source = if self.title.trim().is_empty() {
            self.content.lines().next().unwrap_or("")
        } else {
            self.title.trim()
        };
        source.chars().take(max_len).collect()
    }

    /// Check if note content is empty (whitespace-only counts as empty)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.content.trim().is_empty()
    }

    pub fn to_record(&self) -> Result<SyncRecord> {
        let payload = NotePayload {
            title: self.title.clone(),
            content: self.content.clone(),
            is_folder: self.is_folder,
            created_at: self.created_at,
        };
        Ok(SyncRecord {
            key: self.id.clone(),
            parent_key: self.parent_id.clone(),
            updated_at: self.updated_at,
            is_deleted: self.is_deleted,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn from_record(record: &SyncRecord) -> Result<Self> {
        let payload: NotePayload = serde_json::from_value(record.payload.clone())?;
        Ok(Self {
            id: record.key.clone(),
            parent_id: record.parent_key.clone(),
            title: payload.title,
            content: payload.content,
            is_folder: payload.is_folder,
            created_at: payload.created_at,
            updated_at: record.updated_at,
            is_deleted: record.is_deleted,
        })
    }
}
