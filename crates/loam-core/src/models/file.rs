//! File metadata and file reference models
//!
//! File bytes live in an external blob store; only metadata syncs through the engine.

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::{Error, Result};

use super::record::{RecordKey, SyncRecord};

/// Metadata for a stored file blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Unique file identifier.
    pub id: RecordKey,
    /// Original file name.
    pub filename: String,
    /// Content MIME type.
    pub mime_type: String,
    /// File size in bytes.
    pub size_bytes: i64,
    /// Opaque blob-store object key.
    pub object_key: String,
    /// Last update timestamp.
    pub updated_at: Timestamp,
    /// Soft delete flag for sync.
    pub is_deleted: bool,
}

/// Link between a note and a file. Its record `parent_key` is the owning note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    pub id: RecordKey,
    pub note_id: RecordKey,
    pub file_id: RecordKey,
    pub updated_at: Timestamp,
    pub is_deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMetaPayload {
    filename: String,
    mime_type: String,
    size_bytes: i64,
    object_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileReferencePayload {
    file_id: RecordKey,
}

impl FileMeta {
    /// Create a new file metadata record.
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: i64,
        object_key: impl Into<String>,
    ) -> Result<Self> {
        let filename = filename.into().trim().to_string();
        let mime_type = mime_type.into().trim().to_string();
        let object_key = object_key.into().trim().to_string();

        if filename.is_empty() {
            return Err(Error::InvalidInput("File filename cannot be empty".to_string()));
        }
        if mime_type.is_empty() {
            return Err(Error::InvalidInput("File mime_type cannot be empty".to_string()));
        }
        if object_key.is_empty() {
            return Err(Error::InvalidInput("File object_key cannot be empty".to_string()));
        }
        if size_bytes < 0 {
            return Err(Error::InvalidInput(
                "File size_bytes cannot be negative".to_string(),
            ));
        }

        Ok(Self {
            id: RecordKey::generate(),
            filename,
            mime_type,
            size_bytes,
            object_key,
            updated_at: Timestamp::now(),
            is_deleted: false,
        })
    }

    pub fn to_record(&self) -> Result<SyncRecord> {
        let payload = FileMetaPayload {
            filename: self.filename.clone(),
            mime_type: self.mime_type.clone(),
            size_bytes: self.size_bytes,
            object_key: self.object_key.clone(),
        };
        Ok(SyncRecord {
            key: self.id.clone(),
            parent_key: None,
            updated_at: self.updated_at,
            is_deleted: self.is_deleted,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn from_record(record: &SyncRecord) -> Result<Self> {
        let payload: FileMetaPayload = serde_json::from_value(record.payload.clone())?;
        Ok(Self {
            id: record.key.clone(),
            filename: payload.filename,
            mime_type: payload.mime_type,
            size_bytes: payload.size_bytes,
            object_key: payload.object_key,
            updated_at: record.updated_at,
            is_deleted: record.is_deleted,
        })
    }
}

impl FileReference {
    #[must_use]
    pub fn new(note_id: RecordKey, file_id: RecordKey) -> Self {
        Self {
            id: RecordKey::generate(),
            note_id,
            file_id,
            updated_at: Timestamp::now(),
            is_deleted: false,
        }
    }

    pub fn to_record(&self) -> Result<SyncRecord> {
        Ok(SyncRecord {
            key: self.id.clone(),
            parent_key: Some(self.note_id.clone()),
            updated_at: self.updated_at,
            is_deleted: self.is_deleted,
            payload: serde_json::to_value(FileReferencePayload {
                file_id: self.file_id.clone(),
            })?,
        })
    }

    pub fn from_record(record: &SyncRecord) -> Result<Self> {
        let note_id = record.parent_key.clone().ok_or_else(|| {
            Error::InvalidInput(format!("file reference {} has no note", record.key))
        })?;
        let payload: FileReferencePayload = serde_json::from_value(record.payload.clone())?;
        Ok(Self {
            id: record.key.clone(),
            note_id,
            file_id: payload.file_id,
            updated_at: record.updated_at,
            is_deleted: record.is_deleted,
        })
    }
}
