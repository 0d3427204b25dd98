//! Entity kinds handled by the sync engine

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Syncable entity types, each backed by its own local table and remote collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Note,
    FileReference,
    File,
}

/// Fixed pass order: file references point at notes, so notes go first.
pub const SYNC_ORDER: [EntityKind; 3] = [EntityKind::Note, EntityKind::FileReference, EntityKind::File];

impl EntityKind {
    /// Local table and remote collection name.
    #[must_use]
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Note => "notes",
            Self::FileReference => "file_references",
            Self::File => "files",
        }
    }

    /// Whether records of this kind form a parent/child tree that must upload parents first.
    #[must_use]
    pub const fn is_hierarchical(self) -> bool {
        matches!(self, Self::Note)
    }

    /// Persisted cursor key, `lastSyncedAt_<entity>`.
    #[must_use]
    pub fn cursor_key(self) -> String {
        format!("lastSyncedAt_{}", self.table_name())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "notes" | "note" => Ok(Self::Note),
            "file_references" | "file_reference" | "filereferences" => Ok(Self::FileReference),
            "files" | "file" => Ok(Self::File),
            other => Err(Error::InvalidInput(format!("unknown entity type: {other}"))),
        }
    }
}
