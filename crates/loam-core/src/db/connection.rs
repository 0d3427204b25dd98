//! libSQL handle for the local store

use std::path::Path;

use libsql::{Builder, Connection, Database as LibSqlDatabase};

use super::migrations;
use crate::error::Result;

const IN_MEMORY: &str = ":memory:";

/// Local libSQL database with the loam schema applied
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open (or create) the database file and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)?,
            _ => {}
        }

        let database = Self::connect(&path.to_string_lossy()).await?;
        tracing::debug!(path = %path.display(), "Opened local store");
        Ok(database)
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::connect(IN_MEMORY).await
    }

    async fn connect(location: &str) -> Result<Self> {
        let db = Builder::new_local(location).build().await?;
        let conn = db.connect()?;

        apply_pragmas(&conn, location == IN_MEMORY).await?;
        migrations::run(&conn).await?;
        Ok(Self { _db: db, conn })
    }

    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

async fn apply_pragmas(conn: &Connection, in_memory: bool) -> Result<()> {
    if !in_memory {
        conn.execute("PRAGMA journal_mode = WAL;", ()).await?;
    }
    conn.execute("PRAGMA synchronous = NORMAL;", ()).await?;
    conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
    Ok(())
}
