//! Sync cursors persisted in the settings table

use crate::clock::Timestamp;
use crate::error::Result;
use crate::models::EntityKind;
use crate::store::CursorStore;
use libsql::Connection;

/// libSQL implementation of `CursorStore`
///
/// Each cursor lives under `lastSyncedAt_<table>` as a JSON-encoded number.
pub struct LibSqlCursorStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCursorStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM settings WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }

    /// Forget the cursor so the next pass fetches everything
    pub async fn reset(&self, entity: EntityKind) -> Result<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?", [entity.cursor_key()])
            .await?;
        Ok(())
    }
}

impl CursorStore for LibSqlCursorStore<'_> {
    async fn load_cursor(&self, entity: EntityKind) -> Result<Option<Timestamp>> {
        let Some(raw) = self.get_setting(&entity.cursor_key()).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<Timestamp>(&raw) {
            Ok(cursor) => Ok(Some(cursor)),
            Err(error) => {
                tracing::warn!("Ignoring unreadable cursor for {entity}: {error}");
                Ok(None)
            }
        }
    }

    async fn save_cursor(&self, entity: EntityKind, cursor: Timestamp) -> Result<()> {
        let value = serde_json::to_string(&cursor)?;
        self.set_setting(&entity.cursor_key(), &value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_cursor_is_none() {
        let db = setup().await;
        let store = LibSqlCursorStore::new(db.connection());

        assert_eq!(store.load_cursor(EntityKind::Note).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_and_load_cursor_per_entity() {
        let db = setup().await;
        let store = LibSqlCursorStore::new(db.connection());

        store
            .save_cursor(EntityKind::Note, Timestamp::from_millis(1_700_000_000_000))
            .await
            .unwrap();
        store
            .save_cursor(EntityKind::File, Timestamp::from_millis(42))
            .await
            .unwrap();

        assert_eq!(
            store.load_cursor(EntityKind::Note).await.unwrap(),
            Some(Timestamp::from_millis(1_700_000_000_000))
        );
        assert_eq!(
            store.load_cursor(EntityKind::File).await.unwrap(),
            Some(Timestamp::from_millis(42))
        );
        assert_eq!(store.load_cursor(EntityKind::FileReference).await.unwrap(), None);

        store.reset(EntityKind::Note).await.unwrap();
        assert_eq!(store.load_cursor(EntityKind::Note).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_accepts_legacy_string_cursor() {
        let db = setup().await;
        let store = LibSqlCursorStore::new(db.connection());

        store
            .set_setting("lastSyncedAt_notes", "\"2024-01-01T00:00:00Z\"")
            .await
            .unwrap();
        assert_eq!(
            store.load_cursor(EntityKind::Note).await.unwrap(),
            Some(Timestamp::parse("2024-01-01T00:00:00Z").unwrap())
        );

        store.set_setting("lastSyncedAt_files", "garbage").await.unwrap();
        assert_eq!(store.load_cursor(EntityKind::File).await.unwrap(), None);
    }
}
