//! libSQL implementation of the sync engine's local store

use std::collections::HashSet;
use std::time::Duration;

use libsql::{Connection, Row, Value};

use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::models::{EntityKind, RecordKey, SyncConflict, SyncRecord};
use crate::store::LocalStore;

const RECORD_COLUMNS: &str = "key, parent_key, updated_at, is_deleted, payload";

/// Record table access over a borrowed connection
pub struct LibSqlRecordStore<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &Row) -> Result<SyncRecord> {
        let key: String = row.get(0)?;
        let parent_key = match row.get_value(1)? {
            Value::Text(parent) => Some(RecordKey::from(parent)),
            _ => None,
        };
        let updated_at: i64 = row.get(2)?;
        let is_deleted: i64 = row.get(3)?;
        let payload: String = row.get(4)?;

        Ok(SyncRecord {
            key: RecordKey::from(key),
            parent_key,
            updated_at: Timestamp::from_millis(updated_at),
            is_deleted: is_deleted != 0,
            payload: serde_json::from_str(&payload)?,
        })
    }

    async fn query_records(&self, sql: &str, params: Vec<Value>) -> Result<Vec<SyncRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    fn record_params(record: &SyncRecord) -> Result<Vec<Value>> {
        Ok(vec![
            Value::Text(record.key.to_string()),
            record
                .parent_key
                .as_ref()
                .map_or(Value::Null, |parent| Value::Text(parent.to_string())),
            Value::Integer(record.updated_at.as_millis()),
            Value::Integer(i64::from(record.is_deleted)),
            Value::Text(serde_json::to_string(&record.payload)?),
        ])
    }

    fn upsert_sql(entity: EntityKind) -> String {
        format!(
            "INSERT INTO {table} ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                 parent_key = excluded.parent_key,
                 updated_at = excluded.updated_at,
                 is_deleted = excluded.is_deleted,
                 payload = excluded.payload",
            table = entity.table_name()
        )
    }

    fn insert_sql(entity: EntityKind) -> String {
        format!(
            "INSERT INTO {table} ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?)",
            table = entity.table_name()
        )
    }

    /// Run one statement per record inside a single transaction
    async fn write_batch(&self, sql: &str, records: &[SyncRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        for record in records {
            let params = match Self::record_params(record) {
                Ok(params) => params,
                Err(e) => {
                    self.conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e);
                }
            };
            if let Err(e) = self.conn.execute(sql, params).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
        }

        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        Ok(())
    }

    /// Number of live (non-deleted) and tombstoned rows in a table
    pub async fn counts(&self, entity: EntityKind) -> Result<(u64, u64)> {
        let sql = format!(
            "SELECT
                COALESCE(SUM(CASE WHEN is_deleted = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN is_deleted = 1 THEN 1 ELSE 0 END), 0)
             FROM {}",
            entity.table_name()
        );
        let mut rows = self.conn.query(&sql, ()).await?;
        let Some(row) = rows.next().await? else {
            return Ok((0, 0));
        };
        let live: i64 = row.get(0)?;
        let deleted: i64 = row.get(1)?;
        Ok((
            u64::try_from(live).unwrap_or_default(),
            u64::try_from(deleted).unwrap_or_default(),
        ))
    }

    /// Recently logged last-write-wins conflicts, newest first
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity, record_key, local_updated_at, incoming_updated_at, resolved_at, strategy
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?",
                libsql::params![limit],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            let entity: String = row.get(1)?;
            let record_key: String = row.get(2)?;
            conflicts.push(SyncConflict {
                id: row.get(0)?,
                entity: entity.parse()?,
                record_key: RecordKey::from(record_key),
                local_updated_at: Timestamp::from_millis(row.get(3)?),
                incoming_updated_at: Timestamp::from_millis(row.get(4)?),
                resolved_at: Timestamp::from_millis(row.get(5)?),
                strategy: row.get(6)?,
            });
        }
        Ok(conflicts)
    }
}

impl LocalStore for LibSqlRecordStore<'_> {
    async fn get_all(&self, entity: EntityKind) -> Result<Vec<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} ORDER BY updated_at ASC, key ASC",
            entity.table_name()
        );
        self.query_records(&sql, Vec::new()).await
    }

    async fn get(&self, entity: EntityKind, key: &RecordKey) -> Result<Option<SyncRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE key = ?",
            entity.table_name()
        );
        let mut records = self
            .query_records(&sql, vec![Value::Text(key.to_string())])
            .await?;
        Ok(records.pop())
    }

    async fn put(&self, entity: EntityKind, record: &SyncRecord) -> Result<()> {
        self.conn
            .execute(&Self::upsert_sql(entity), Self::record_params(record)?)
            .await?;
        Ok(())
    }

    async fn bulk_put(&self, entity: EntityKind, records: &[SyncRecord]) -> Result<()> {
        self.write_batch(&Self::upsert_sql(entity), records).await
    }

    async fn bulk_insert(&self, entity: EntityKind, records: &[SyncRecord]) -> Result<()> {
        self.write_batch(&Self::insert_sql(entity), records)
            .await
            .map_err(|error| match error {
                Error::LibSql(inner) => {
                    Error::Database(format!("bulk insert into {entity} failed: {inner}"))
                }
                other => other,
            })
    }

    async fn delete_by_keys(&self, entity: EntityKind, keys: &[RecordKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "DELETE FROM {} WHERE key IN ({placeholders})",
            entity.table_name()
        );
        let params = keys
            .iter()
            .map(|key| Value::Text(key.to_string()))
            .collect::<Vec<_>>();
        self.conn.execute(&sql, params).await?;
        Ok(())
    }

    async fn get_changed_since(
        &self,
        entity: EntityKind,
        since: Option<Timestamp>,
    ) -> Result<Vec<SyncRecord>> {
        let Some(since) = since else {
            return self.get_all(entity).await;
        };
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE updated_at >= ? ORDER BY updated_at ASC, key ASC",
            entity.table_name()
        );
        self.query_records(&sql, vec![Value::Integer(since.as_millis())])
            .await
    }

    async fn get_expired_tombstones(
        &self,
        entity: EntityKind,
        grace_period: Duration,
        now: Timestamp,
    ) -> Result<Vec<SyncRecord>> {
        let threshold = now.saturating_sub(grace_period);
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM {} WHERE is_deleted = 1 AND updated_at < ? ORDER BY updated_at ASC",
            entity.table_name()
        );
        self.query_records(&sql, vec![Value::Integer(threshold.as_millis())])
            .await
    }

    async fn mark_purged(&self, entity: EntityKind, keys: &[RecordKey]) -> Result<()> {
        let now = Timestamp::now().as_millis();
        for key in keys {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO purged_records (entity, key, purged_at) VALUES (?, ?, ?)",
                    libsql::params![entity.table_name(), key.as_str(), now],
                )
                .await?;
        }
        Ok(())
    }

    async fn purged_keys(&self, entity: EntityKind) -> Result<HashSet<RecordKey>> {
        let mut rows = self
            .conn
            .query(
                "SELECT key FROM purged_records WHERE entity = ?",
                [entity.table_name()],
            )
            .await?;

        let mut keys = HashSet::new();
        while let Some(row) = rows.next().await? {
            let key: String = row.get(0)?;
            keys.insert(RecordKey::from(key));
        }
        Ok(keys)
    }
}
