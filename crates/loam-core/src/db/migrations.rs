//! Database migrations

use crate::error::Result;
use crate::models::SYNC_ORDER;
use libsql::Connection;

type Steps = fn() -> Vec<String>;

/// Ordered schema steps; the index + 1 is the version each one produces
const STEPS: [Steps; 2] = [record_tables, lww_conflict_guard];

/// Apply every step newer than the stored schema version
pub async fn run(conn: &Connection) -> Result<()> {
    let current = schema_version(conn).await?;

    for (version, steps) in (1_i64..).zip(STEPS) {
        if version <= current {
            continue;
        }
        let mut statements = steps();
        statements.push(format!(
            "INSERT INTO schema_version (version) VALUES ({version})"
        ));
        apply(conn, &statements).await?;
        tracing::info!(version, "Migrated local store");
    }

    Ok(())
}

async fn schema_version(conn: &Connection) -> Result<i64> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        (),
    )
    .await?;

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get::<i64>(0)?),
        None => Ok(0),
    }
}

/// All-or-nothing execution of one step's statements
async fn apply(conn: &Connection, statements: &[String]) -> Result<()> {
    let tx = conn.transaction().await?;
    for statement in statements {
        tx.execute(statement, ()).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Record tables, settings and the purge ledger
fn record_tables() -> Vec<String> {
    let mut statements = vec![
        // Settings table (local only); also holds the per-entity sync cursors
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )"
        .to_string(),
        // Keys removed by grace-period hard delete; never synced again
        "CREATE TABLE IF NOT EXISTS purged_records (
            entity TEXT NOT NULL,
            key TEXT NOT NULL,
            purged_at INTEGER NOT NULL,
            PRIMARY KEY (entity, key)
        )"
        .to_string(),
    ];

    for entity in SYNC_ORDER {
        let table = entity.table_name();
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                key TEXT PRIMARY KEY,
                parent_key TEXT,
                updated_at INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL DEFAULT 'null'
            )"
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_updated ON {table}(updated_at)"
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_deleted ON {table}(is_deleted)"
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_parent ON {table}(parent_key)"
        ));
    }

    statements
}

/// Conflict log plus per-table triggers that drop stale updates
fn lww_conflict_guard() -> Vec<String> {
    let mut statements = vec![
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity TEXT NOT NULL,
            record_key TEXT NOT NULL,
            local_updated_at INTEGER NOT NULL,
            incoming_updated_at INTEGER NOT NULL,
            resolved_at INTEGER NOT NULL,
            strategy TEXT NOT NULL
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_key ON sync_conflicts(record_key)"
            .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)"
            .to_string(),
    ];

    // An older incoming version never overwrites a newer stored one
    for entity in SYNC_ORDER {
        let table = entity.table_name();
        statements.push(format!(
            "CREATE TRIGGER IF NOT EXISTS {table}_lww_conflict_guard BEFORE UPDATE ON {table}
             FOR EACH ROW
             WHEN NEW.updated_at < OLD.updated_at
             BEGIN
                 INSERT INTO sync_conflicts (
                     entity,
                     record_key,
                     local_updated_at,
                     incoming_updated_at,
                     resolved_at,
                     strategy
                 ) VALUES (
                     '{table}',
                     OLD.key,
                     OLD.updated_at,
                     NEW.updated_at,
                     CAST(strftime('%s','now') AS INTEGER) * 1000,
                     'lww'
                 );
                 SELECT RAISE(IGNORE);
             END"
        ));
    }

    statements
}
