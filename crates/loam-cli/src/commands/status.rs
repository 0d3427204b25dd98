use std::path::Path;

use loam_core::db::{LibSqlCursorStore, LibSqlRecordStore};
use loam_core::models::SYNC_ORDER;
use loam_core::store::{CursorStore, LocalStore};
use loam_core::ClientConfig;
use serde::Serialize;

use crate::commands::common::{format_timestamp, load_client_config, open_database};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct EntityStatus {
    pub entity: String,
    pub live: u64,
    pub deleted: u64,
    pub purged: usize,
    pub last_synced_at: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub backend: String,
    pub api_base_url: Option<String>,
    pub authenticated: bool,
    pub entities: Vec<EntityStatus>,
}

pub async fn collect_status(config: &ClientConfig, db_path: &Path) -> Result<StatusReport, CliError> {
    let db = open_database(db_path).await?;
    let records = LibSqlRecordStore::new(db.connection());
    let cursors = LibSqlCursorStore::new(db.connection());

    let mut entities = Vec::with_capacity(SYNC_ORDER.len());
    for entity in SYNC_ORDER {
        let (live, deleted) = records.counts(entity).await?;
        let purged = records.purged_keys(entity).await?.len();
        let cursor = cursors.load_cursor(entity).await?;
        entities.push(EntityStatus {
            entity: entity.to_string(),
            live,
            deleted,
            purged,
            last_synced_at: cursor.map(|cursor| cursor.as_millis()),
        });
    }

    Ok(StatusReport {
        backend: format!("{:?}", config.backend).to_lowercase(),
        api_base_url: config.api_base_url.clone(),
        authenticated: config.api_token.is_some(),
        entities,
    })
}

pub fn format_status_lines(status: &StatusReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Backend: {} {} ({})",
        status.backend,
        status.api_base_url.as_deref().unwrap_or("<not configured>"),
        if status.authenticated { "token set" } else { "no token" }
    )];

    for entity in &status.entities {
        let cursor = entity.last_synced_at.map_or_else(
            || "never synced".to_string(),
            |millis| format_timestamp(loam_core::Timestamp::from_millis(millis)),
        );
        lines.push(format!(
            "  {:<16} {} live, {} deleted, {} purged  last sync {cursor}",
            entity.entity, entity.live, entity.deleted, entity.purged
        ));
    }
    lines
}

pub async fn run_status(
    config_path: Option<&Path>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let config = load_client_config(config_path)?;
    let status = collect_status(&config, db_path).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        for line in format_status_lines(&status) {
            println!("{line}");
        }
    }
    Ok(())
}
