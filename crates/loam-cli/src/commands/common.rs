use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use loam_core::db::{Database, LibSqlCursorStore, LibSqlRecordStore};
use loam_core::models::SyncConflict;
use loam_core::store::RemoteBackend;
use loam_core::sync::{SyncConfig, SyncEngine, SyncReport};
use loam_core::{ClientConfig, Note, Timestamp};
use serde::Serialize;

use crate::error::CliError;

pub type LocalEngine<'a> = SyncEngine<LibSqlRecordStore<'a>, RemoteBackend, LibSqlCursorStore<'a>>;

#[derive(Debug, Serialize)]
pub struct NoteListItem {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub preview: String,
    pub is_folder: bool,
    pub updated_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub entity: String,
    pub record_key: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("loam").join("loam.db"))
        .ok_or_else(|| CliError::Config("failed to resolve the data directory".to_string()))
}

pub fn resolve_db_path(explicit: Option<PathBuf>) -> Result<PathBuf, CliError> {
    explicit.map_or_else(default_db_path, Ok)
}

pub async fn open_database(path: &Path) -> Result<Database, CliError> {
    Ok(Database::open(path).await?)
}

/// Config file (explicit path or the default location) with `LOAM_*` overrides
pub fn load_client_config(path: Option<&Path>) -> Result<ClientConfig, CliError> {
    let config = ClientConfig::load(path)?;
    tracing::debug!(?config, "Loaded client config");
    Ok(config)
}

/// Engine over the local database and the configured backend.
///
/// Fails before any network I/O when the backend is missing or has no token.
pub fn build_engine<'a>(db: &'a Database, config: &ClientConfig) -> Result<LocalEngine<'a>, CliError> {
    let remote = RemoteBackend::from_config(config)?;
    Ok(SyncEngine::new(
        LibSqlRecordStore::new(db.connection()),
        remote,
        LibSqlCursorStore::new(db.connection()),
    )
    .with_config(SyncConfig::from(config)))
}

pub fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn note_preview(note: &Note, max_chars: usize) -> String {
    let preview = note.title_preview(usize::MAX);
    let collapsed = preview.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let mut truncated: String = collapsed.chars().take(max_chars.saturating_sub(3)).collect();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_note_lines(notes: &[Note], now: Timestamp) -> Vec<String> {
    notes
        .iter()
        .map(|note| {
            let id = short_id(note.id.as_str());
            let marker = if note.is_folder { "/" } else { " " };
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.updated_at, now);
            format!("{id:<13} {marker} {preview:<40}  {relative_time}")
        })
        .collect()
}

pub fn note_to_list_item(note: &Note, now: Timestamp) -> NoteListItem {
    NoteListItem {
        id: note.id.to_string(),
        parent_id: note.parent_id.as_ref().map(ToString::to_string),
        title: note.title.clone(),
        preview: note_preview(note, 80),
        is_folder: note.is_folder,
        updated_at: note.updated_at.as_millis(),
        relative_time: format_relative_time(note.updated_at, now),
    }
}

pub fn format_relative_time(timestamp: Timestamp, now: Timestamp) -> String {
    let diff = now.as_millis().saturating_sub(timestamp.as_millis());
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < year {
        format!("{}w ago", diff / week)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn format_timestamp(timestamp: Timestamp) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp.as_millis()).map_or_else(
        || timestamp.as_millis().to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = Vec::with_capacity(report.entities.len() + 2);
    let summary = report.summary;
    if report.is_success() {
        lines.push(format!(
            "Sync completed: {} uploaded, {} downloaded, {} deleted",
            summary.uploaded, summary.downloaded, summary.deleted
        ));
    } else {
        lines.push(format!(
            "Sync failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        ));
    }

    for entity in &report.entities {
        let name = entity.entity.map_or_else(|| "-".to_string(), |kind| kind.to_string());
        let cursor = entity
            .cursor
            .map_or_else(|| "never".to_string(), format_timestamp);
        lines.push(format!(
            "  {name:<16} +{} ~{} ^{} x{}  cursor {cursor}",
            entity.inserted, entity.updated, entity.uploaded, entity.deleted
        ));
    }

    if report.failed > 0 {
        lines.push(format!(
            "{} record(s) could not be applied and will be retried next pass",
            report.failed
        ));
    }
    lines
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  {}={}  local={} incoming={}",
                format_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.entity,
                conflict.record_key,
                conflict.local_updated_at.as_millis(),
                conflict.incoming_updated_at.as_millis()
            )
        })
        .collect()
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        entity: conflict.entity.to_string(),
        record_key: conflict.record_key.to_string(),
        local_updated_at: conflict.local_updated_at.as_millis(),
        incoming_updated_at: conflict.incoming_updated_at.as_millis(),
        resolved_at: conflict.resolved_at.as_millis(),
        resolved_at_iso: conflict.resolved_at.to_rfc3339(),
        strategy: conflict.strategy.clone(),
    }
}
