use std::path::Path;

use loam_core::db::LibSqlRecordStore;

use crate::commands::common::{
    format_sync_conflict_lines, open_database, sync_conflict_to_item, SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_conflicts(limit: usize, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let conflicts = LibSqlRecordStore::new(db.connection())
        .list_conflicts(limit)
        .await?;

    if as_json {
        let items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
