use std::path::Path;

use loam_core::db::{LibSqlNoteRepository, NoteRepository};

use crate::commands::common::open_database;
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let repo = LibSqlNoteRepository::new(db.connection());
    let note = repo.resolve(id).await?;

    repo.delete(&note.id).await?;
    println!("{}", note.id);
    Ok(())
}
