use std::path::Path;

use loam_core::db::{LibSqlNoteRepository, NoteRepository};
use loam_core::{Note, Timestamp};

use crate::commands::common::{format_note_lines, note_to_list_item, open_database, NoteListItem};
use crate::error::CliError;

pub async fn list_notes(
    limit: usize,
    parent: Option<&str>,
    db_path: &Path,
) -> Result<Vec<Note>, CliError> {
    let db = open_database(db_path).await?;
    let repo = LibSqlNoteRepository::new(db.connection());

    let notes = match parent {
        Some(parent) => {
            let folder = repo.resolve(parent).await?;
            let mut children = repo.list_children(&folder.id).await?;
            children.truncate(limit);
            children
        }
        None => repo.list(limit).await?,
    };
    Ok(notes)
}

pub async fn run_list(
    limit: usize,
    parent: Option<&str>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let notes = list_notes(limit, parent, db_path).await?;
    let now = Timestamp::now();

    if as_json {
        let items = notes
            .iter()
            .map(|note| note_to_list_item(note, now))
            .collect::<Vec<NoteListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if notes.is_empty() {
        println!("No notes yet.");
    } else {
        for line in format_note_lines(&notes, now) {
            println!("{line}");
        }
    }

    Ok(())
}
