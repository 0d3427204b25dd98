use std::path::Path;

use loam_core::db::{LibSqlNoteRepository, NoteRepository};
use loam_core::Note;

use crate::commands::common::{normalize_content, open_database, resolve_note_content};
use crate::error::CliError;

#[derive(Debug, Default, Clone, Copy)]
pub struct AddOptions<'a> {
    pub parent: Option<&'a str>,
    pub folder: bool,
    pub title: Option<&'a str>,
}

pub async fn run_add(
    content_parts: &[String],
    options: AddOptions<'_>,
    db_path: &Path,
) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let repo = LibSqlNoteRepository::new(db.connection());

    let mut note = if options.folder {
        let title = options
            .title
            .and_then(normalize_content)
            .or_else(|| normalize_content(&content_parts.join(" ")))
            .ok_or(CliError::EmptyFolderTitle)?;
        Note::folder(title)
    } else {
        let mut note = Note::new(resolve_note_content(content_parts)?);
        if let Some(title) = options.title.and_then(normalize_content) {
            note.title = title;
        }
        note
    };

    if let Some(parent) = options.parent {
        note = note.with_parent(repo.resolve(parent).await?.id);
    }

    repo.create(&note).await?;
    println!("{}", note.id);
    Ok(())
}
