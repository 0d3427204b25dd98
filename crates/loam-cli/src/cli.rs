use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "loam")]
#[command(about = "Offline-first notes with two-way cloud sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the client config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Quick capture: loam "my thought here"
    #[arg(trailing_var_arg = true)]
    pub note: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new note or folder
    #[command(alias = "new")]
    Add {
        /// Folder ID or unique ID prefix to file the note under
        #[arg(long, value_name = "KEY")]
        parent: Option<String>,
        /// Create a folder instead of a note
        #[arg(long)]
        folder: bool,
        /// Optional title
        #[arg(long)]
        title: Option<String>,
        /// Note content (folder title when --folder is set)
        content: Vec<String>,
    },
    /// List recent notes
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Only notes inside this folder
        #[arg(long, value_name = "KEY")]
        parent: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a note (synced as a tombstone)
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Run one sync pass against the configured backend
    Sync {
        /// Output the pass report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync periodically until interrupted
    Watch {
        /// Seconds between passes (defaults to the configured interval)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
    /// Show local record counts and sync cursors
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent last-write-wins conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
