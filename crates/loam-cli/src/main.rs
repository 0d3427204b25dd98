//! loam CLI - offline-first notes from the terminal
//!
//! Notes are written to the local database immediately; `loam sync` and
//! `loam watch` reconcile them with the configured backend.

mod cli;
mod commands;
mod error;

use clap::{CommandFactory, Parser};

use crate::cli::{Cli, Commands};
use crate::commands::add::{run_add, AddOptions};
use crate::commands::common::resolve_db_path;
use crate::commands::conflicts::run_conflicts;
use crate::commands::delete::run_delete;
use crate::commands::list::run_list;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(
            "loam=info"
                .parse()
                .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?,
        );
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path)?;
    let config_path = cli.config.as_deref();

    match cli.command {
        Some(Commands::Add {
            parent,
            folder,
            title,
            content,
        }) => {
            let options = AddOptions {
                parent: parent.as_deref(),
                folder,
                title: title.as_deref(),
            };
            run_add(&content, options, &db_path).await?;
        }
        Some(Commands::List {
            limit,
            parent,
            json,
        }) => run_list(limit, parent.as_deref(), json, &db_path).await?,
        Some(Commands::Delete { id }) => run_delete(&id, &db_path).await?,
        Some(Commands::Sync { json }) => run_sync(config_path, json, &db_path).await?,
        Some(Commands::Watch { interval }) => run_watch(config_path, interval, &db_path).await?,
        Some(Commands::Status { json }) => run_status(config_path, json, &db_path).await?,
        Some(Commands::Conflicts { limit, json }) => run_conflicts(limit, json, &db_path).await?,
        None => {
            // Quick capture mode: loam "my thought"
            if cli.note.is_empty() {
                Cli::command().print_help()?;
                println!();
            } else {
                run_add(&cli.note, AddOptions::default(), &db_path).await?;
            }
        }
    }

    Ok(())
}
