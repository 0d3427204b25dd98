use std::path::Path;

use crate::commands::common::{build_engine, format_report_lines, load_client_config, open_database};
use crate::error::CliError;

pub async fn run_sync(
    config_path: Option<&Path>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let config = load_client_config(config_path)?;
    // Validate before touching the database
    config.validate()?;

    let db = open_database(db_path).await?;
    let engine = build_engine(&db, &config)?;
    let report = engine.sync().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_report_lines(&report) {
            println!("{line}");
        }
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::SyncFailed(
            report.error.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }
}
