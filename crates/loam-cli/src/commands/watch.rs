use std::path::Path;
use std::time::Duration;

use loam_core::sync::run_periodic;

use crate::commands::common::{build_engine, load_client_config, open_database};
use crate::error::CliError;

pub async fn run_watch(
    config_path: Option<&Path>,
    interval_secs: Option<u64>,
    db_path: &Path,
) -> Result<(), CliError> {
    let config = load_client_config(config_path)?;
    config.validate()?;

    let db = open_database(db_path).await?;
    let engine = build_engine(&db, &config)?;
    let interval = interval_secs.map_or_else(|| config.sync_interval(), |secs| Duration::from_secs(secs.max(1)));

    let _subscription = engine.on_synced(|summary| {
        if !summary.is_empty() {
            println!(
                "Synced: {} uploaded, {} downloaded, {} deleted",
                summary.uploaded, summary.downloaded, summary.deleted
            );
        }
    });

    println!(
        "Syncing every {}s; press Ctrl-C to stop",
        interval.as_secs()
    );
    let shutdown = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {error}");
        }
    };
    let passes = run_periodic(&engine, interval, shutdown).await;

    println!("Stopped after {passes} pass(es)");
    Ok(())
}
