/// # gdrive-sync CLI Interface (Module)
///
/// Command parsing and the async entrypoint of the `gdrive-sync` binary.
///
/// All sync logic lives in the [`gdrive-sync-core`] crate; this module only wires
/// configuration, the Drive client and the AVIF codec together and reports the result.
///
/// ## How To Use
/// - For command-line users: `gdrive-sync sync [--config gdrive-sync.yaml]`.
/// - For programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`gdrive-sync-core`]: ../../gdrive_sync_core/
use crate::load_config::load_config;
use anyhow::Result;
use clap::{Parser, Subcommand};
use gdrive_sync_core::drive::DriveClient;
use gdrive_sync_core::image_codec::AvifCodec;
use gdrive_sync_core::synchronise::{synchronise, SyncReport};
use std::path::PathBuf;
use std::sync::Arc;

/// CLI for gdrive-sync: mirror a Google Drive folder of Docs into Hugo Markdown.
#[derive(Parser)]
#[clap(
    name = "gdrive-sync",
    version,
    about = "Incrementally mirror Google Docs from a Drive folder into Markdown for a static site"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one incremental sync of the folder named by GOOGLE_DRIVE_PARENT_ID
    Sync {
        /// Optional YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// Async CLI entrypoint for integration tests and main().
///
/// Returns the run report; the caller maps failed items to the exit status.
pub async fn run(cli: Cli) -> Result<SyncReport> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config } => {
            let config = load_config(config.as_deref())?;
            tracing::info!(command = "sync", "Starting synchronisation process");

            let source = DriveClient::connect(config.credentials, config.sync.retry.clone())
                .await
                .map_err(|e| anyhow::anyhow!("Could not authenticate against Drive: {e}"))?;
            let codec = AvifCodec::new(&config.sync.image);

            match synchronise(&config.sync, Arc::new(source), Arc::new(codec)).await {
                Ok(report) => {
                    log_summary(&report);
                    Ok(report)
                }
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, "Synchronisation failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
    }
}

fn log_summary(report: &SyncReport) {
    let summary = &report.summary;
    let sep = "-".repeat(30);
    let block = format!(
        "\n{sep}\nConversion Summary:\n  Run: {}\n  Duration: {:.2} seconds\n  Total Files Found: {}\n  Successfully Processed (Overall): {}\n  Successfully Processed (Public, non-draft): {}\n  Skipped (Up-to-date): {}\n  Failed: {}\n  Deleted: {} ({} public)\n  Deploy marker: {}\n{sep}",
        report.run_id,
        report.duration.as_secs_f64(),
        report.remote_items,
        summary.success,
        summary.public_updated,
        summary.skipped,
        summary.failed,
        report.deleted.len(),
        summary.deleted_public_count,
        if report.marker_present { "present" } else { "absent" },
    );
    tracing::info!("{block}");
    for item in report.items.iter().filter(|item| item.status.is_failure()) {
        tracing::error!(file_id = %item.id, status = %item.status, "Item failed");
    }
}
