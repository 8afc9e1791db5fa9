use clap::Parser;
use gdrive_sync::cli::{run, Cli};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    match run(cli).await {
        Ok(report) if report.is_success() => {
            tracing::info!("Conversion completed successfully");
            ExitCode::SUCCESS
        }
        Ok(report) => {
            tracing::error!(
                failed = report.summary.failed,
                "Exiting with error code 1 due to processing failures"
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "CLI exited with error");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
