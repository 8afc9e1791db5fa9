/// `load_config` module: Builds the core [`SyncConfig`] and Drive credentials from an optional YAML file plus the environment.
///
/// This is the only place where user-supplied YAML and environment variables are read.
///
/// # Responsibilities
/// - Require `GOOGLE_DRIVE_PARENT_ID` before anything else is attempted
/// - Parse the optional YAML file; every key has a default, unknown keys are rejected
/// - Pick Drive credentials: `GOOGLE_DRIVE_ACCESS_TOKEN` first, then `GOOGLE_APPLICATION_CREDENTIALS`
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary as a fatal startup condition.
use anyhow::{bail, Context, Result};
use gdrive_sync_core::config::{ImageConfig, RetryConfig, SyncConfig};
use gdrive_sync_core::drive::DriveCredentials;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const ENV_PARENT_ID: &str = "GOOGLE_DRIVE_PARENT_ID";
pub const ENV_ACCESS_TOKEN: &str = "GOOGLE_DRIVE_ACCESS_TOKEN";
pub const ENV_CREDENTIALS_FILE: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// YAML-side settings. Absent keys keep the core defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub output_dir: Option<PathBuf>,
    pub marker_path: Option<PathBuf>,
    pub timezone: Option<String>,
    pub workers: Option<usize>,
    pub image: ImageConfig,
    pub retry: RetryConfig,
}

#[derive(Debug)]
pub struct CliConfig {
    pub sync: SyncConfig,
    pub credentials: DriveCredentials,
}

/// Read and parse the YAML config at `path`.
pub fn read_file_config(path: &Path) -> Result<FileConfig> {
    info!(config_path = ?path, "Loading configuration from file");
    let content = fs::read_to_string(path).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path, e)
    })?;
    if content.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })
}

fn non_blank_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Drive credentials from the environment.
pub fn credentials_from_env() -> Result<DriveCredentials> {
    if let Some(token) = non_blank_env(ENV_ACCESS_TOKEN) {
        return Ok(DriveCredentials::AccessToken(token));
    }
    if let Some(path) = non_blank_env(ENV_CREDENTIALS_FILE) {
        return Ok(DriveCredentials::ServiceAccountKey(PathBuf::from(path)));
    }
    bail!("No Drive credentials: set {ENV_ACCESS_TOKEN} or {ENV_CREDENTIALS_FILE}")
}

/// Reject backoff settings that can not produce a sane schedule.
pub fn validate_retry(retry: RetryConfig) -> Result<RetryConfig> {
    if retry.max_attempts == 0 {
        bail!("retry.max_attempts must be at least 1");
    }
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        bail!(
            "retry.multiplier must be a finite number of at least 1.0, got {}",
            retry.multiplier
        );
    }
    Ok(retry)
}

/// Build the full CLI configuration.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let Some(root_folder_id) = non_blank_env(ENV_PARENT_ID) else {
        error!(env = ENV_PARENT_ID, "Required environment variable missing");
        bail!("{ENV_PARENT_ID} environment variable is not set");
    };

    let file = match path {
        Some(path) => read_file_config(path)
            .with_context(|| format!("Invalid configuration file {}", path.display()))?,
        None => FileConfig::default(),
    };

    let mut sync = SyncConfig::new(root_folder_id);
    if let Some(output_dir) = file.output_dir {
        sync.output_dir = output_dir;
    }
    if let Some(marker_path) = file.marker_path {
        sync.marker_path = marker_path;
    }
    if let Some(timezone) = file.timezone {
        sync.timezone = timezone;
    }
    if let Some(workers) = file.workers {
        if workers == 0 {
            bail!("workers must be at least 1");
        }
        sync.workers = workers;
    }
    sync.image = file.image;
    sync.retry = validate_retry(file.retry)?;

    let credentials = credentials_from_env()?;
    sync.trace_loaded();
    Ok(CliConfig { sync, credentials })
}
