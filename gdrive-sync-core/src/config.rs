use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_OUTPUT_DIR: &str = "content/posts/google-drive";
pub const DEFAULT_MARKER_PATH: &str = ".content-updated";
pub const DEFAULT_TIMEZONE: &str = "Asia/Tokyo";

/// Everything one sync run needs. Built by the CLI from file + environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Drive folder id at the root of the mirrored tree.
    pub root_folder_id: String,
    /// Directory holding one `<id>.md` artifact per document.
    pub output_dir: PathBuf,
    /// Sentinel whose presence means "public content changed, deploy".
    pub marker_path: PathBuf,
    /// IANA zone name that `date`/`lastmod` are normalised to.
    pub timezone: String,
    /// Upper bound on concurrently running item pipelines.
    pub workers: usize,
    pub image: ImageConfig,
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Config with every optional setting at its default.
    pub fn new(root_folder_id: impl Into<String>) -> Self {
        Self {
            root_folder_id: root_folder_id.into(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            marker_path: PathBuf::from(DEFAULT_MARKER_PATH),
            timezone: DEFAULT_TIMEZONE.to_string(),
            workers: default_workers(),
            image: ImageConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            root_folder_id = %self.root_folder_id,
            output_dir = %self.output_dir.display(),
            marker_path = %self.marker_path.display(),
            timezone = %self.timezone,
            workers = self.workers,
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}

/// Number of workers when none is configured: one per available core.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Embedded image recompression settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Images wider than this are downscaled proportionally.
    pub max_width: u32,
    /// AVIF quality, 1-100.
    pub quality: u8,
    /// AVIF encoder speed, 1 (slowest) - 10 (fastest).
    pub speed: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_width: 800,
            quality: 50,
            speed: 6,
        }
    }
}

/// Exponential backoff policy for transient remote errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            multiplier: 2.0,
        }
    }
}

/// Load the named zone, falling back to UTC when it is unknown.
pub fn resolve_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(e) => {
            warn!(timezone = name, error = %e, "Could not load timezone, using UTC as fallback");
            Tz::UTC
        }
    }
}
