//! High-level orchestration: one incremental sync run, Drive folder → Markdown directory.
//!
//! This module provides the top-level coordination of a run. It:
//!   - Enumerates every document under the configured root folder ([`TraversalEngine`])
//!   - Deletes local artifacts whose document disappeared remotely ([`reconcile`])
//!   - Fans one [`ItemPipeline`] per document out over a bounded worker pool
//!   - Aggregates per-item outcomes into a [`RunSummary`] in completion order
//!   - Creates or removes the deploy-trigger marker
//!
//! # Major Types
//! - [`RunSummary`]: aggregate counters driving the exit code and the marker
//! - [`SyncReport`]: the summary plus per-item outcomes, deletions and timing
//!
//! # Error Handling
//! Only an unreachable root folder fails the run as a whole ([`SyncError`]).
//! Every per-item failure, including a panicking worker, is recorded as an
//! outcome and counted; siblings are never cancelled. Marker I/O errors are
//! logged.
//!
//! # Logging
//! All diagnostics of a run sit under a `sync_run` span carrying a fresh
//! `run_id`; each worker runs under a child `item` span carrying `file_id`.
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`]

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::{resolve_timezone, SyncConfig};
use crate::contract::{DocumentSource, ImageCodec};
use crate::metadata::MetadataReconciler;
use crate::pipeline::{ItemPipeline, SyncOutcome, SyncStatus};
use crate::reconcile::{reconcile, ReconcileReport};
use crate::transform::ContentTransform;
use crate::traversal::{TraversalEngine, TraversalError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Traversal(#[from] TraversalError),
}

/// Aggregate counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Successes whose artifact is public.
    pub public_updated: usize,
    /// Deleted artifacts that were public.
    pub deleted_public_count: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &SyncOutcome) {
        self.total += 1;
        match outcome.status {
            SyncStatus::Success => {
                self.success += 1;
                if outcome.is_public {
                    self.public_updated += 1;
                }
            }
            SyncStatus::Skipped => self.skipped += 1,
            _ => self.failed += 1,
        }
    }

    /// Public content changed in this run.
    pub fn should_trigger_deploy(&self) -> bool {
        self.public_updated > 0 || self.deleted_public_count > 0
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub id: String,
    pub status: SyncStatus,
    pub is_public: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub remote_items: usize,
    pub summary: RunSummary,
    /// Per-item outcomes in completion order.
    pub items: Vec<ItemReport>,
    /// Ids whose local artifact was deleted.
    pub deleted: Vec<String>,
    pub marker_present: bool,
    pub duration: Duration,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }

    pub fn outcome_of(&self, id: &str) -> Option<&ItemReport> {
        self.items.iter().find(|item| item.id == id)
    }
}

/// Run one sync against `source`, writing artifacts under `config.output_dir`.
pub async fn synchronise(
    config: &SyncConfig,
    source: Arc<dyn DocumentSource>,
    codec: Arc<dyn ImageCodec>,
) -> Result<SyncReport, SyncError> {
    let run_id = Uuid::new_v4();
    let span = info_span!("sync_run", %run_id, root_folder_id = %config.root_folder_id);
    run(config, source, codec, run_id).instrument(span).await
}

async fn run(
    config: &SyncConfig,
    source: Arc<dyn DocumentSource>,
    codec: Arc<dyn ImageCodec>,
    run_id: Uuid,
) -> Result<SyncReport, SyncError> {
    let started = Instant::now();
    info!(output_dir = %config.output_dir.display(), "[SYNC] Starting incremental sync");

    // --- Step 1: Traverse ---
    let items = TraversalEngine::new(source.clone())
        .list_documents(&config.root_folder_id)
        .await?;
    let remote_ids: HashSet<String> = items.iter().map(|item| item.id.clone()).collect();
    let remote_items = remote_ids.len();
    info!(documents = items.len(), "[SYNC] Remote documents discovered");

    // --- Step 2: Delete orphaned artifacts ---
    let span = Span::current();
    let output_dir = config.output_dir.clone();
    let scanned = tokio::task::spawn_blocking(move || {
        span.in_scope(|| reconcile(&output_dir, &remote_ids))
    })
    .await
    .unwrap_or_else(|e| Err(std::io::Error::other(e)));
    let cleanup = match scanned {
        Ok(report) => report,
        Err(e) => {
            error!(error = ?e, dir = %config.output_dir.display(), "[SYNC][ERROR] Could not scan output directory, skipping cleanup");
            ReconcileReport::default()
        }
    };

    let mut summary = RunSummary {
        deleted_public_count: cleanup.deleted_public_count,
        ..RunSummary::default()
    };
    let mut reports = Vec::with_capacity(items.len());

    // --- Step 3: Fan out ---
    if items.is_empty() && cleanup.deleted_public_count == 0 {
        info!("[SYNC] No documents to process and no public deletions");
    } else {
        let pipeline = ItemPipeline::new(
            source,
            ContentTransform::new(codec),
            MetadataReconciler::new(resolve_timezone(&config.timezone)),
            config.output_dir.clone(),
        );
        let workers = config.workers.max(1);
        info!(documents = items.len(), workers, "[SYNC] Submitting documents for processing");

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut pending = FuturesUnordered::new();
        for item in items {
            let id = item.id.clone();
            let pipeline = pipeline.clone();
            let semaphore = semaphore.clone();
            let item_span = info_span!("item", file_id = %item.id);
            let handle = tokio::spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return SyncOutcome::failed(SyncStatus::UnknownError);
                    };
                    pipeline.run(&item).await
                }
                .instrument(item_span),
            );
            pending.push(async move { (id, handle.await) });
        }

        while let Some((id, joined)) = pending.next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(file_id = %id, error = ?e, "[SYNC][ERROR] Worker aborted");
                    SyncOutcome::failed(SyncStatus::UnknownError)
                }
            };
            if outcome.status.is_failure() {
                error!(file_id = %id, status = %outcome.status, "[SYNC][ERROR] Processing failed");
            }
            summary.record(&outcome);
            reports.push(ItemReport {
                id,
                status: outcome.status,
                is_public: outcome.is_public,
            });
        }
    }

    // --- Step 4: Deploy marker ---
    let span = Span::current();
    let marker_path = config.marker_path.clone();
    let wanted = summary.should_trigger_deploy();
    let marker_present = tokio::task::spawn_blocking(move || {
        span.in_scope(|| update_marker(&marker_path, wanted))
    })
    .await
    .unwrap_or_else(|e| {
        error!(error = ?e, "[MARKER][ERROR] Marker update aborted");
        false
    });

    let duration = started.elapsed();
    info!(
        duration_ms = duration.as_millis() as u64,
        total = summary.total,
        success = summary.success,
        public_updated = summary.public_updated,
        skipped = summary.skipped,
        failed = summary.failed,
        deleted = cleanup.deleted.len(),
        deleted_public = summary.deleted_public_count,
        marker_present,
        "[SYNC] Run complete"
    );

    Ok(SyncReport {
        run_id,
        remote_items,
        summary,
        items: reports,
        deleted: cleanup.deleted,
        marker_present,
        duration,
    })
}

/// Create the marker when `wanted`, remove it otherwise. Returns whether it
/// exists afterwards.
pub fn update_marker(marker_path: &Path, wanted: bool) -> bool {
    if wanted {
        let touched = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(marker_path);
        match touched {
            Ok(_) => info!(marker = %marker_path.display(), "[MARKER] Public content changed, marker created"),
            Err(e) => error!(marker = %marker_path.display(), error = ?e, "[MARKER][ERROR] Could not create marker"),
        }
    } else if marker_path.exists() {
        match std::fs::remove_file(marker_path) {
            Ok(()) => info!(marker = %marker_path.display(), "[MARKER] No public changes, stale marker removed"),
            Err(e) => warn!(marker = %marker_path.display(), error = ?e, "[MARKER] Could not remove stale marker"),
        }
    } else {
        info!("[MARKER] No public changes");
    }
    marker_path.exists()
}
