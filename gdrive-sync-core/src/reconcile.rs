//! Deletion of local artifacts whose document no longer exists remotely.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::cache::{read_cached, CachedArtifact};
use crate::metadata::is_draft;
use crate::pipeline::{artifact_path, ARTIFACT_EXTENSION};

/// Ids that may name an artifact. Anything else in the output directory is
/// left alone.
const ARTIFACT_ID_PATTERN: &str = r"^[a-zA-Z0-9_-]+$";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Artifacts with a valid id found on disk.
    pub scanned: usize,
    /// Ids whose artifact was removed.
    pub deleted: Vec<String>,
    /// Removed artifacts that were public.
    pub deleted_public_count: usize,
    pub failed_deletions: usize,
    /// Artifact-looking files skipped for an invalid id.
    pub ignored: usize,
}

/// Whether an artifact on disk is public. Unreadable means draft.
fn is_public_on_disk(path: &Path) -> bool {
    match read_cached(path) {
        CachedArtifact::Present(metadata) => !is_draft(&metadata),
        CachedArtifact::Missing | CachedArtifact::Unreadable(_) => false,
    }
}

/// Delete every `<id>.md` in `output_dir` whose id is not in `remote_ids`.
pub fn reconcile(
    output_dir: &Path,
    remote_ids: &HashSet<String>,
) -> std::io::Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    if !output_dir.is_dir() {
        debug!(dir = %output_dir.display(), "[CLEANUP] Output directory missing, nothing to reconcile");
        return Ok(report);
    }
    let id_re = Regex::new(ARTIFACT_ID_PATTERN).map_err(std::io::Error::other)?;

    let mut local = Vec::new();
    for entry in std::fs::read_dir(output_dir)? {
        let path = entry?.path();
        if !path.is_file()
            || path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXTENSION)
        {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            report.ignored += 1;
            warn!(path = %path.display(), "[CLEANUP] Skipping non UTF-8 file name");
            continue;
        };
        if !id_re.is_match(id) {
            report.ignored += 1;
            warn!(path = %path.display(), "[CLEANUP] Skipping file with unexpected name");
            continue;
        }
        local.push(id.to_string());
    }
    report.scanned = local.len();
    local.sort();

    for id in local.into_iter().filter(|id| !remote_ids.contains(id)) {
        let path = artifact_path(output_dir, &id);
        let was_public = is_public_on_disk(&path);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(file_id = %id, was_public, "[CLEANUP] Deleted artifact no longer present remotely");
                if was_public {
                    report.deleted_public_count += 1;
                }
                report.deleted.push(id);
            }
            Err(e) => {
                error!(file_id = %id, error = ?e, "[CLEANUP][ERROR] Could not delete artifact");
                report.failed_deletions += 1;
            }
        }
    }

    info!(
        scanned = report.scanned,
        deleted = report.deleted.len(),
        deleted_public = report.deleted_public_count,
        failed = report.failed_deletions,
        "[CLEANUP] Reconciliation complete"
    );
    Ok(report)
}
