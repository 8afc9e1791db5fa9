//! Per-item workflow: cache check → export → transform → persist.
//!
//! [`ItemPipeline::run`] never fails: every failure is folded into the
//! returned [`SyncOutcome`] so that one document can not take down its
//! siblings.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn, Span};

use crate::cache::{check_cache, CacheDecision};
use crate::contract::{DocumentSource, RemoteItem};
use crate::frontmatter::{self, get_str, Document, FrontmatterError};
use crate::metadata::{
    drop_nulls, is_draft, MetadataReconciler, KEY_CONVERSION_ERROR, KEY_TITLE,
};
use crate::transform::ContentTransform;

/// Artifact file extension.
pub const ARTIFACT_EXTENSION: &str = "md";

/// Terminal state of one item in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Skipped,
    Success,
    InitError,
    DownloadError,
    ProcessError,
    SaveError,
    UnknownError,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Skipped => "skipped",
            SyncStatus::Success => "success",
            SyncStatus::InitError => "init_error",
            SyncStatus::DownloadError => "download_error",
            SyncStatus::ProcessError => "process_error",
            SyncStatus::SaveError => "save_error",
            SyncStatus::UnknownError => "unknown_error",
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, SyncStatus::Skipped | SyncStatus::Success)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub status: SyncStatus,
    /// Whether the artifact on disk is publicly visible. False on every error
    /// path reached before final metadata exists.
    pub is_public: bool,
}

impl SyncOutcome {
    pub fn new(status: SyncStatus, is_public: bool) -> Self {
        Self { status, is_public }
    }

    pub fn failed(status: SyncStatus) -> Self {
        Self::new(status, false)
    }
}

/// `<output_dir>/<id>.md`
pub fn artifact_path(output_dir: &Path, id: &str) -> PathBuf {
    output_dir.join(format!("{id}.{ARTIFACT_EXTENSION}"))
}

/// Shared, cheaply cloneable per-item processor.
#[derive(Clone)]
pub struct ItemPipeline {
    source: Arc<dyn DocumentSource>,
    transform: ContentTransform,
    reconciler: MetadataReconciler,
    output_dir: PathBuf,
}

impl ItemPipeline {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        transform: ContentTransform,
        reconciler: MetadataReconciler,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            transform,
            reconciler,
            output_dir: output_dir.into(),
        }
    }

    pub async fn run(&self, item: &RemoteItem) -> SyncOutcome {
        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            error!(file_id = %item.id, error = ?e, dir = %self.output_dir.display(), "[ITEM][ERROR] Could not create output directory");
            return SyncOutcome::failed(SyncStatus::InitError);
        }
        let path = artifact_path(&self.output_dir, &item.id);

        let span = Span::current();
        let (id, cached_path, remote) = (item.id.clone(), path.clone(), item.modified_at.clone());
        let cache = tokio::task::spawn_blocking(move || {
            span.in_scope(|| check_cache(&id, &cached_path, remote.as_deref()))
        })
        .await
        .unwrap_or_else(|e| {
            warn!(file_id = %item.id, error = ?e, "[CACHE] Cache check aborted, reprocessing");
            CacheDecision::default()
        });
        if cache.skip {
            return SyncOutcome::new(SyncStatus::Skipped, cache.is_public);
        }

        info!(file_id = %item.id, name = %item.name, "[ITEM] Exporting document");
        let exported = match self.source.export_text(&item.id).await {
            Ok(text) => text,
            Err(e) => {
                error!(file_id = %item.id, error = %e, "[ITEM][ERROR] Export failed");
                return SyncOutcome::failed(SyncStatus::DownloadError);
            }
        };

        let reconciler = self.reconciler;
        let transform = self.transform.clone();
        let owned_item = item.clone();
        let rendered = tokio::task::spawn_blocking(move || {
            render_artifact(&reconciler, &transform, &owned_item, &exported)
        })
        .await;
        let content = match rendered {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => {
                error!(file_id = %item.id, error = %e, "[ITEM][ERROR] Could not parse exported frontmatter");
                return SyncOutcome::failed(SyncStatus::ProcessError);
            }
            Err(e) => {
                error!(file_id = %item.id, error = ?e, "[ITEM][ERROR] Processing task aborted");
                return SyncOutcome::failed(SyncStatus::UnknownError);
            }
        };

        let is_public = match frontmatter::parse(&content) {
            Ok(doc) => !is_draft(&doc.metadata),
            Err(e) => {
                warn!(file_id = %item.id, error = %e, "[ITEM] Rendered artifact does not re-parse, assuming draft");
                false
            }
        };

        let (dir, target) = (self.output_dir.clone(), path.clone());
        let written = tokio::task::spawn_blocking(move || write_atomically(&dir, &target, &content))
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e)));
        if let Err(e) = written {
            error!(file_id = %item.id, path = %path.display(), error = ?e, "[ITEM][ERROR] Could not save artifact");
            return SyncOutcome::new(SyncStatus::SaveError, is_public);
        }
        info!(file_id = %item.id, path = %path.display(), is_public, "[ITEM] Saved artifact");
        SyncOutcome::new(SyncStatus::Success, is_public)
    }
}

/// Produce the final artifact text for an exported document.
///
/// Fails only when the exported text's own frontmatter can not be parsed.
/// Serialisation failures produce a minimal fallback artifact instead.
pub fn render_artifact(
    reconciler: &MetadataReconciler,
    transform: &ContentTransform,
    item: &RemoteItem,
    exported: &str,
) -> Result<String, FrontmatterError> {
    let mut doc = frontmatter::parse(exported)?;
    reconciler.reconcile(&mut doc.metadata, item);

    let output = transform.apply(&item.id, &doc.body);
    if let Some(message) = output.conversion_error() {
        doc.metadata
            .insert(KEY_CONVERSION_ERROR.into(), message.into());
    }
    let doc = Document {
        metadata: drop_nulls(doc.metadata),
        body: output.body,
    };

    match frontmatter::render(&doc) {
        Ok(content) => Ok(content),
        Err(e) => {
            error!(file_id = %item.id, error = %e, "[ITEM][ERROR] Could not serialise frontmatter, writing fallback artifact");
            Ok(fallback_artifact(&doc, item, &e.to_string()))
        }
    }
}

/// Minimal hand-written artifact used when the full metadata can not be
/// serialised.
pub fn fallback_artifact(doc: &Document, item: &RemoteItem, reason: &str) -> String {
    let title = get_str(&doc.metadata, KEY_TITLE).unwrap_or("ERROR");
    let modified_at = item.modified_at.as_deref().unwrap_or("ERROR");
    format!(
        "---\ntitle: {}\nsource_id: {}\nsource_modified_at: {}\nconversion_error: {}\n---\n\n{}",
        single_quoted(title),
        single_quoted(&item.id),
        single_quoted(modified_at),
        single_quoted(&format!("CRITICAL DUMP ERROR - {reason}")),
        doc.body
    )
}

fn single_quoted(value: &str) -> String {
    let flat = value.replace(['\r', '\n'], " ");
    format!("'{}'", flat.replace('\'', "''"))
}

fn write_atomically(dir: &Path, path: &Path, content: &str) -> std::io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), bytes = content.len(), "Artifact written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockImageCodec;
    use chrono_tz::Tz;

    fn item() -> RemoteItem {
        RemoteItem::document(
            "doc1",
            "My Post",
            Some("2024-01-01T00:00:00Z"),
            Some("2024-02-02T03:04:05.000Z"),
        )
    }

    fn render(exported: &str) -> Result<String, FrontmatterError> {
        render_artifact(
            &MetadataReconciler::new(Tz::Asia__Tokyo),
            &ContentTransform::new(Arc::new(MockImageCodec::new())),
            &item(),
            exported,
        )
    }

    #[test]
    fn status_names_are_snake_case() {
        assert_eq!(SyncStatus::DownloadError.to_string(), "download_error");
        assert_eq!(
            serde_json::to_string(&SyncStatus::UnknownError).unwrap(),
            "\"unknown_error\""
        );
        assert!(!SyncStatus::Skipped.is_failure());
        assert!(SyncStatus::SaveError.is_failure());
    }

    #[test]
    fn rendered_artifact_carries_canonical_metadata() {
        let content = render("---\ndraft: true\nconversion_error: old\n---\n\\> quote\n").unwrap();
        let doc = frontmatter::parse(&content).unwrap();
        assert_eq!(get_str(&doc.metadata, "title"), Some("My Post"));
        assert_eq!(get_str(&doc.metadata, "source_id"), Some("doc1"));
        assert_eq!(
            get_str(&doc.metadata, "source_modified_at"),
            Some("2024-02-02T03:04:05.000Z")
        );
        assert_eq!(get_str(&doc.metadata, "date"), Some("2024-01-01 09:00:00 +0900"));
        assert_eq!(get_str(&doc.metadata, "lastmod"), Some("2024-02-02 12:04:05 +0900"));
        assert!(is_draft(&doc.metadata));
        assert!(doc.metadata.get("conversion_error").is_none());
        assert_eq!(doc.body, "> quote\n");
    }

    #[test]
    fn unparsable_input_frontmatter_is_an_error() {
        assert!(render("---\ntitle: [broken\n---\nbody").is_err());
    }

    #[test]
    fn fallback_artifact_is_valid_frontmatter() {
        let doc = Document {
            metadata: Default::default(),
            body: "body".into(),
        };
        let content = fallback_artifact(&doc, &item(), "it's broken");
        let parsed = frontmatter::parse(&content).unwrap();
        assert_eq!(get_str(&parsed.metadata, "title"), Some("ERROR"));
        assert_eq!(get_str(&parsed.metadata, "source_id"), Some("doc1"));
        assert_eq!(
            get_str(&parsed.metadata, "conversion_error"),
            Some("CRITICAL DUMP ERROR - it's broken")
        );
        assert_eq!(parsed.body, "body");
    }
}
