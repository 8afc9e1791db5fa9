use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use gdrive_sync_core::config::SyncConfig;
use gdrive_sync_core::contract::{
    ChildEntry, ChildPage, DocumentSource, ItemKind, MockDocumentSource, MockImageCodec,
    SourceError,
};
use gdrive_sync_core::frontmatter::{self, get_str};
use gdrive_sync_core::pipeline::SyncStatus;
use gdrive_sync_core::synchronise::{synchronise, SyncError};
use tempfile::{tempdir, TempDir};

fn doc(id: &str, modified_at: &str) -> ChildEntry {
    ChildEntry {
        id: Some(id.to_string()),
        name: Some(format!("Title of {id}")),
        kind: ItemKind::Document,
        created_at: Some("2024-01-01T00:00:00Z".to_string()),
        modified_at: Some(modified_at.to_string()),
    }
}

fn listing(entries: Vec<ChildEntry>) -> MockDocumentSource {
    let mut source = MockDocumentSource::new();
    source
        .expect_list_children()
        .returning(move |_, _| {
            Ok(ChildPage {
                entries: entries.clone(),
                next_page_token: None,
            })
        });
    source
}

fn config_in(dir: &TempDir) -> SyncConfig {
    let mut config = SyncConfig::new("root");
    config.output_dir = dir.path().join("content");
    config.marker_path = dir.path().join(".content-updated");
    config.workers = 2;
    config
}

fn read_artifact(config: &SyncConfig, id: &str) -> frontmatter::Document {
    let text = std::fs::read_to_string(config.output_dir.join(format!("{id}.md"))).unwrap();
    frontmatter::parse(&text).unwrap()
}

fn write_artifact(dir: &Path, id: &str, draft: bool) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join(format!("{id}.md")),
        format!("---\ntitle: {id}\ndraft: {draft}\nsource_id: {id}\n---\n\nold body\n"),
    )
    .unwrap();
}

fn codec() -> Arc<MockImageCodec> {
    Arc::new(MockImageCodec::new())
}

#[tokio::test]
async fn first_run_writes_artifacts_and_marker() {
    let dir = tempdir().unwrap();
    let config = config_in(&dir);

    let mut source = listing(vec![
        doc("public1", "2024-02-02T03:04:05.000Z"),
        doc("draft1", "2024-02-02T03:04:05.000Z"),
    ]);
    source.expect_export_text().returning(|id| {
        if id == "draft1" {
            Ok("---\ndraft: true\n---\n\nwork in progress\n".to_string())
        } else {
            Ok("# Hello\n\n\\> quoted\n".to_string())
        }
    });

    let report = synchronise(&config, Arc::new(source), codec()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.summary.success, 2);
    assert_eq!(report.summary.public_updated, 1);
    assert!(report.marker_present);
    assert!(config.marker_path.exists());
    assert!(report.outcome_of("public1").unwrap().is_public);
    assert!(!report.outcome_of("draft1").unwrap().is_public);

    let public = read_artifact(&config, "public1");
    assert_eq!(get_str(&public.metadata, "title"), Some("Title of public1"));
    assert_eq!(get_str(&public.metadata, "source_id"), Some("public1"));
    assert_eq!(
        get_str(&public.metadata, "source_modified_at"),
        Some("2024-02-02T03:04:05.000Z")
    );
    assert!(get_str(&public.metadata, "date").unwrap().starts_with("2024-01-01"));
    assert!(get_str(&public.metadata, "lastmod").unwrap().starts_with("2024-02-02"));
    assert_eq!(public.body, "# Hello\n\n> quoted\n");
}

#[tokio::test]
async fn second_run_without_changes_skips_everything() {
    let dir = tempdir().unwrap();
    let config = config_in(&dir);

    let mut source = listing(vec![
        doc("a", "2024-02-02T03:04:05.000Z"),
        doc("b", "v7-opaque"),
    ]);
    source
        .expect_export_text()
        .times(2)
        .returning(|id| Ok(format!("body of {id}\n")));
    let source = Arc::new(source);

    let first = synchronise(&config, source.clone(), codec()).await.unwrap();
    assert_eq!(first.summary.success, 2);
    assert!(first.marker_present);

    // The deploy step consumes the marker between runs.
    std::fs::remove_file(&config.marker_path).unwrap();

    let second = synchronise(&config, source, codec()).await.unwrap();
    assert_eq!(second.summary.skipped, 2);
    assert_eq!(second.summary.success + second.summary.failed, 0);
    assert!(second.items.iter().all(|item| item.is_public));
    assert!(!second.marker_present);
    assert!(!config.marker_path.exists());
}

#[tokio::test]
async fn changed_fingerprint_is_reprocessed() {
    let dir = tempdir().unwrap();
    let config = config_in(&dir);

    let mut first_source = listing(vec![doc("a", "2024-02-02T03:04:05.000Z")]);
    first_source
        .expect_export_text()
        .returning(|_| Ok("first\n".to_string()));
    synchronise(&config, Arc::new(first_source), codec())
        .await
        .unwrap();

    let mut second_source = listing(vec![doc("a", "2024-03-03T00:00:00.000Z")]);
    second_source
        .expect_export_text()
        .times(1)
        .returning(|_| Ok("second\n".to_string()));
    let report = synchronise(&config, Arc::new(second_source), codec())
        .await
        .unwrap();

    assert_eq!(report.outcome_of("a").unwrap().status, SyncStatus::Success);
    let artifact = read_artifact(&config, "a");
    assert_eq!(
        get_str(&artifact.metadata, "source_modified_at"),
        Some("2024-03-03T00:00:00.000Z")
    );
    assert_eq!(artifact.body, "second\n");
}

#[tokio::test]
async fn failed_item_does_not_affect_siblings() {
    let dir = tempdir().unwrap();
    let config = config_in(&dir);

    let mut source = listing(vec![
        doc("item1", "2024-02-02T03:04:05Z"),
        doc("item2", "2024-02-02T03:04:05Z"),
        doc("item3", "2024-02-02T03:04:05Z"),
    ]);
    source.expect_export_text().returning(|id| {
        if id == "item2" {
            Err(SourceError::Status {
                status: 404,
                body: "not found".into(),
            })
        } else {
            Ok(format!("content of {id}\n"))
        }
    });

    let report = synchronise(&config, Arc::new(source), codec()).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.success, 2);
    assert_eq!(report.outcome_of("item1").unwrap().status, SyncStatus::Success);
    assert_eq!(
        report.outcome_of("item2").unwrap().status,
        SyncStatus::DownloadError
    );
    assert!(!report.outcome_of("item2").unwrap().is_public);
    assert_eq!(report.outcome_of("item3").unwrap().status, SyncStatus::Success);
    assert!(config.output_dir.join("item1.md").exists());
    assert!(!config.output_dir.join("item2.md").exists());
    assert!(config.output_dir.join("item3.md").exists());
}

#[tokio::test]
async fn orphaned_artifacts_are_deleted_and_counted() {
    let dir = tempdir().unwrap();
    let config = config_in(&dir);
    write_artifact(&config.output_dir, "gone_public", false);
    write_artifact(&config.output_dir, "gone-draft", true);
    write_artifact(&config.output_dir, "kept", true);
    std::fs::write(config.output_dir.join("bad name.md"), "---\ndraft: false\n---\n").unwrap();
    std::fs::write(config.output_dir.join("notes.txt"), "not an artifact").unwrap();

    let mut source = listing(vec![doc("kept", "2024-02-02T03:04:05Z")]);
    source
        .expect_export_text()
        .returning(|_| Ok("---\ndraft: true\n---\nstill a draft\n".to_string()));

    let report = synchronise(&config, Arc::new(source), codec()).await.unwrap();

    let mut deleted = report.deleted.clone();
    deleted.sort();
    assert_eq!(deleted, ["gone-draft", "gone_public"]);
    assert_eq!(report.summary.deleted_public_count, 1);
    assert_eq!(report.summary.public_updated, 0);
    assert!(report.marker_present);
    assert!(config.output_dir.join("kept.md").exists());
    assert!(config.output_dir.join("bad name.md").exists());
    assert!(config.output_dir.join("notes.txt").exists());
}

#[tokio::test]
async fn empty_remote_without_public_deletions_is_a_noop() {
    let dir = tempdir().unwrap();
    let config = config_in(&dir);
    write_artifact(&config.output_dir, "old_draft", true);
    std::fs::write(&config.marker_path, "").unwrap();

    let mut source = listing(vec![]);
    source.expect_export_text().never();

    let report = synchronise(&config, Arc::new(source), codec()).await.unwrap();

    assert!(report.is_success());
    assert!(report.items.is_empty());
    assert_eq!(report.deleted, ["old_draft"]);
    assert!(!report.marker_present);
    assert!(!config.marker_path.exists());
}

#[tokio::test]
async fn unreachable_root_aborts_before_cleanup() {
    let dir = tempdir().unwrap();
    let config = config_in(&dir);
    write_artifact(&config.output_dir, "precious", false);

    let mut source = MockDocumentSource::new();
    source.expect_list_children().returning(|_, _| {
        Err(SourceError::Status {
            status: 503,
            body: "backend error".into(),
        })
    });

    let result = synchronise(&config, Arc::new(source), codec()).await;

    assert!(matches!(result, Err(SyncError::Traversal(_))));
    assert!(config.output_dir.join("precious.md").exists());
}

#[tokio::test]
async fn broken_exported_frontmatter_is_a_process_error() {
    let dir = tempdir().unwrap();
    let config = config_in(&dir);

    let mut source = listing(vec![
        doc("broken", "2024-02-02T03:04:05Z"),
        doc("fine", "2024-02-02T03:04:05Z"),
    ]);
    source.expect_export_text().returning(|id| {
        if id == "broken" {
            Ok("---\ntitle: [x\n---\nbody\n".to_string())
        } else {
            Ok("body\n".to_string())
        }
    });

    let report = synchronise(&config, Arc::new(source), codec()).await.unwrap();

    let broken = report.outcome_of("broken").unwrap();
    assert_eq!(broken.status, SyncStatus::ProcessError);
    assert!(!broken.is_public);
    assert_eq!(report.outcome_of("fine").unwrap().status, SyncStatus::Success);
    assert_eq!(report.summary.failed, 1);
    assert!(!config.output_dir.join("broken.md").exists());
}

#[tokio::test]
async fn unwritable_artifact_path_is_a_save_error() {
    let dir = tempdir().unwrap();
    let config = config_in(&dir);
    // A directory squatting on the artifact path makes the final rename fail.
    std::fs::create_dir_all(config.output_dir.join("public.md")).unwrap();
    std::fs::create_dir_all(config.output_dir.join("draft.md")).unwrap();

    let mut source = listing(vec![
        doc("public", "2024-02-02T03:04:05Z"),
        doc("draft", "2024-02-02T03:04:05Z"),
    ]);
    source.expect_export_text().returning(|id| {
        if id == "draft" {
            Ok("---\ndraft: true\n---\nwip\n".to_string())
        } else {
            Ok("published\n".to_string())
        }
    });

    let report = synchronise(&config, Arc::new(source), codec()).await.unwrap();

    let public = report.outcome_of("public").unwrap();
    assert_eq!(public.status, SyncStatus::SaveError);
    assert!(public.is_public);
    let draft = report.outcome_of("draft").unwrap();
    assert_eq!(draft.status, SyncStatus::SaveError);
    assert!(!draft.is_public);
    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.summary.public_updated, 0);
    assert!(!report.marker_present);
}

/// Source whose export of one document panics.
struct PanickingSource {
    entries: Vec<ChildEntry>,
    panics_on: &'static str,
}

#[async_trait]
impl DocumentSource for PanickingSource {
    async fn list_children(
        &self,
        _folder_id: &str,
        _page_token: Option<String>,
    ) -> Result<ChildPage, SourceError> {
        Ok(ChildPage {
            entries: self.entries.clone(),
            next_page_token: None,
        })
    }

    async fn export_text(&self, document_id: &str) -> Result<String, SourceError> {
        if document_id == self.panics_on {
            panic!("export of {document_id} blew up");
        }
        Ok(format!("content of {document_id}\n"))
    }
}

#[tokio::test]
async fn panicking_worker_is_an_unknown_error_and_siblings_complete() {
    let dir = tempdir().unwrap();
    let config = config_in(&dir);
    let source = PanickingSource {
        entries: vec![
            doc("a", "2024-02-02T03:04:05Z"),
            doc("b", "2024-02-02T03:04:05Z"),
        ],
        panics_on: "a",
    };

    let report = synchronise(&config, Arc::new(source), codec()).await.unwrap();

    let a = report.outcome_of("a").unwrap();
    assert_eq!(a.status, SyncStatus::UnknownError);
    assert!(!a.is_public);
    let b = report.outcome_of("b").unwrap();
    assert_eq!(b.status, SyncStatus::Success);
    assert!(b.is_public);
    assert_eq!(report.summary.failed, 1);
    assert!(report.marker_present);
    assert!(config.output_dir.join("b.md").exists());
}
