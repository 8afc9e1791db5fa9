//! Recursive enumeration of the documents under a root folder.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::contract::{ChildEntry, DocumentSource, ItemKind, RemoteItem, SourceError};

#[derive(Debug, Error)]
pub enum TraversalError {
    /// The root folder's first page could not be listed. Nothing can be said
    /// about the remote set, so the run must not go on to delete anything.
    #[error("root folder {folder_id} is unreachable: {source}")]
    RootUnreachable {
        folder_id: String,
        #[source]
        source: SourceError,
    },
}

pub struct TraversalEngine {
    source: Arc<dyn DocumentSource>,
}

impl TraversalEngine {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }

    /// Every document below `root_folder_id`, each id at most once, in
    /// discovery order.
    ///
    /// Subfolders that fail to list are logged and skipped along with their
    /// subtree; pages already received from a failing folder are kept.
    pub async fn list_documents(
        &self,
        root_folder_id: &str,
    ) -> Result<Vec<RemoteItem>, TraversalError> {
        let mut documents = Vec::new();
        let mut seen_documents = HashSet::new();
        let mut visited_folders = HashSet::from([root_folder_id.to_string()]);
        let mut queue = VecDeque::from([root_folder_id.to_string()]);

        while let Some(folder_id) = queue.pop_front() {
            let is_root = folder_id == root_folder_id;
            let mut page_token: Option<String> = None;
            let mut seen_tokens = HashSet::new();

            loop {
                let page = match self
                    .source
                    .list_children(&folder_id, page_token.clone())
                    .await
                {
                    Ok(page) => page,
                    Err(e) if is_root && page_token.is_none() => {
                        error!(folder_id = %folder_id, error = %e, "[TRAVERSE][ERROR] Root folder listing failed");
                        return Err(TraversalError::RootUnreachable {
                            folder_id,
                            source: e,
                        });
                    }
                    Err(e) => {
                        error!(folder_id = %folder_id, error = %e, "[TRAVERSE][ERROR] Folder listing failed, skipping the rest of it");
                        break;
                    }
                };
                debug!(folder_id = %folder_id, entries = page.entries.len(), "[TRAVERSE] Listed page");

                for entry in page.entries {
                    self.visit(entry, &mut documents, &mut seen_documents, &mut visited_folders, &mut queue);
                }

                match page.next_page_token {
                    Some(token) if !token.is_empty() => {
                        if !seen_tokens.insert(token.clone()) {
                            warn!(folder_id = %folder_id, token = %token, "[TRAVERSE] Page token repeated, stopping pagination");
                            break;
                        }
                        page_token = Some(token);
                    }
                    _ => break,
                }
            }
        }

        info!(root_folder_id, documents = documents.len(), folders = visited_folders.len(), "[TRAVERSE] Traversal complete");
        Ok(documents)
    }

    fn visit(
        &self,
        entry: ChildEntry,
        documents: &mut Vec<RemoteItem>,
        seen_documents: &mut HashSet<String>,
        visited_folders: &mut HashSet<String>,
        queue: &mut VecDeque<String>,
    ) {
        let ChildEntry {
            id,
            name,
            kind,
            created_at,
            modified_at,
        } = entry;
        match kind {
            ItemKind::Folder => {
                let Some(id) = id else {
                    warn!(name = ?name, "[TRAVERSE] Folder without id, skipping");
                    return;
                };
                if visited_folders.insert(id.clone()) {
                    debug!(folder_id = %id, name = ?name, "[TRAVERSE] Descending into folder");
                    queue.push_back(id);
                }
            }
            ItemKind::Document => {
                let Some(id) = id else {
                    warn!(name = ?name, "[TRAVERSE] Document without id, skipping");
                    return;
                };
                if !seen_documents.insert(id.clone()) {
                    debug!(file_id = %id, "[TRAVERSE] Document already listed");
                    return;
                }
                documents.push(RemoteItem {
                    name: name.unwrap_or_else(|| id.clone()),
                    id,
                    kind: ItemKind::Document,
                    created_at,
                    modified_at,
                });
            }
            ItemKind::Other(mime_type) => {
                debug!(id = ?id, mime_type = %mime_type, "[TRAVERSE] Ignoring non-document entry");
            }
        }
    }
}
