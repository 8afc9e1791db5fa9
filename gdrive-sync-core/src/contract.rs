//! # contract: collaborator interfaces of the sync engine
//!
//! This module defines the two seams through which the engine talks to the
//! outside world, plus the plain data types that cross them:
//!
//! - [`DocumentSource`]: lists the children of a remote folder (cursor
//!   paginated) and exports a document body as Markdown text.
//! - [`ImageCodec`]: recompresses one embedded raster image.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`; the generated `MockDocumentSource`
//!   and `MockImageCodec` are exported under the default `test-export-mocks`
//!   feature so integration tests (and downstream crates) can drive the engine
//!   without network access or an AVIF encoder.
//!
//! ## Errors
//! - [`SourceError`] distinguishes transient from permanent remote failures;
//!   see [`crate::retry::IsRetryable`] for the classification.
//! - [`ImageError`] covers identification, decoding and encoding failures of a
//!   single image. It never aborts a document.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

/// MIME type Drive reports for folders.
pub const MIME_TYPE_FOLDER: &str = "application/vnd.google-apps.folder";
/// MIME type Drive reports for Google Docs.
pub const MIME_TYPE_DOCUMENT: &str = "application/vnd.google-apps.document";

/// What a remote child entry is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    Folder,
    Document,
    /// Anything else (spreadsheets, PDFs, shortcuts...). Ignored by traversal.
    Other(String),
}

impl ItemKind {
    pub fn from_mime_type(mime_type: &str) -> Self {
        match mime_type {
            MIME_TYPE_FOLDER => ItemKind::Folder,
            MIME_TYPE_DOCUMENT => ItemKind::Document,
            other => ItemKind::Other(other.to_string()),
        }
    }
}

/// One raw child as reported by a folder listing. Fields are optional because
/// the remote API does not guarantee any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub id: Option<String>,
    pub name: Option<String>,
    pub kind: ItemKind,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
}

/// One page of a folder listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildPage {
    pub entries: Vec<ChildEntry>,
    /// Cursor for the next page; `None` once the listing is exhausted.
    pub next_page_token: Option<String>,
}

/// A document discovered by traversal. Lives for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    /// Stable opaque id; also names the local artifact.
    pub id: String,
    /// Display name, used as the default title.
    pub name: String,
    pub kind: ItemKind,
    /// Raw creation timestamp string as reported remotely.
    pub created_at: Option<String>,
    /// Raw modification fingerprint. Never reformatted: it is persisted
    /// byte-for-byte and compared literally by the cache gate.
    pub modified_at: Option<String>,
}

impl RemoteItem {
    /// Convenience constructor for documents.
    pub fn document(
        id: impl Into<String>,
        name: impl Into<String>,
        created_at: Option<&str>,
        modified_at: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ItemKind::Document,
            created_at: created_at.map(str::to_string),
            modified_at: modified_at.map(str::to_string),
        }
    }
}

/// Failure talking to the document source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The remote answered with a non-success status.
    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response (DNS, TLS, connection reset...).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response arrived but could not be understood.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// Credentials could not be obtained or were rejected.
    #[error("authentication failed: {0}")]
    Auth(String),
}

/// Failure recompressing a single embedded image.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("could not identify image format: {0}")]
    Unidentified(String),

    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("could not encode image: {0}")]
    Encode(String),
}

/// Output of an [`ImageCodec`]: the new bytes and the MIME type they carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Remote listing/export transport.
///
/// Implementations must be safe for concurrent independent use: the engine
/// shares one instance across all workers of a run.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// List one page of the direct children of `folder_id`.
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<String>,
    ) -> Result<ChildPage, SourceError>;

    /// Export a document body as Markdown text.
    async fn export_text(&self, document_id: &str) -> Result<String, SourceError>;
}

/// Stateless recompression of one embedded image.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait ImageCodec: Send + Sync {
    fn recompress(&self, raw: &[u8]) -> Result<EncodedImage, ImageError>;
}
