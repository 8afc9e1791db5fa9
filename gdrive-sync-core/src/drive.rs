//! Google Drive v3 REST implementation of [`DocumentSource`].
//!
//! Folder listings use `files.list` with a parent query; document bodies use
//! `files.export` to `text/markdown`. Every request goes through the retry
//! policy in [`crate::retry`].

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::RetryConfig;
use crate::contract::{ChildEntry, ChildPage, DocumentSource, ItemKind, SourceError};
use crate::retry::with_retry;

pub const DRIVE_API_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, createdTime, modifiedTime)";
const EXPORT_MIME_TYPE: &str = "text/markdown";

/// How to obtain the bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveCredentials {
    AccessToken(String),
    /// Path to a service-account JSON key.
    ServiceAccountKey(PathBuf),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    mime_type: String,
    created_time: Option<String>,
    modified_time: Option<String>,
}

impl From<DriveFile> for ChildEntry {
    fn from(file: DriveFile) -> Self {
        ChildEntry {
            id: file.id,
            name: file.name,
            kind: ItemKind::from_mime_type(&file.mime_type),
            created_at: file.created_time,
            modified_at: file.modified_time,
        }
    }
}

/// Drive client; cheap to share across workers.
#[derive(Debug, Clone)]
pub struct DriveClient {
    http: Client,
    base_url: String,
    access_token: String,
    retry: RetryConfig,
}

impl DriveClient {
    pub fn new(access_token: impl Into<String>, retry: RetryConfig) -> Self {
        Self::with_base_url(DRIVE_API_BASE_URL, access_token, retry)
    }

    /// Client against a different API root (tests, proxies).
    pub fn with_base_url(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            retry,
        }
    }

    /// Resolve `credentials` into a token and build a client.
    pub async fn connect(
        credentials: DriveCredentials,
        retry: RetryConfig,
    ) -> Result<Self, SourceError> {
        let token = match credentials {
            DriveCredentials::AccessToken(token) => token,
            DriveCredentials::ServiceAccountKey(path) => {
                info!(key = %path.display(), "[DRIVE] Exchanging service-account key for an access token");
                service_account_token(&path).await?
            }
        };
        Ok(Self::new(token, retry))
    }
}

async fn service_account_token(path: &std::path::Path) -> Result<String, SourceError> {
    let key = yup_oauth2::read_service_account_key(path)
        .await
        .map_err(|e| SourceError::Auth(format!("could not read key {}: {e}", path.display())))?;
    let auth = yup_oauth2::ServiceAccountAuthenticator::builder(key)
        .build()
        .await
        .map_err(|e| SourceError::Auth(e.to_string()))?;
    let token = auth
        .token(&[DRIVE_READONLY_SCOPE])
        .await
        .map_err(|e| SourceError::Auth(e.to_string()))?;
    token
        .token()
        .map(str::to_string)
        .ok_or_else(|| SourceError::Auth("token response carried no access token".into()))
}

/// Send `request`, turning non-success statuses into [`SourceError::Status`].
async fn send_checked(request: reqwest::RequestBuilder) -> Result<reqwest::Response, SourceError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
    Err(SourceError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DocumentSource for DriveClient {
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<String>,
    ) -> Result<ChildPage, SourceError> {
        let url = format!("{}/files", self.base_url);
        let query = format!("'{}' in parents and trashed = false", folder_id.replace('\'', "\\'"));
        debug!(folder_id, page_token = ?page_token, "[DRIVE] files.list");

        let list: FileList = with_retry(&self.retry, "files.list", || {
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(&[("q", query.as_str()), ("spaces", "drive"), ("fields", LIST_FIELDS)]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            async move {
                send_checked(request)
                    .await?
                    .json::<FileList>()
                    .await
                    .map_err(|e| SourceError::Decode(e.to_string()))
            }
        })
        .await?;

        Ok(ChildPage {
            entries: list.files.into_iter().map(ChildEntry::from).collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn export_text(&self, document_id: &str) -> Result<String, SourceError> {
        let url = format!("{}/files/{}/export", self.base_url, document_id);
        debug!(file_id = document_id, "[DRIVE] files.export");

        let bytes = with_retry(&self.retry, "files.export", || {
            let request = self
                .http
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(&[("mimeType", EXPORT_MIME_TYPE)]);
            async move { Ok::<_, SourceError>(send_checked(request).await?.bytes().await?) }
        })
        .await?;

        String::from_utf8(bytes.to_vec())
            .map_err(|e| SourceError::Decode(format!("export is not UTF-8: {e}")))
    }
}
