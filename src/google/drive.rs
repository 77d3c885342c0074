//! Drive v3: list a folder's documents and export them as plain text.

use super::{error_for_response, send_with_retry, GoogleApiError, GoogleAuth, RetryPolicy};

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// MIME type of a native Google Docs document.
pub const GOOGLE_DOC_MIME: &str = "application/vnd.google-apps.document";

const LIST_FIELDS: &str = "files(id,name,mimeType,webViewLink,modifiedTime,owners(emailAddress))";

/// File metadata as returned by `files.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub owners: Vec<DriveOwner>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveOwner {
    #[serde(default)]
    pub email_address: Option<String>,
}

impl DriveFile {
    pub fn is_google_doc(&self) -> bool {
        self.mime_type == GOOGLE_DOC_MIME
    }

    /// First owner that carries a non-empty email address.
    pub fn owner_email(&self) -> Option<&str> {
        self.owners
            .iter()
            .filter_map(|owner| owner.email_address.as_deref())
            .map(str::trim)
            .find(|email| !email.is_empty())
    }
}

#[derive(Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Source of meeting-note documents.
#[async_trait]
pub trait DriveSource: Send + Sync {
    /// Newest-first, non-trashed files in `folder_id`, at most `limit`.
    async fn list_files(
        &self,
        folder_id: &str,
        limit: u32,
    ) -> Result<Vec<DriveFile>, GoogleApiError>;

    /// Plain-text export of a Google Docs document.
    async fn export_text(&self, file_id: &str) -> Result<String, GoogleApiError>;
}

/// Drive v3 client.
pub struct GoogleDrive {
    client: reqwest::Client,
    auth: Arc<GoogleAuth>,
    api_base: String,
    retry: RetryPolicy,
}

impl GoogleDrive {
    pub fn new(client: reqwest::Client, auth: Arc<GoogleAuth>, api_base: impl Into<String>) -> Self {
        Self {
            client,
            auth,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Drive query for the documents directly inside `folder_id`.
fn folder_query(folder_id: &str) -> String {
    // Single quotes inside the id must be escaped for the Drive query language.
    let escaped = folder_id.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}' in parents and trashed = false")
}

#[async_trait]
impl DriveSource for GoogleDrive {
    async fn list_files(
        &self,
        folder_id: &str,
        limit: u32,
    ) -> Result<Vec<DriveFile>, GoogleApiError> {
        let token = self.auth.access_token().await?;
        let page_size = limit.to_string();
        let query = folder_query(folder_id);

        let response = send_with_retry(
            self.client
                .get(format!("{}/drive/v3/files", self.api_base))
                .bearer_auth(&token)
                .query(&[
                    ("q", query.as_str()),
                    ("orderBy", "modifiedTime desc"),
                    ("pageSize", page_size.as_str()),
                    ("fields", LIST_FIELDS),
                    ("supportsAllDrives", "true"),
                    ("includeItemsFromAllDrives", "true"),
                ]),
            &self.retry,
        )
        .await?;

        if !response.status().is_success() {
            return Err(error_for_response(response).await);
        }

        let list: FileListResponse = response.json().await?;
        tracing::debug!(folder_id, count = list.files.len(), "listed drive files");
        Ok(list.files)
    }

    async fn export_text(&self, file_id: &str) -> Result<String, GoogleApiError> {
        let token = self.auth.access_token().await?;

        let response = send_with_retry(
            self.client
                .get(format!("{}/drive/v3/files/{file_id}/export", self.api_base))
                .bearer_auth(&token)
                .query(&[("mimeType", "text/plain")]),
            &self.retry,
        )
        .await?;

        if !response.status().is_success() {
            return Err(error_for_response(response).await);
        }

        Ok(response.text().await?)
    }
}
