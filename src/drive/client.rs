//! Google Drive API Client
//!
//! Provides authenticated access to the Drive v3 REST API for listing,
//! metadata, content transfer and mutations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::errors::DriveError;
use super::types::{FileList, FilePatch, FileRecord, MediaContent, NewFile};
use crate::store::{ListQuery, Query};

/// Drive API base URL
pub const DRIVE_API_URL: &str = "https://www.googleapis.com";

/// Fields requested for every file record
pub const FILE_FIELDS: &str =
    "id, name, mimeType, size, createdTime, modifiedTime, owners, parents, webViewLink";

/// Resumable upload chunk size; Drive requires multiples of 256 KiB
pub const UPLOAD_CHUNK_SIZE: usize = 32 * 256 * 1024;

/// Consecutive chunk responses without progress before an upload gives up
const MAX_STALLED_CHUNKS: u32 = 3;

/// Supplies bearer tokens for API requests
///
/// Token acquisition and refresh belong to the implementor.
pub trait CredentialProvider: Send + Sync {
    fn access_token(&self) -> Result<String, DriveError>;
}

/// Credential provider backed by a fixed access token
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl CredentialProvider for StaticToken {
    fn access_token(&self) -> Result<String, DriveError> {
        if self.0.is_empty() {
            return Err(DriveError::InvalidInput("empty access token".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// Escape a literal for use inside a single-quoted Drive query string
fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Render a typed query into Drive's `q` syntax
pub fn render_query(query: &Query) -> String {
    match query {
        Query::Children {
            folder_id,
            folders_only,
        } => {
            let mut q = format!("'{}' in parents and trashed=false", escape_literal(folder_id));
            if *folders_only {
                q.push_str(&format!(" and mimeType='{}'", super::FOLDER_MIME_TYPE));
            }
            q
        }
        Query::NameContains { text, folder_id } => {
            let mut q = format!("name contains '{}' and trashed=false", escape_literal(text));
            if let Some(folder) = folder_id {
                q.push_str(&format!(" and '{}' in parents", escape_literal(folder)));
            }
            q
        }
        Query::NameEquals { name, parent_id } => format!(
            "name = '{}' and '{}' in parents and trashed=false",
            escape_literal(name),
            escape_literal(parent_id)
        ),
    }
}

/// Drive API client for making authenticated requests
#[derive(Clone)]
pub struct DriveClient {
    /// HTTP client for making requests
    http_client: Client,
    /// Base URL for metadata and upload endpoints
    base_url: String,
    /// Source of bearer tokens
    credentials: Arc<dyn CredentialProvider>,
    /// Bytes per resumable upload request
    chunk_size: usize,
}

impl DriveClient {
    /// Create a client against the public Drive API
    pub fn new(credentials: Arc<dyn CredentialProvider>, timeout: Duration) -> Result<Self> {
        Self::with_base_url(DRIVE_API_URL, credentials, timeout)
    }

    /// Create a client against a custom base URL (e.g. a mock server)
    pub fn with_base_url(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self> {
        // Resumable uploads answer 308 without a Location header; never follow it
        let http_client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            chunk_size: UPLOAD_CHUNK_SIZE,
        })
    }

    /// Override the resumable upload chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.base_url)
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/drive/v3/files/{}", self.base_url, urlencoding::encode(file_id))
    }

    fn upload_url(&self, file_id: Option<&str>) -> String {
        match file_id {
            Some(id) => format!(
                "{}/upload/drive/v3/files/{}",
                self.base_url,
                urlencoding::encode(id)
            ),
            None => format!("{}/upload/drive/v3/files", self.base_url),
        }
    }

    fn bearer(&self) -> Result<String, DriveError> {
        Ok(format!("Bearer {}", self.credentials.access_token()?))
    }

    /// Turn a non-success response into a DriveError
    async fn check(response: Response) -> Result<Response, DriveError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DriveError::from_status(status.as_u16(), &body))
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, DriveError> {
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// List one page of files
    pub async fn list(&self, query: &ListQuery) -> Result<FileList, DriveError> {
        let q = render_query(&query.query);
        let fields = format!("nextPageToken, files({})", FILE_FIELDS);

        let mut params: Vec<(&str, String)> = vec![
            ("q", q),
            ("pageSize", query.page_size.to_string()),
            ("fields", fields),
        ];
        if let Some(token) = &query.page_token {
            params.push(("pageToken", token.clone()));
        }
        if let Some(order) = &query.order_by {
            params.push(("orderBy", order.clone()));
        }

        debug!(query = ?query.query, page_token = ?query.page_token, "Listing files from Drive");

        let response = self
            .http_client
            .get(self.files_url())
            .header(AUTHORIZATION, self.bearer()?)
            .query(&params)
            .send()
            .await?;

        let page: FileList = Self::parse(Self::check(response).await?).await?;
        debug!(count = page.files.len(), "Listed files from Drive");
        Ok(page)
    }

    /// Get metadata for a single file
    pub async fn get_metadata(&self, file_id: &str) -> Result<FileRecord, DriveError> {
        let response = self
            .http_client
            .get(self.file_url(file_id))
            .header(AUTHORIZATION, self.bearer()?)
            .query(&[("fields", FILE_FIELDS)])
            .send()
            .await?;

        Self::parse(Self::check(response).await?).await
    }

    /// Create a file or folder
    ///
    /// Metadata-only creates use a single request; content goes through a
    /// resumable upload session.
    pub async fn create(
        &self,
        metadata: &NewFile,
        content: Option<&MediaContent>,
    ) -> Result<FileRecord, DriveError> {
        let body = serde_json::to_value(metadata)?;

        let record = match content {
            None => {
                let response = self
                    .http_client
                    .post(self.files_url())
                    .header(AUTHORIZATION, self.bearer()?)
                    .query(&[("fields", FILE_FIELDS)])
                    .json(&body)
                    .send()
                    .await?;
                Self::parse(Self::check(response).await?).await?
            }
            Some(content) => {
                let session = self
                    .start_upload_session(Method::POST, self.upload_url(None), &[], &body, content)
                    .await?;
                self.upload_chunks(&session, content).await?
            }
        };

        info!(file_id = %record.id, name = %record.name, "Created file in Drive");
        Ok(record)
    }

    /// Update a file's name, parents and/or content
    pub async fn update(
        &self,
        file_id: &str,
        patch: &FilePatch,
        content: Option<&MediaContent>,
    ) -> Result<FileRecord, DriveError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if !patch.add_parents.is_empty() {
            params.push(("addParents", patch.add_parents.join(",")));
        }
        if !patch.remove_parents.is_empty() {
            params.push(("removeParents", patch.remove_parents.join(",")));
        }

        let mut body = serde_json::Map::new();
        if let Some(name) = &patch.name {
            body.insert("name".to_string(), serde_json::Value::String(name.clone()));
        }
        let body = serde_json::Value::Object(body);

        let record = match content {
            None => {
                params.push(("fields", FILE_FIELDS.to_string()));
                let response = self
                    .http_client
                    .patch(self.file_url(file_id))
                    .header(AUTHORIZATION, self.bearer()?)
                    .query(&params)
                    .json(&body)
                    .send()
                    .await?;
                Self::parse(Self::check(response).await?).await?
            }
            Some(content) => {
                let session = self
                    .start_upload_session(
                        Method::PATCH,
                        self.upload_url(Some(file_id)),
                        &params,
                        &body,
                        content,
                    )
                    .await?;
                self.upload_chunks(&session, content).await?
            }
        };

        info!(file_id = file_id, "Updated file in Drive");
        Ok(record)
    }

    /// Permanently delete a file
    pub async fn delete(&self, file_id: &str) -> Result<(), DriveError> {
        info!(file_id = file_id, "Deleting file from Drive");

        let response = self
            .http_client
            .delete(self.file_url(file_id))
            .header(AUTHORIZATION, self.bearer()?)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Download file content
    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>, DriveError> {
        let response = self
            .http_client
            .get(self.file_url(file_id))
            .header(AUTHORIZATION, self.bearer()?)
            .query(&[("alt", "media")])
            .send()
            .await?;

        let bytes = Self::check(response).await?.bytes().await?;
        info!(file_id = file_id, size = bytes.len(), "Downloaded file from Drive");
        Ok(bytes.to_vec())
    }

    /// Get metadata for several files, one request per id
    pub async fn batch_get(&self, ids: &[String]) -> HashMap<String, Result<FileRecord, DriveError>> {
        let mut results = HashMap::with_capacity(ids.len());
        for id in ids {
            let outcome = self.get_metadata(id).await;
            if let Err(e) = &outcome {
                debug!(file_id = %id, error = %e, "Batch metadata lookup failed");
            }
            results.insert(id.clone(), outcome);
        }
        results
    }

    /// Open a resumable upload session and return its URL
    async fn start_upload_session(
        &self,
        method: Method,
        url: String,
        params: &[(&str, String)],
        metadata: &serde_json::Value,
        content: &MediaContent,
    ) -> Result<String, DriveError> {
        let mut query: Vec<(&str, String)> = vec![
            ("uploadType", "resumable".to_string()),
            ("fields", FILE_FIELDS.to_string()),
        ];
        query.extend(params.iter().cloned());

        let response = self
            .http_client
            .request(method, url)
            .header(AUTHORIZATION, self.bearer()?)
            .header("X-Upload-Content-Type", content.mime_type.as_str())
            .header("X-Upload-Content-Length", content.len())
            .query(&query)
            .json(metadata)
            .send()
            .await?;

        let response = Self::check(response).await?;
        let session = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| DriveError::Unknown("upload session without Location".to_string()))?;

        debug!(size = content.len(), "Opened resumable upload session");
        Ok(session)
    }

    /// Send content to an upload session chunk by chunk
    async fn upload_chunks(
        &self,
        session_url: &str,
        content: &MediaContent,
    ) -> Result<FileRecord, DriveError> {
        let total = content.len();

        if total == 0 {
            let response = self
                .http_client
                .put(session_url)
                .header(CONTENT_LENGTH, 0)
                .header(CONTENT_TYPE, content.mime_type.as_str())
                .send()
                .await?;
            return Self::parse(Self::check(response).await?).await;
        }

        let mut offset: u64 = 0;
        let mut stalled = 0;
        while offset < total {
            let end = (offset + self.chunk_size as u64).min(total);
            let chunk = content.bytes[offset as usize..end as usize].to_vec();

            let response = self
                .http_client
                .put(session_url)
                .header(CONTENT_LENGTH, end - offset)
                .header(CONTENT_RANGE, format!("bytes {}-{}/{}", offset, end - 1, total))
                .header(CONTENT_TYPE, content.mime_type.as_str())
                .body(chunk)
                .send()
                .await?;

            if response.status() == StatusCode::PERMANENT_REDIRECT {
                // Server reports what it has persisted, e.g. "bytes=0-262143";
                // no Range header means nothing was persisted yet
                let persisted = response
                    .headers()
                    .get(RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.rsplit('-').next())
                    .and_then(|last| last.parse::<u64>().ok())
                    .map(|last| last + 1)
                    .unwrap_or(0);

                if persisted <= offset {
                    stalled += 1;
                    warn!(offset = offset, persisted = persisted, "Upload chunk not persisted");
                    if stalled >= MAX_STALLED_CHUNKS {
                        return Err(DriveError::Unknown("upload session stalled".to_string()));
                    }
                } else {
                    stalled = 0;
                    if let Some(progress) = &content.progress {
                        progress(persisted, total);
                    }
                    debug!(sent = persisted, total = total, "Upload chunk accepted");
                }
                offset = persisted.min(total);
                continue;
            }

            let record: FileRecord = Self::parse(Self::check(response).await?).await?;
            if let Some(progress) = &content.progress {
                progress(total, total);
            }
            return Ok(record);
        }

        warn!(total = total, "Upload session never completed");
        Err(DriveError::Unknown("upload session incomplete".to_string()))
    }
}
