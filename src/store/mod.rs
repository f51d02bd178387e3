//! Remote file store abstraction
//!
//! The facade only ever talks to a [`RemoteStore`]. Calls are synchronous and
//! block the calling thread; adapters around async clients bridge internally.

pub mod http;
pub mod memory;

use std::collections::HashMap;

use crate::drive::{DriveError, FileList, FilePatch, FileRecord, MediaContent, NewFile};

pub use http::HttpStore;
pub use memory::MemoryStore;

/// What a listing call selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Non-trashed children of a folder, optionally folders only
    Children { folder_id: String, folders_only: bool },
    /// Non-trashed files whose name contains `text`, optionally inside one folder
    NameContains {
        text: String,
        folder_id: Option<String>,
    },
    /// Non-trashed files named exactly `name` inside `parent_id`
    NameEquals { name: String, parent_id: String },
}

/// A listing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub query: Query,
    pub page_size: u32,
    pub page_token: Option<String>,
    pub order_by: Option<String>,
}

impl ListQuery {
    pub fn new(query: Query, page_size: u32) -> Self {
        Self {
            query,
            page_size,
            page_token: None,
            order_by: None,
        }
    }

    pub fn page_token(mut self, token: Option<&str>) -> Self {
        self.page_token = token.map(String::from);
        self
    }

    pub fn order_by(mut self, order: &str) -> Self {
        self.order_by = Some(order.to_string());
        self
    }
}

/// Remote file storage operations
///
/// Errors are always one of the closed [`DriveError`] kinds so callers can
/// decide on retries without inspecting error shapes.
pub trait RemoteStore: Send + Sync {
    /// List one page of files matching `query`
    fn list(&self, query: &ListQuery) -> Result<FileList, DriveError>;

    /// Fetch metadata for a single file
    fn get_metadata(&self, file_id: &str) -> Result<FileRecord, DriveError>;

    /// Create a file or folder, optionally with content
    fn create(
        &self,
        metadata: &NewFile,
        content: Option<&MediaContent>,
    ) -> Result<FileRecord, DriveError>;

    /// Rename, reparent and/or replace the content of a file
    fn update(
        &self,
        file_id: &str,
        patch: &FilePatch,
        content: Option<&MediaContent>,
    ) -> Result<FileRecord, DriveError>;

    /// Permanently delete a file
    fn delete(&self, file_id: &str) -> Result<(), DriveError>;

    /// Download file content
    fn download(&self, file_id: &str) -> Result<Vec<u8>, DriveError>;

    /// Fetch metadata for several files; each id reports its own outcome
    fn batch_get(&self, ids: &[String]) -> HashMap<String, Result<FileRecord, DriveError>> {
        ids.iter()
            .map(|id| (id.clone(), self.get_metadata(id)))
            .collect()
    }
}

impl<S: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<S> {
    fn list(&self, query: &ListQuery) -> Result<FileList, DriveError> {
        (**self).list(query)
    }

    fn get_metadata(&self, file_id: &str) -> Result<FileRecord, DriveError> {
        (**self).get_metadata(file_id)
    }

    fn create(
        &self,
        metadata: &NewFile,
        content: Option<&MediaContent>,
    ) -> Result<FileRecord, DriveError> {
        (**self).create(metadata, content)
    }

    fn update(
        &self,
        file_id: &str,
        patch: &FilePatch,
        content: Option<&MediaContent>,
    ) -> Result<FileRecord, DriveError> {
        (**self).update(file_id, patch, content)
    }

    fn delete(&self, file_id: &str) -> Result<(), DriveError> {
        (**self).delete(file_id)
    }

    fn download(&self, file_id: &str) -> Result<Vec<u8>, DriveError> {
        (**self).download(file_id)
    }

    fn batch_get(&self, ids: &[String]) -> HashMap<String, Result<FileRecord, DriveError>> {
        (**self).batch_get(ids)
    }
}
