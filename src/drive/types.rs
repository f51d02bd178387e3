//! Drive API types
//!
//! Defines metadata snapshots returned by the Drive API and the request
//! payloads sent back to it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// MIME type Drive uses to mark folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Deserialize a byte count that might be encoded as a string, a number or null.
/// Drive returns `size` as a decimal string and omits it for folders and
/// native Google documents.
fn deserialize_flexible_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleSizeVisitor;

    impl<'de> de::Visitor<'de> for FlexibleSizeVisitor {
        type Value = Option<u64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a u64, a string containing a u64, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Option<u64>, E> {
            Ok(Some(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Option<u64>, E> {
            u64::try_from(value)
                .map(Some)
                .map_err(|_| de::Error::custom("negative value for size"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Option<u64>, E> {
            value.parse::<u64>().map(Some).map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<Option<u64>, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Option<u64>, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(FlexibleSizeVisitor)
}

/// Owner of a Drive file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
}

/// Snapshot of a file or folder's remote metadata
///
/// Never mutated in place; a fresh fetch produces a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Stable opaque identifier
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    /// Size in bytes (None for folders and native Google documents)
    #[serde(default, deserialize_with = "deserialize_flexible_size")]
    pub size: Option<u64>,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    /// Parent folder ids; a file may live in several folders
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub owners: Vec<Owner>,
    #[serde(default)]
    pub web_view_link: Option<String>,
}

impl FileRecord {
    /// Check if this record represents a folder
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<FileRecord>,
    /// Token for the next page (None on the last page)
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Node of a folder tree
///
/// `children` is `None` when the depth limit stopped exploration, and
/// `Some(vec![])` when the folder was listed and has no sub-folders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderNode {
    pub id: String,
    pub name: String,
    pub children: Option<Vec<FolderNode>>,
}

/// Metadata for a file or folder to be created
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub parents: Vec<String>,
}

impl NewFile {
    /// Metadata for a folder under `parent_id`
    pub fn folder(name: &str, parent_id: &str) -> Self {
        Self {
            name: name.to_string(),
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            parents: vec![parent_id.to_string()],
        }
    }

    /// Metadata for a regular file under `parent_id`
    pub fn file(name: &str, parent_id: &str) -> Self {
        Self {
            name: name.to_string(),
            mime_type: None,
            parents: vec![parent_id.to_string()],
        }
    }
}

/// Changes applied by an update call
///
/// `name` goes in the request body, parent changes go in the query string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilePatch {
    pub name: Option<String>,
    pub add_parents: Vec<String>,
    pub remove_parents: Vec<String>,
}

impl FilePatch {
    pub fn rename(new_name: &str) -> Self {
        Self {
            name: Some(new_name.to_string()),
            ..Self::default()
        }
    }

    pub fn reparent(from: Vec<String>, to: &str) -> Self {
        Self {
            name: None,
            add_parents: vec![to.to_string()],
            remove_parents: from,
        }
    }
}

/// Upload progress callback: `(bytes_sent, total_bytes)`
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// File content attached to a create or update call
#[derive(Clone)]
pub struct MediaContent {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub progress: Option<ProgressCallback>,
}

impl MediaContent {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for MediaContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaContent")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_regular_file() {
        let json = r#"{
            "id": "1AbC",
            "name": "notes.txt",
            "mimeType": "text/plain",
            "size": "2048",
            "createdTime": "2024-03-01T10:00:00.000Z",
            "modifiedTime": "2024-03-02T11:30:00.000Z",
            "parents": ["root"],
            "owners": [{"displayName": "Ada", "emailAddress": "ada@example.com"}],
            "webViewLink": "https://drive.google.com/file/d/1AbC/view"
        }"#;
        let record: FileRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "1AbC");
        assert_eq!(record.size, Some(2048));
        assert_eq!(record.parents, vec!["root".to_string()]);
        assert_eq!(record.owners[0].display_name.as_deref(), Some("Ada"));
        assert!(record.modified_time.is_some());
        assert!(!record.is_folder());
    }

    #[test]
    fn test_deserialize_folder_without_size() {
        // Drive omits size for folders
        let json = r#"{
            "id": "F1",
            "name": "Reports",
            "mimeType": "application/vnd.google-apps.folder"
        }"#;
        let record: FileRecord = serde_json::from_str(json).unwrap();
        assert!(record.is_folder());
        assert_eq!(record.size, None);
        assert!(record.parents.is_empty());
    }

    #[test]
    fn test_deserialize_numeric_and_null_size() {
        let numeric: FileRecord =
            serde_json::from_str(r#"{"id": "a", "size": 7}"#).unwrap();
        assert_eq!(numeric.size, Some(7));

        let null: FileRecord = serde_json::from_str(r#"{"id": "b", "size": null}"#).unwrap();
        assert_eq!(null.size, None);

        assert!(serde_json::from_str::<FileRecord>(r#"{"id": "c", "size": "lots"}"#).is_err());
    }

    #[test]
    fn test_deserialize_list_page() {
        let json = r#"{
            "files": [
                {"id": "1", "name": "a.pdf", "mimeType": "application/pdf", "size": "10"},
                {"id": "2", "name": "Sub", "mimeType": "application/vnd.google-apps.folder"}
            ],
            "nextPageToken": "tok-2",
            "kind": "drive#fileList"
        }"#;
        let page: FileList = serde_json::from_str(json).unwrap();
        assert_eq!(page.files.len(), 2);
        assert!(page.files[1].is_folder());
        assert_eq!(page.next_page_token.as_deref(), Some("tok-2"));

        let empty: FileList = serde_json::from_str("{}").unwrap();
        assert!(empty.files.is_empty());
        assert_eq!(empty.next_page_token, None);
    }

    #[test]
    fn test_new_file_serialization() {
        let folder = serde_json::to_value(NewFile::folder("Reports", "root")).unwrap();
        assert_eq!(folder["mimeType"], FOLDER_MIME_TYPE);
        assert_eq!(folder["parents"][0], "root");

        let file = serde_json::to_value(NewFile::file("a.txt", "P")).unwrap();
        assert!(file.get("mimeType").is_none());
    }
}
