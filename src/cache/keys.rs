//! Typed cache keys
//!
//! Every parameter that changes a result is part of its key, so reads with
//! different parameters never share an entry.

use crate::drive::{FileList, FileRecord};

/// Which children a listing selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingFilter {
    All,
    FoldersOnly,
}

/// Key of an entry in the TTL map
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// One page of a folder's children
    Listing {
        folder_id: String,
        filter: ListingFilter,
        page_size: u32,
        page_token: Option<String>,
    },
    /// Results of a name search, optionally scoped to a folder
    Search {
        query: String,
        folder_id: Option<String>,
    },
    /// Metadata of a single file
    Metadata { file_id: String },
}

impl CacheKey {
    pub fn listing(
        folder_id: &str,
        filter: ListingFilter,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Self {
        CacheKey::Listing {
            folder_id: folder_id.to_string(),
            filter,
            page_size,
            page_token: page_token.map(String::from),
        }
    }

    pub fn search(query: &str, folder_id: Option<&str>) -> Self {
        CacheKey::Search {
            query: query.to_string(),
            folder_id: folder_id.map(String::from),
        }
    }

    pub fn metadata(file_id: &str) -> Self {
        CacheKey::Metadata {
            file_id: file_id.to_string(),
        }
    }

    /// Whether this entry may hold a view affected by a change to `scope`
    ///
    /// An unscoped search can include files from any folder, so it matches
    /// every scope.
    pub fn references(&self, scope: &str) -> bool {
        match self {
            CacheKey::Listing { folder_id, .. } => folder_id == scope,
            CacheKey::Search {
                folder_id: Some(folder_id),
                ..
            } => folder_id == scope,
            CacheKey::Search { folder_id: None, .. } => true,
            CacheKey::Metadata { file_id } => file_id == scope,
        }
    }
}

/// Value stored in the TTL map
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Listing(FileList),
    Search(Vec<FileRecord>),
    Metadata(FileRecord),
}
