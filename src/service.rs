//! Drive access facade
//!
//! Composes the cache and the retry policy around a [`RemoteStore`]. Reads
//! go through the cache; every successful mutation invalidates each cached
//! view it could have made stale. Expected failures never escape: they are
//! logged and collapse to `None`, `false` or an empty collection.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

use tracing::{debug, debug_span, info, warn};

use crate::cache::{CacheKey, CacheStats, CachedValue, DriveCache, ListingFilter};
use crate::config::DriveConfig;
use crate::drive::{
    DriveError, FileList, FilePatch, FileRecord, FolderNode, MediaContent, NewFile,
    ProgressCallback,
};
use crate::format::guess_mime_type;
use crate::links::extract_id;
use crate::retry::{FailureEntry, Health, RetryPolicy};
use crate::store::{ListQuery, Query, RemoteStore};

/// Folder listed when the caller names none
pub const DEFAULT_FOLDER_ID: &str = "root";

/// Listing page size
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Search results fetched per query
pub const SEARCH_PAGE_SIZE: u32 = 50;

/// Default folder tree depth
pub const DEFAULT_TREE_DEPTH: u32 = 2;

const LISTING_ORDER: &str = "folder,name";
const TREE_ORDER: &str = "name";

/// Identity of the authenticated session a facade serves
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Outcome of a successful link resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLink {
    pub id: String,
    pub record: FileRecord,
}

/// Cached, retrying Drive access for one account
///
/// Safe to share across threads; the caches are internally synchronized.
pub struct DriveService<S: RemoteStore> {
    account: AccountId,
    store: S,
    cache: DriveCache,
    retry: RetryPolicy,
}

impl<S: RemoteStore> DriveService<S> {
    pub fn new(account: AccountId, store: S, config: &DriveConfig) -> Self {
        let cache = DriveCache::new(&format!("drive_{}", account), &config.cache);
        let retry = RetryPolicy::new(&config.retry);
        info!(account = %account, "Drive session created");
        Self {
            account,
            store,
            cache,
            retry,
        }
    }

    /// Replace the retry policy (e.g. with a recording sleeper)
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn span(&self) -> tracing::Span {
        debug_span!("drive", account = %self.account)
    }

    fn invalidate_scopes<'a>(&self, scopes: impl IntoIterator<Item = &'a str>) {
        for scope in scopes {
            self.cache.invalidate(Some(scope));
        }
    }

    /// One listing page, read through the cache
    fn list_page(
        &self,
        folder_id: &str,
        filter: ListingFilter,
        page_size: u32,
        page_token: Option<&str>,
        use_cache: bool,
    ) -> Option<FileList> {
        let key = CacheKey::listing(folder_id, filter, page_size, page_token);
        if use_cache {
            if let Some(page) = self.cache.get_listing(&key) {
                return Some(page);
            }
        }

        let (folders_only, order) = match filter {
            ListingFilter::All => (false, LISTING_ORDER),
            ListingFilter::FoldersOnly => (true, TREE_ORDER),
        };
        let query = ListQuery::new(
            Query::Children {
                folder_id: folder_id.to_string(),
                folders_only,
            },
            page_size,
        )
        .page_token(page_token)
        .order_by(order);

        let generation = self.cache.generation();
        let page = self
            .retry
            .execute("list_files", || self.store.list(&query))?;
        self.cache
            .set_since(generation, key, CachedValue::Listing(page.clone()));
        Some(page)
    }

    /// List one page of a folder's children
    pub fn list_files(
        &self,
        folder_id: &str,
        page_size: u32,
        page_token: Option<&str>,
        use_cache: bool,
    ) -> Option<FileList> {
        let _span = self.span().entered();
        self.list_page(folder_id, ListingFilter::All, page_size, page_token, use_cache)
    }

    /// Files whose name contains `query`, optionally inside one folder
    ///
    /// Empty results are returned but never cached.
    pub fn search_files(
        &self,
        query: &str,
        folder_id: Option<&str>,
        use_cache: bool,
    ) -> Vec<FileRecord> {
        let _span = self.span().entered();
        let key = CacheKey::search(query, folder_id);
        if use_cache {
            if let Some(files) = self.cache.get_search(&key) {
                return files;
            }
        }

        let list_query = ListQuery::new(
            Query::NameContains {
                text: query.to_string(),
                folder_id: folder_id.map(String::from),
            },
            SEARCH_PAGE_SIZE,
        );
        let generation = self.cache.generation();
        let files = self
            .retry
            .execute("search_files", || self.store.list(&list_query))
            .map(|page| page.files)
            .unwrap_or_default();

        if use_cache && !files.is_empty() {
            self.cache
                .set_since(generation, key, CachedValue::Search(files.clone()));
        }
        files
    }

    /// Metadata for one file
    pub fn get_file_info(&self, file_id: &str, use_cache: bool) -> Option<FileRecord> {
        let _span = self.span().entered();
        if file_id.is_empty() {
            self.retry.reject(
                "get_file_info",
                DriveError::InvalidInput("empty file id".to_string()),
            );
            return None;
        }

        let fetch = || {
            self.retry
                .execute("get_file_info", || self.store.get_metadata(file_id))
        };

        if use_cache {
            return self.cache.get_or_fetch_metadata(file_id, fetch);
        }

        let generation = self.cache.generation();
        let record = fetch()?;
        self.cache.store_metadata_since(generation, &record);
        Some(record)
    }

    /// Metadata for several files
    ///
    /// Cached records are served locally; the rest are fetched with one batch
    /// call. Ids whose batch result was retryable are fetched again one by
    /// one; terminal failures are recorded like any other failed call. Ids
    /// that could not be resolved are absent from the result.
    pub fn get_file_infos(&self, ids: &[String]) -> HashMap<String, FileRecord> {
        let _span = self.span().entered();
        let mut found = HashMap::with_capacity(ids.len());
        let mut misses = Vec::new();

        for id in ids {
            match self.cache.cached_metadata(id) {
                Some(record) => {
                    found.insert(id.clone(), record);
                }
                None => misses.push(id.clone()),
            }
        }

        if misses.is_empty() {
            return found;
        }

        debug!(requested = ids.len(), misses = misses.len(), "Batch fetching metadata");
        let generation = self.cache.generation();
        for (id, result) in self.store.batch_get(&misses) {
            match result {
                Ok(record) => {
                    self.cache.store_metadata_since(generation, &record);
                    found.insert(id, record);
                }
                Err(e) if e.is_retryable() => {
                    debug!(file_id = %id, error = %e, "Batch entry failed, fetching alone");
                    if let Some(record) = self.get_file_info(&id, false) {
                        found.insert(id, record);
                    }
                }
                Err(e) => self.retry.reject("get_file_infos", e),
            }
        }
        found
    }

    /// Resolve a shareable link (or bare id) to a file
    pub fn resolve_link(&self, url: &str) -> Option<ResolvedLink> {
        let _span = self.span().entered();
        let Some(id) = extract_id(url) else {
            debug!(url = url, "No file id in link");
            return None;
        };
        let record = self.get_file_info(&id, true)?;
        Some(ResolvedLink { id, record })
    }

    /// Find a file by exact name inside a folder
    pub fn find_file(&self, name: &str, parent_id: &str) -> Option<FileRecord> {
        let _span = self.span().entered();
        let query = ListQuery::new(
            Query::NameEquals {
                name: name.to_string(),
                parent_id: parent_id.to_string(),
            },
            1,
        );
        self.retry
            .execute("find_file", || self.store.list(&query))?
            .files
            .into_iter()
            .next()
    }

    /// Create a folder under `parent_id`
    pub fn create_folder(&self, name: &str, parent_id: &str) -> Option<FileRecord> {
        let _span = self.span().entered();
        if name.trim().is_empty() {
            self.retry.reject(
                "create_folder",
                DriveError::InvalidInput("empty folder name".to_string()),
            );
            return None;
        }

        let metadata = NewFile::folder(name, parent_id);
        let record = self
            .retry
            .execute("create_folder", || self.store.create(&metadata, None))?;

        self.cache.invalidate(Some(parent_id));
        info!(folder_id = %record.id, name = name, parent = parent_id, "Created folder");
        Some(record)
    }

    /// Upload a local file into `parent_id`, named after the file unless `name` is given
    pub fn upload_file(
        &self,
        path: &Path,
        parent_id: &str,
        name: Option<&str>,
    ) -> Option<FileRecord> {
        self.upload_file_with_progress(path, parent_id, name, None)
    }

    /// Like [`upload_file`](Self::upload_file), reporting `(sent, total)` bytes
    pub fn upload_file_with_progress(
        &self,
        path: &Path,
        parent_id: &str,
        name: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> Option<FileRecord> {
        let _span = self.span().entered();
        let content = self.read_source("upload_file", path, progress)?;

        let file_name = match name {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        if file_name.is_empty() {
            self.retry.reject(
                "upload_file",
                DriveError::InvalidInput(format!("no file name for {}", path.display())),
            );
            return None;
        }

        let metadata = NewFile::file(&file_name, parent_id);
        let record = self
            .retry
            .execute("upload_file", || self.store.create(&metadata, Some(&content)))?;

        self.cache.invalidate(Some(parent_id));
        info!(file_id = %record.id, name = %file_name, parent = parent_id, "Uploaded file");
        Some(record)
    }

    /// Replace a file's content, optionally renaming it
    pub fn update_file_content(
        &self,
        file_id: &str,
        path: &Path,
        new_name: Option<&str>,
    ) -> Option<FileRecord> {
        let _span = self.span().entered();
        let content = self.read_source("update_file_content", path, None)?;

        let patch = FilePatch {
            name: new_name.map(String::from),
            ..FilePatch::default()
        };
        let record = self.retry.execute("update_file_content", || {
            self.store.update(file_id, &patch, Some(&content))
        })?;

        // Parent listings carry size and modification time
        self.cache.invalidate(Some(file_id));
        self.invalidate_scopes(record.parents.iter().map(String::as_str));
        info!(file_id = file_id, size = content.len(), "Updated file content");
        Some(record)
    }

    /// Move a file into `new_parent_id`, out of every current parent
    pub fn move_file(&self, file_id: &str, new_parent_id: &str) -> Option<FileRecord> {
        let _span = self.span().entered();

        // Read and update in the same attempt so the parents removed are the
        // parents that were actually replaced. Parents seen by every attempt
        // are kept: an earlier attempt may have applied before its response
        // was lost.
        let seen_parents = RefCell::new(BTreeSet::new());
        let record = self.retry.execute("move_file", || {
            let current = self.store.get_metadata(file_id)?;
            seen_parents
                .borrow_mut()
                .extend(current.parents.iter().cloned());
            let patch = FilePatch::reparent(current.parents, new_parent_id);
            self.store.update(file_id, &patch, None)
        })?;
        let prior_parents = seen_parents.into_inner();

        self.invalidate_scopes(prior_parents.iter().map(String::as_str));
        self.cache.invalidate(Some(new_parent_id));
        self.cache.invalidate(Some(file_id));
        info!(
            file_id = file_id,
            from = ?prior_parents,
            to = new_parent_id,
            "Moved file"
        );
        Some(record)
    }

    /// Rename a file
    pub fn rename_file(&self, file_id: &str, new_name: &str) -> Option<FileRecord> {
        let _span = self.span().entered();
        if new_name.trim().is_empty() {
            self.retry.reject(
                "rename_file",
                DriveError::InvalidInput("empty file name".to_string()),
            );
            return None;
        }

        let patch = FilePatch::rename(new_name);
        let record = self
            .retry
            .execute("rename_file", || self.store.update(file_id, &patch, None))?;

        self.cache.invalidate(Some(file_id));
        self.invalidate_scopes(record.parents.iter().map(String::as_str));
        info!(file_id = file_id, name = new_name, "Renamed file");
        Some(record)
    }

    /// Permanently delete a file
    ///
    /// Parents are read fresh before deleting. When they cannot be read the
    /// whole cache is cleared after a successful delete.
    pub fn delete_file(&self, file_id: &str) -> bool {
        let _span = self.span().entered();
        let parents = self.get_file_info(file_id, false).map(|r| r.parents);

        if self
            .retry
            .execute("delete_file", || self.store.delete(file_id))
            .is_none()
        {
            return false;
        }

        match &parents {
            Some(parents) => {
                self.cache.invalidate(Some(file_id));
                self.invalidate_scopes(parents.iter().map(String::as_str));
            }
            None => {
                warn!(file_id = file_id, "Parents unknown after delete, clearing cache");
                self.cache.invalidate(None);
            }
        }
        info!(file_id = file_id, "Deleted file");
        true
    }

    /// Download a file's content
    pub fn download_file(&self, file_id: &str) -> Option<Vec<u8>> {
        let _span = self.span().entered();
        let bytes = self
            .retry
            .execute("download_file", || self.store.download(file_id))?;
        debug!(file_id = file_id, bytes = bytes.len(), "Downloaded file");
        Some(bytes)
    }

    /// Download a file and decode it as UTF-8 text
    pub fn read_file_content(&self, file_id: &str) -> Option<String> {
        let bytes = self.download_file(file_id)?;
        match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(file_id = file_id, error = %e, "File content is not UTF-8");
                None
            }
        }
    }

    /// Sub-folder tree of `folder_id`, `max_depth` levels deep
    ///
    /// `None` means the depth limit was reached before this level.
    pub fn get_folder_tree(&self, folder_id: &str, max_depth: u32) -> Option<Vec<FolderNode>> {
        let _span = self.span().entered();
        self.build_tree(folder_id, 0, max_depth)
    }

    fn build_tree(&self, folder_id: &str, depth: u32, max_depth: u32) -> Option<Vec<FolderNode>> {
        if depth >= max_depth {
            return None;
        }

        let Some(folders) = self.list_all_folders(folder_id) else {
            warn!(folder_id = folder_id, depth = depth, "Folder tree level unavailable");
            return Some(Vec::new());
        };

        Some(
            folders
                .into_iter()
                .map(|folder| FolderNode {
                    children: self.build_tree(&folder.id, depth + 1, max_depth),
                    id: folder.id,
                    name: folder.name,
                })
                .collect(),
        )
    }

    /// Every sub-folder of `folder_id`, following all pages
    fn list_all_folders(&self, folder_id: &str) -> Option<Vec<FileRecord>> {
        let mut folders = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self.list_page(
                folder_id,
                ListingFilter::FoldersOnly,
                DEFAULT_PAGE_SIZE,
                token.as_deref(),
                true,
            )?;
            folders.extend(page.files.into_iter().filter(FileRecord::is_folder));
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => return Some(folders),
            }
        }
    }

    /// Drop every cached entry
    pub fn clear_cache(&self) {
        let _span = self.span().entered();
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.log_metrics();
        self.cache.stats()
    }

    /// Most recent final failures, oldest first
    pub fn recent_errors(&self) -> Vec<FailureEntry> {
        self.retry.recent_failures()
    }

    pub fn health(&self) -> Health {
        self.retry.health()
    }

    fn read_source(
        &self,
        label: &str,
        path: &Path,
        progress: Option<ProgressCallback>,
    ) -> Option<MediaContent> {
        match fs::read(path) {
            Ok(bytes) => {
                let content = MediaContent::new(bytes, guess_mime_type(path));
                Some(match progress {
                    Some(progress) => content.with_progress(progress),
                    None => content,
                })
            }
            Err(e) => {
                self.retry.reject(
                    label,
                    DriveError::InvalidInput(format!("cannot read {}: {}", path.display(), e)),
                );
                None
            }
        }
    }
}
