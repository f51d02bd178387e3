//! In-memory remote store
//!
//! Deterministic stand-in for the Drive API with call counters and
//! injectable failures. Used by collaborators' tests and the facade's own.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::trace;

use super::{ListQuery, Query, RemoteStore};
use crate::drive::{DriveError, FileList, FilePatch, FileRecord, MediaContent, NewFile};

/// Id of the implicit root folder
pub const ROOT_ID: &str = "root";

/// Store operations, for counters and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Get,
    Create,
    Update,
    Delete,
    Download,
}

struct StoredFile {
    record: FileRecord,
    content: Vec<u8>,
}

/// In-memory implementation of [`RemoteStore`]
#[derive(Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, StoredFile>>,
    next_id: AtomicU64,
    calls: Mutex<HashMap<StoreOp, usize>>,
    failures: Mutex<HashMap<StoreOp, VecDeque<DriveError>>>,
    lost_responses: Mutex<HashMap<StoreOp, VecDeque<DriveError>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn not_found(file_id: &str) -> DriveError {
    DriveError::ServiceError {
        status: 404,
        message: format!("File not found: {}", file_id),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, StoredFile>> {
        match self.files.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, StoredFile>> {
        match self.files.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed a record (and its content) directly, bypassing counters
    pub fn insert(&self, record: FileRecord, content: Vec<u8>) {
        self.write()
            .insert(record.id.clone(), StoredFile { record, content });
    }

    /// Current record for `file_id`, bypassing counters
    pub fn record(&self, file_id: &str) -> Option<FileRecord> {
        self.read().get(file_id).map(|f| f.record.clone())
    }

    /// Make the next calls of `op` fail with `errors`, in order
    pub fn fail_next(&self, op: StoreOp, errors: impl IntoIterator<Item = DriveError>) {
        lock(&self.failures).entry(op).or_default().extend(errors);
    }

    /// Make the next calls of `op` take effect but report `errors`, in order
    ///
    /// Models a response lost after the server applied the change.
    pub fn lose_next_response(&self, op: StoreOp, errors: impl IntoIterator<Item = DriveError>) {
        lock(&self.lost_responses).entry(op).or_default().extend(errors);
    }

    /// Number of times `op` was called
    pub fn calls(&self, op: StoreOp) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Reset every call counter
    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Count the call and pop a scripted failure, if any
    fn enter(&self, op: StoreOp) -> Result<(), DriveError> {
        *lock(&self.calls).entry(op).or_default() += 1;
        trace!(op = ?op, "Memory store call");
        match lock(&self.failures).get_mut(&op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Swap a successful result for a scripted lost-response error, if any
    fn leave<T>(&self, op: StoreOp, result: Result<T, DriveError>) -> Result<T, DriveError> {
        let lost = lock(&self.lost_responses)
            .get_mut(&op)
            .and_then(|q| q.pop_front());
        match (result, lost) {
            (Ok(_), Some(err)) => Err(err),
            (result, _) => result,
        }
    }

    fn allocate_id(&self) -> String {
        format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn folder_exists(files: &HashMap<String, StoredFile>, folder_id: &str) -> bool {
        folder_id == ROOT_ID || files.get(folder_id).is_some_and(|f| f.record.is_folder())
    }

    fn matches(query: &Query, record: &FileRecord) -> bool {
        match query {
            Query::Children {
                folder_id,
                folders_only,
            } => record.parents.contains(folder_id) && (!folders_only || record.is_folder()),
            Query::NameContains { text, folder_id } => {
                record.name.contains(text.as_str())
                    && folder_id
                        .as_ref()
                        .map_or(true, |folder| record.parents.contains(folder))
            }
            Query::NameEquals { name, parent_id } => {
                &record.name == name && record.parents.contains(parent_id)
            }
        }
    }
}

impl RemoteStore for MemoryStore {
    fn list(&self, query: &ListQuery) -> Result<FileList, DriveError> {
        self.enter(StoreOp::List)?;

        let mut matching: Vec<FileRecord> = self
            .read()
            .values()
            .filter(|f| Self::matches(&query.query, &f.record))
            .map(|f| f.record.clone())
            .collect();

        // Folders first, then by name; ties broken by id for stable paging
        matching.sort_by(|a, b| {
            b.is_folder()
                .cmp(&a.is_folder())
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });

        let offset = match &query.page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| DriveError::from_status(400, "Invalid page token"))?,
            None => 0,
        };
        let page_size = query.page_size.max(1) as usize;
        let end = (offset + page_size).min(matching.len());
        let files = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(FileList {
            files,
            next_page_token,
        })
    }

    fn get_metadata(&self, file_id: &str) -> Result<FileRecord, DriveError> {
        self.enter(StoreOp::Get)?;
        self.record(file_id).ok_or_else(|| not_found(file_id))
    }

    fn create(
        &self,
        metadata: &NewFile,
        content: Option<&MediaContent>,
    ) -> Result<FileRecord, DriveError> {
        self.enter(StoreOp::Create)?;

        if metadata.name.trim().is_empty() {
            return Err(DriveError::from_status(400, "File name is required"));
        }

        let mut files = self.write();
        if let Some(missing) = metadata
            .parents
            .iter()
            .find(|p| !Self::folder_exists(&files, p))
        {
            return Err(not_found(missing));
        }

        let now = Utc::now();
        let bytes = content.map(|c| c.bytes.clone()).unwrap_or_default();
        let mime_type = metadata
            .mime_type
            .clone()
            .or_else(|| content.map(|c| c.mime_type.clone()))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let is_folder = mime_type == crate::drive::FOLDER_MIME_TYPE;
        let id = self.allocate_id();

        let record = FileRecord {
            id: id.clone(),
            name: metadata.name.clone(),
            mime_type,
            size: (!is_folder).then_some(bytes.len() as u64),
            created_time: Some(now),
            modified_time: Some(now),
            parents: metadata.parents.clone(),
            owners: Vec::new(),
            web_view_link: Some(if is_folder {
                crate::links::folder_url(&id)
            } else {
                crate::links::file_url(&id)
            }),
        };

        if let Some(content) = content {
            if let Some(progress) = &content.progress {
                progress(content.len(), content.len());
            }
        }

        files.insert(
            id,
            StoredFile {
                record: record.clone(),
                content: bytes,
            },
        );
        self.leave(StoreOp::Create, Ok(record))
    }

    fn update(
        &self,
        file_id: &str,
        patch: &FilePatch,
        content: Option<&MediaContent>,
    ) -> Result<FileRecord, DriveError> {
        self.enter(StoreOp::Update)?;

        let mut files = self.write();
        if let Some(missing) = patch
            .add_parents
            .iter()
            .find(|p| !Self::folder_exists(&files, p))
        {
            return Err(not_found(missing));
        }

        let stored = files.get_mut(file_id).ok_or_else(|| not_found(file_id))?;

        // Records are snapshots: build the next one instead of editing in place
        let mut next = stored.record.clone();
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(DriveError::from_status(400, "File name is required"));
            }
            next.name = name.clone();
        }
        next.parents.retain(|p| !patch.remove_parents.contains(p));
        for parent in &patch.add_parents {
            if !next.parents.contains(parent) {
                next.parents.push(parent.clone());
            }
        }
        if let Some(content) = content {
            stored.content = content.bytes.clone();
            next.size = Some(content.len());
            if let Some(progress) = &content.progress {
                progress(content.len(), content.len());
            }
        }
        next.modified_time = Some(Utc::now());

        stored.record = next.clone();
        self.leave(StoreOp::Update, Ok(next))
    }

    fn delete(&self, file_id: &str) -> Result<(), DriveError> {
        self.enter(StoreOp::Delete)?;
        let removed = self
            .write()
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| not_found(file_id));
        self.leave(StoreOp::Delete, removed)
    }

    fn download(&self, file_id: &str) -> Result<Vec<u8>, DriveError> {
        self.enter(StoreOp::Download)?;
        self.read()
            .get(file_id)
            .map(|f| f.content.clone())
            .ok_or_else(|| not_found(file_id))
    }
}
