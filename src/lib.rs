//! Drive access layer
//!
//! Cached, retrying access to Google Drive for a desktop browser. Callers
//! build one [`DriveService`] per signed-in account and call its blocking
//! operations from a worker thread.
//!
//! ```no_run
//! use std::sync::Arc;
//! use drive_access::{AccountId, DriveConfig, DriveService, HttpStore, StaticToken};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = DriveConfig::from_env();
//! let store = HttpStore::connect(Arc::new(StaticToken::new("ya29.token")), &config)?;
//! let drive = DriveService::new(AccountId::from("me@example.com"), store, &config);
//!
//! if let Some(page) = drive.list_files("root", 100, None, true) {
//!     for file in &page.files {
//!         println!("{} {}", file.name, drive_access::format::format_size(file.size));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod drive;
pub mod format;
pub mod links;
pub mod retry;
pub mod service;
pub mod store;

pub use config::{CacheConfig, DriveConfig, RetryConfig};
pub use drive::{
    CredentialProvider, DriveClient, DriveError, FileList, FileRecord, FolderNode, StaticToken,
};
pub use retry::{FailureEntry, Health, RetryPolicy};
pub use service::{AccountId, DriveService, ResolvedLink};
pub use store::{HttpStore, MemoryStore, RemoteStore};
