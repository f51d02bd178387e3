//! Google Drive API client

pub mod client;
pub mod errors;
pub mod types;

pub use client::{CredentialProvider, DriveClient, StaticToken};
pub use errors::DriveError;
pub use types::*;
