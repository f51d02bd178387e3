//! Blocking store over the async Drive client
//!
//! Owns a small tokio runtime and blocks the calling thread on each request,
//! giving the facade the synchronous contract it expects.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use super::{ListQuery, RemoteStore};
use crate::config::DriveConfig;
use crate::drive::{
    CredentialProvider, DriveClient, DriveError, FileList, FilePatch, FileRecord, MediaContent,
    NewFile,
};

/// Remote store backed by the Drive REST API
///
/// Must not be called from inside an async runtime worker; offload facade
/// calls to a plain thread (or `spawn_blocking`) instead.
pub struct HttpStore {
    /// Drive API client
    client: DriveClient,
    /// Runtime that drives the client's futures
    runtime: Runtime,
}

impl HttpStore {
    /// Wrap an existing client
    pub fn new(client: DriveClient) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("drive-http")
            .enable_all()
            .build()
            .context("Failed to start HTTP runtime")?;

        Ok(Self { client, runtime })
    }

    /// Build a client against the public Drive API using `config`
    pub fn connect(credentials: Arc<dyn CredentialProvider>, config: &DriveConfig) -> Result<Self> {
        let client = DriveClient::new(credentials, config.request_timeout)?;
        info!(timeout_secs = config.request_timeout.as_secs(), "Drive HTTP store ready");
        Self::new(client)
    }

    /// The underlying async client
    pub fn client(&self) -> &DriveClient {
        &self.client
    }
}

impl RemoteStore for HttpStore {
    fn list(&self, query: &ListQuery) -> Result<FileList, DriveError> {
        self.runtime.block_on(self.client.list(query))
    }

    fn get_metadata(&self, file_id: &str) -> Result<FileRecord, DriveError> {
        self.runtime.block_on(self.client.get_metadata(file_id))
    }

    fn create(
        &self,
        metadata: &NewFile,
        content: Option<&MediaContent>,
    ) -> Result<FileRecord, DriveError> {
        self.runtime.block_on(self.client.create(metadata, content))
    }

    fn update(
        &self,
        file_id: &str,
        patch: &FilePatch,
        content: Option<&MediaContent>,
    ) -> Result<FileRecord, DriveError> {
        self.runtime
            .block_on(self.client.update(file_id, patch, content))
    }

    fn delete(&self, file_id: &str) -> Result<(), DriveError> {
        self.runtime.block_on(self.client.delete(file_id))
    }

    fn download(&self, file_id: &str) -> Result<Vec<u8>, DriveError> {
        self.runtime.block_on(self.client.download(file_id))
    }

    fn batch_get(&self, ids: &[String]) -> HashMap<String, Result<FileRecord, DriveError>> {
        self.runtime.block_on(self.client.batch_get(ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::StaticToken;
    use crate::store::Query;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_blocking_calls_from_plain_thread() {
        // The mock server lives on its own runtime; the store blocks on another
        let server_rt = Builder::new_multi_thread().enable_all().build().unwrap();
        let server = server_rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/drive/v3/files"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "files": [{"id": "1", "name": "a.txt", "mimeType": "text/plain"}]
                })))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path("/drive/v3/files/nope"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server)
                .await;
            server
        });

        let client = DriveClient::with_base_url(
            server.uri(),
            Arc::new(StaticToken::new("token")),
            Duration::from_secs(5),
        )
        .unwrap();
        let store = HttpStore::new(client).unwrap();

        let page = store
            .list(&ListQuery::new(
                Query::Children {
                    folder_id: "root".to_string(),
                    folders_only: false,
                },
                10,
            ))
            .unwrap();
        assert_eq!(page.files[0].id, "1");
        assert_eq!(store.get_metadata("nope").unwrap_err().status(), Some(404));

        drop(store);
        server_rt.block_on(async move { drop(server) });
    }
}
