//! Artifact store client
//!
//! Build contexts are archived locally and staged somewhere the build
//! substrate's init container can fetch them. The contract is a single
//! upload; the concrete implementation PUTs against an HTTP object
//! gateway (MinIO or an internal artifact proxy).

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::handle_empty_response;

/// Staging area for build-context archives.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload a local file under `object_name`; returns the stored name.
    async fn put(&self, object_name: &str, local_path: &Path) -> Result<String>;

    /// Base URL build jobs use to fetch staged objects.
    fn public_url(&self) -> String;
}

/// HTTP object gateway implementation.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    base_url: String,
    bucket: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ArtifactStore for HttpObjectStore {
    async fn put(&self, object_name: &str, local_path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(local_path).await?;
        let url = format!("{}/{}/{}", self.base_url, self.bucket, object_name);

        let mut builder = self.client.put(&url).body(bytes);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        handle_empty_response(response).await?;

        Ok(object_name.to_string())
    }

    fn public_url(&self) -> String {
        format!("{}/{}", self.base_url, self.bucket)
    }
}
