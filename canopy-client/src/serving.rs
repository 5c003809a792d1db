//! Serving control plane client
//!
//! The serving control plane manages deployed inference endpoints,
//! including canary traffic splits. The concrete implementation speaks the
//! KServe `InferenceService` custom resource API on a Kubernetes API server.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::handle_response;

const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// External system managing deployed inference endpoints.
#[async_trait]
pub trait ServingControlPlane: Send + Sync {
    /// Names of all endpoints in the namespace.
    async fn list(&self, namespace: &str) -> Result<Vec<String>>;

    /// Create a brand-new endpoint from a rendered serving spec.
    async fn create(&self, spec: &Value, namespace: &str) -> Result<()>;

    /// Replace an existing endpoint in place.
    async fn replace(&self, name: &str, spec: &Value, namespace: &str) -> Result<()>;

    /// Full status block of an endpoint, verbatim, for diagnostics.
    async fn get_status(&self, name: &str, namespace: &str) -> Result<Value>;

    /// Latest created revision of the endpoint's predictor, if reported.
    async fn latest_revision(&self, name: &str, namespace: &str) -> Result<Option<String>>;

    /// Block until the endpoint reports Ready, or time out.
    async fn wait_ready(&self, name: &str, namespace: &str, timeout: Duration) -> Result<()>;
}

/// KServe-backed serving control plane.
#[derive(Debug, Clone)]
pub struct KserveClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl KserveClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn isvc_url(&self, namespace: &str, name: Option<&str>) -> String {
        let base = format!(
            "{}/apis/serving.kserve.io/v1beta1/namespaces/{}/inferenceservices",
            self.base_url, namespace
        );
        match name {
            Some(name) => format!("{base}/{name}"),
            None => base,
        }
    }

    async fn get_isvc(&self, name: &str, namespace: &str) -> Result<Value> {
        let url = self.isvc_url(namespace, Some(name));
        let response = self.request(self.client.get(&url)).send().await?;
        handle_response(response).await
    }
}

#[async_trait]
impl ServingControlPlane for KserveClient {
    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        let url = self.isvc_url(namespace, None);
        let response = self.request(self.client.get(&url)).send().await?;
        let body: Value = handle_response(response).await?;

        let names = body
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.pointer("/metadata/name"))
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(names)
    }

    async fn create(&self, spec: &Value, namespace: &str) -> Result<()> {
        let url = self.isvc_url(namespace, None);
        let response = self.request(self.client.post(&url)).json(spec).send().await?;
        let _: Value = handle_response(response).await?;
        Ok(())
    }

    async fn replace(&self, name: &str, spec: &Value, namespace: &str) -> Result<()> {
        // Server-side apply keeps the replace a single call; the alternative
        // (get, patch resourceVersion, put) loses to concurrent writers anyway.
        let url = format!(
            "{}?fieldManager=canopy&force=true",
            self.isvc_url(namespace, Some(name))
        );
        let response = self
            .request(self.client.patch(&url))
            .header("Content-Type", "application/apply-patch+yaml")
            .json(spec)
            .send()
            .await?;
        let _: Value = handle_response(response).await?;
        Ok(())
    }

    async fn get_status(&self, name: &str, namespace: &str) -> Result<Value> {
        let isvc = self.get_isvc(name, namespace).await?;
        Ok(isvc.get("status").cloned().unwrap_or(Value::Null))
    }

    async fn latest_revision(&self, name: &str, namespace: &str) -> Result<Option<String>> {
        let isvc = self.get_isvc(name, namespace).await?;
        Ok(isvc
            .pointer("/status/components/predictor/latestCreatedRevision")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn wait_ready(&self, name: &str, namespace: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let isvc = self.get_isvc(name, namespace).await?;
            let ready = isvc
                .pointer("/status/conditions")
                .and_then(Value::as_array)
                .map(|conditions| {
                    conditions.iter().any(|c| {
                        c.get("type").and_then(Value::as_str) == Some("Ready")
                            && c.get("status").and_then(Value::as_str) == Some("True")
                    })
                })
                .unwrap_or(false);

            if ready {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ClientError::Timeout(format!(
                    "inference service '{name}' not ready after {}s",
                    timeout.as_secs()
                )));
            }

            debug!(name, namespace, "endpoint not ready, polling again");
            sleep(READY_POLL_INTERVAL).await;
        }
    }
}
