//! Endpoint prober
//!
//! The rollout controller smoke-tests a canary revision with exactly one
//! POST of a sample input. The contract separates transport failures
//! (connection refused, timeout) from HTTP responses, because the two have
//! different rollout semantics: both stall the canary at 0% traffic, but
//! only a response carries a status code and body to report.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::Result;

/// Outcome of a probe that produced an HTTP response.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One-shot JSON POST against a (usually in-cluster) inference endpoint.
#[async_trait]
pub trait EndpointProber: Send + Sync {
    /// POST `input` to `url`. Transport-level failures surface as `Err`;
    /// any HTTP response, success or not, is `Ok`.
    async fn post_json(&self, url: &str, input: &Value) -> Result<ProbeResponse>;
}

/// reqwest-backed prober.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl EndpointProber for HttpProber {
    async fn post_json(&self, url: &str, input: &Value) -> Result<ProbeResponse> {
        let response = self.client.post(url).json(input).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(ProbeResponse { status, body })
    }
}
