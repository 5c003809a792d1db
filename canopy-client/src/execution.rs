//! Execution service client
//!
//! The execution service stores pipeline definitions, experiments and runs,
//! and reports run status. The concrete implementation speaks the Kubeflow
//! Pipelines v1beta1 REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::handle_response;

/// An experiment as listed by the execution service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentSummary {
    pub id: String,
    pub name: String,
}

/// A freshly uploaded pipeline (or pipeline version).
#[derive(Debug, Clone)]
pub struct UploadedPipeline {
    pub pipeline_id: String,
    pub version_id: String,
}

/// Terminal state of a completed run.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    /// Raw status string as reported by the service, e.g. `Succeeded`.
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// External platform that stores pipeline definitions, experiments and runs.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    async fn list_experiments(&self, namespace: &str) -> Result<Vec<ExperimentSummary>>;

    async fn create_experiment(
        &self,
        name: &str,
        description: &str,
        namespace: &str,
    ) -> Result<()>;

    async fn get_experiment(&self, name: &str, namespace: &str) -> Result<ExperimentSummary>;

    /// Submit a run of a pipeline version; returns the run id.
    async fn submit_run(
        &self,
        experiment_id: &str,
        job_name: &str,
        version_id: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<String>;

    /// Block until the run reaches a terminal status or the deadline passes.
    async fn wait_completion(&self, run_id: &str, timeout: Duration) -> Result<RunCompletion>;

    /// Upload a brand-new pipeline; captures its generated default version.
    async fn upload_pipeline(
        &self,
        artifact: &Path,
        name: &str,
        description: &str,
    ) -> Result<UploadedPipeline>;

    /// Upload a new version under an existing pipeline; returns the version id.
    async fn upload_pipeline_version(
        &self,
        artifact: &Path,
        pipeline_id: &str,
        version_name: &str,
    ) -> Result<String>;

    /// Pipeline id for a configured name, or `None` if never uploaded.
    async fn get_pipeline_id(&self, name: &str) -> Result<Option<String>>;

    /// UI prefix used to build operator-facing details links.
    fn ui_url(&self) -> String;
}

/// Kubeflow Pipelines REST client.
#[derive(Debug, Clone)]
pub struct KubeflowClient {
    base_url: String,
    client: reqwest::Client,
}

/// Statuses the v1beta1 API reports as final.
const TERMINAL_RUN_STATUSES: [&str; 4] = ["Succeeded", "Failed", "Error", "Skipped"];

const RUN_POLL_INTERVAL: Duration = Duration::from_secs(5);

impl KubeflowClient {
    /// Create a client against a Kubeflow installation URL
    /// (e.g. `https://kubeflow.example.com`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/pipeline/apis/v1beta1/{}", self.base_url, path)
    }

    async fn upload_multipart(&self, url: &str, artifact: &Path) -> Result<Value> {
        let bytes = tokio::fs::read(artifact).await?;
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "pipeline.tar.gz".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("uploadfile", part);

        let response = self.client.post(url).multipart(form).send().await?;
        handle_response(response).await
    }
}

#[async_trait]
impl ExecutionService for KubeflowClient {
    async fn list_experiments(&self, namespace: &str) -> Result<Vec<ExperimentSummary>> {
        let url = format!(
            "{}?page_size=1000&resource_reference_key.type=NAMESPACE&resource_reference_key.id={}",
            self.api("experiments"),
            namespace
        );
        let response = self.client.get(&url).send().await?;
        let body: Value = handle_response(response).await?;

        let experiments = body
            .get("experiments")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|e| {
                        Some(ExperimentSummary {
                            id: e.get("id")?.as_str()?.to_string(),
                            name: e.get("name")?.as_str()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(experiments)
    }

    async fn create_experiment(
        &self,
        name: &str,
        description: &str,
        namespace: &str,
    ) -> Result<()> {
        let body = json!({
            "name": name,
            "description": description,
            "resource_references": [{
                "key": { "type": "NAMESPACE", "id": namespace },
                "relationship": "OWNER"
            }]
        });
        let response = self
            .client
            .post(self.api("experiments"))
            .json(&body)
            .send()
            .await?;
        let _: Value = handle_response(response).await?;
        Ok(())
    }

    async fn get_experiment(&self, name: &str, namespace: &str) -> Result<ExperimentSummary> {
        self.list_experiments(namespace)
            .await?
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| ClientError::NotFound(format!("experiment '{name}'")))
    }

    async fn submit_run(
        &self,
        experiment_id: &str,
        job_name: &str,
        version_id: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<String> {
        let parameters: Vec<Value> = params
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                json!({ "name": name, "value": value })
            })
            .collect();

        let body = json!({
            "name": job_name,
            "resource_references": [
                {
                    "key": { "type": "EXPERIMENT", "id": experiment_id },
                    "relationship": "OWNER"
                },
                {
                    "key": { "type": "PIPELINE_VERSION", "id": version_id },
                    "relationship": "CREATOR"
                }
            ],
            "pipeline_spec": { "parameters": parameters }
        });

        let response = self.client.post(self.api("runs")).json(&body).send().await?;
        let created: Value = handle_response(response).await?;

        created
            .pointer("/run/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::ParseError("run creation response missing run.id".to_string()))
    }

    async fn wait_completion(&self, run_id: &str, timeout: Duration) -> Result<RunCompletion> {
        let deadline = tokio::time::Instant::now() + timeout;
        let url = self.api(&format!("runs/{run_id}"));

        loop {
            let response = self.client.get(&url).send().await?;
            let body: Value = handle_response(response).await?;

            let status = body
                .pointer("/run/status")
                .and_then(Value::as_str)
                .unwrap_or("");

            if TERMINAL_RUN_STATUSES.contains(&status) {
                let parse_ts = |pointer: &str| {
                    body.pointer(pointer)
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
                        .unwrap_or_else(Utc::now)
                };
                return Ok(RunCompletion {
                    status: status.to_string(),
                    started_at: parse_ts("/run/created_at"),
                    finished_at: parse_ts("/run/finished_at"),
                });
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ClientError::Timeout(format!(
                    "run {run_id} still '{status}' after {}s",
                    timeout.as_secs()
                )));
            }

            debug!(run_id, status, "run not finished, polling again");
            sleep(RUN_POLL_INTERVAL).await;
        }
    }

    async fn upload_pipeline(
        &self,
        artifact: &Path,
        name: &str,
        description: &str,
    ) -> Result<UploadedPipeline> {
        let url = format!(
            "{}?name={}&description={}",
            self.api("pipelines/upload"),
            name,
            description
        );
        let body = self.upload_multipart(&url, artifact).await?;

        let pipeline_id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::ParseError("upload response missing id".to_string()))?;
        let version_id = body
            .pointer("/default_version/id")
            .and_then(Value::as_str)
            .unwrap_or(pipeline_id);

        Ok(UploadedPipeline {
            pipeline_id: pipeline_id.to_string(),
            version_id: version_id.to_string(),
        })
    }

    async fn upload_pipeline_version(
        &self,
        artifact: &Path,
        pipeline_id: &str,
        version_name: &str,
    ) -> Result<String> {
        let url = format!(
            "{}?name={}&pipelineid={}",
            self.api("pipelines/upload_version"),
            version_name,
            pipeline_id
        );
        let body = self.upload_multipart(&url, artifact).await?;

        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ClientError::ParseError("version upload response missing id".to_string())
            })
    }

    async fn get_pipeline_id(&self, name: &str) -> Result<Option<String>> {
        let url = format!("{}?page_size=200", self.api("pipelines"));
        let response = self.client.get(&url).send().await?;
        let body: Value = handle_response(response).await?;

        let id = body
            .get("pipelines")
            .and_then(Value::as_array)
            .and_then(|items| {
                items.iter().find(|p| {
                    p.get("name").and_then(Value::as_str) == Some(name)
                })
            })
            .and_then(|p| p.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(id)
    }

    fn ui_url(&self) -> String {
        format!("{}/pipeline", self.base_url)
    }
}
