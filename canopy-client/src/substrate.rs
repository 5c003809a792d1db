//! Build substrate client
//!
//! The build substrate schedules one pod per container image build and
//! reports its lifecycle. The concrete implementation talks to the
//! Kubernetes core API and renders a kaniko executor pod around the staged
//! build-context archive.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{ClientError, Result};
use crate::{handle_empty_response, handle_response};
use canopy_core::types::BuildJobPhase;

/// Everything the substrate needs to build and push one image.
#[derive(Debug, Clone)]
pub struct BuildJobSpec {
    /// Image name, also attached as a pod label so failures can be
    /// attributed back to the configured image.
    pub image_name: String,
    /// Full push destination, `{registry}/{name}:{tag}`.
    pub destination: String,
    /// Object name of the staged `.tar.gz` build context.
    pub context_object: String,
    /// Base URL of the artifact store the init container pulls from.
    pub context_store_url: String,
    /// Allow pushing to a registry without TLS.
    pub insecure_registry: bool,
}

/// External system that schedules a containerized build job and reports
/// its status and logs.
#[async_trait]
pub trait BuildSubstrate: Send + Sync {
    /// Submit a build job; returns the substrate-assigned job id.
    async fn submit(&self, spec: &BuildJobSpec, namespace: &str) -> Result<String>;

    /// Current phase of a previously submitted job.
    async fn get_status(&self, job_id: &str, namespace: &str) -> Result<BuildJobPhase>;

    /// Full log stream of a job, used for failure diagnostics.
    async fn get_logs(&self, job_id: &str, namespace: &str) -> Result<String>;
}

/// Kubernetes-backed build substrate running kaniko pods.
#[derive(Debug, Clone)]
pub struct KubeBuildSubstrate {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl KubeBuildSubstrate {
    /// Create a substrate client against a Kubernetes API server URL
    /// (e.g. `http://localhost:8001` behind `kubectl proxy`, or the
    /// in-cluster endpoint with a bearer token).
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

    /// Render the kaniko builder pod: an init container pulls the staged
    /// context archive, the main container builds and pushes the image.
    fn pod_manifest(&self, spec: &BuildJobSpec) -> Value {
        let mut args = vec![
            "--dockerfile=Dockerfile".to_string(),
            "--cache=true".to_string(),
            format!("--context=tar:///context/{}", spec.context_object),
            format!("--destination={}", spec.destination),
        ];
        if spec.insecure_registry {
            args.push("--insecure".to_string());
        }

        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "generateName": format!("canopy-build-{}-", spec.image_name),
                "labels": { "image_name": spec.image_name }
            },
            "spec": {
                "restartPolicy": "Never",
                "initContainers": [{
                    "name": "pull-context",
                    "image": "curlimages/curl:latest",
                    "command": ["sh", "-c"],
                    "args": [format!(
                        "curl -fsSL {}/{} -o /context/{}",
                        spec.context_store_url, spec.context_object, spec.context_object
                    )],
                    "volumeMounts": [{ "name": "context-folder", "mountPath": "/context" }]
                }],
                "containers": [{
                    "name": "image-builder",
                    "image": "gcr.io/kaniko-project/executor:latest",
                    "args": args,
                    "volumeMounts": [{ "name": "context-folder", "mountPath": "/context" }]
                }],
                "volumes": [{ "name": "context-folder", "emptyDir": {} }]
            }
        })
    }
}

#[async_trait]
impl BuildSubstrate for KubeBuildSubstrate {
    async fn submit(&self, spec: &BuildJobSpec, namespace: &str) -> Result<String> {
        let url = format!("{}/api/v1/namespaces/{}/pods", self.base_url, namespace);
        let manifest = self.pod_manifest(spec);
        let response = self.request(self.client.post(&url)).json(&manifest).send().await?;

        let created: Value = handle_response(response).await?;
        created
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ClientError::ParseError("pod creation response missing metadata.name".to_string())
            })
    }

    async fn get_status(&self, job_id: &str, namespace: &str) -> Result<BuildJobPhase> {
        let url = format!(
            "{}/api/v1/namespaces/{}/pods/{}",
            self.base_url, namespace, job_id
        );
        let response = self.request(self.client.get(&url)).send().await?;
        let pod: Value = handle_response(response).await?;

        let phase = pod
            .pointer("/status/phase")
            .and_then(Value::as_str)
            .unwrap_or("Pending");

        Ok(match phase {
            "Succeeded" => BuildJobPhase::Succeeded,
            "Failed" => BuildJobPhase::Failed,
            "Running" => BuildJobPhase::Running,
            _ => BuildJobPhase::Pending,
        })
    }

    async fn get_logs(&self, job_id: &str, namespace: &str) -> Result<String> {
        let url = format!(
            "{}/api/v1/namespaces/{}/pods/{}/log",
            self.base_url, namespace, job_id
        );
        let response = self.request(self.client.get(&url)).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response.text().await?)
    }
}

/// Delete is unused by the coordinator but kept for operator tooling.
impl KubeBuildSubstrate {
    pub async fn delete_job(&self, job_id: &str, namespace: &str) -> Result<()> {
        let url = format!(
            "{}/api/v1/namespaces/{}/pods/{}",
            self.base_url, namespace, job_id
        );
        let response = self.request(self.client.delete(&url)).send().await?;
        handle_empty_response(response).await
    }
}
