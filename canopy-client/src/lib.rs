//! Canopy platform clients
//!
//! Capability contracts for the four external platforms the delivery
//! pipeline drives, plus thin reqwest-backed implementations:
//!
//! - [`BuildSubstrate`]: schedules containerized image builds and reports
//!   their status and logs (Kubernetes pods running kaniko)
//! - [`ExecutionService`]: stores pipeline definitions, experiments and
//!   runs, and reports run status (Kubeflow Pipelines REST API)
//! - [`ServingControlPlane`]: manages deployed inference endpoints with
//!   canary traffic splits (KServe inference services)
//! - [`CollabPlatform`]: the issue/pull-request system used both as a
//!   command channel and as the append-only hidden-state log (GitHub)
//!
//! Two narrower contracts support them: [`ArtifactStore`] stages build
//! contexts where the substrate can reach them, and [`EndpointProber`]
//! performs the single smoke-test POST against a canary revision.
//!
//! The engine depends only on the traits; concrete clients are selected at
//! the composition boundary in the CLI.

pub mod collab;
pub mod error;
pub mod execution;
pub mod prober;
pub mod serving;
pub mod store;
pub mod substrate;

pub use collab::{CollabPlatform, DevCollabPlatform, GithubCollab};
pub use error::{ClientError, Result};
pub use execution::{
    ExecutionService, ExperimentSummary, KubeflowClient, RunCompletion, UploadedPipeline,
};
pub use prober::{EndpointProber, HttpProber, ProbeResponse};
pub use serving::{KserveClient, ServingControlPlane};
pub use store::{ArtifactStore, HttpObjectStore};
pub use substrate::{BuildJobSpec, BuildSubstrate, KubeBuildSubstrate};

use serde::de::DeserializeOwned;

/// Check an API response status and deserialize the JSON body.
pub(crate) async fn handle_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {e}")))
}

/// Check an API response status for calls that return no useful body.
pub(crate) async fn handle_empty_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    Ok(())
}
