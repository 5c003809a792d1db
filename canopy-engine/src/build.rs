//! Build coordinator
//!
//! Fans out the configured container images to the build substrate, one
//! pod per image, and monitors every job concurrently to a terminal state.
//! The batch only passes if every image succeeds; the first failing image
//! (in submission order) is surfaced with its substrate logs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::archive;
use crate::config::{ImageBuilderConfig, ImageConfig};
use crate::error::{EngineError, Result};
use canopy_client::{ArtifactStore, BuildJobSpec, BuildSubstrate};
use canopy_core::types::BuildJobPhase;

const JOB_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Coordinates one batch of parallel image builds.
pub struct BuildCoordinator {
    substrate: Arc<dyn BuildSubstrate>,
    store: Arc<dyn ArtifactStore>,
    registry_uri: String,
    insecure_registry: bool,
    images: Vec<ImageConfig>,
    namespace: String,
}

impl BuildCoordinator {
    pub fn new(
        config: &ImageBuilderConfig,
        namespace: impl Into<String>,
        substrate: Arc<dyn BuildSubstrate>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            substrate,
            store,
            registry_uri: config.container_registry_uri.clone(),
            insecure_registry: config.insecure,
            images: config.images.clone(),
            namespace: namespace.into(),
        }
    }

    /// Build and push every configured image tagged with `batch_tag`
    /// (a random tag if none is given). Returns the image names that
    /// were built, in submission order.
    ///
    /// All monitoring tasks are joined before outcomes are evaluated, so a
    /// failing sibling never cancels log collection for the others. On any
    /// failure the whole batch fails with the first failing image's logs.
    pub async fn build_images(&self, batch_tag: Option<&str>) -> Result<Vec<String>> {
        let tag = batch_tag
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let mut jobs = Vec::new();
        for image in &self.images {
            let job_id = self.submit_build(image, &tag).await?;
            info!(image = %image.name, job_id, "build job scheduled");
            jobs.push((image.name.clone(), job_id));
        }

        // Launch every monitor before awaiting any of them.
        let mut handles = Vec::new();
        for (image_name, job_id) in jobs {
            let substrate = Arc::clone(&self.substrate);
            let namespace = self.namespace.clone();
            handles.push(tokio::spawn(monitor_build(
                substrate, namespace, image_name, job_id,
            )));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            let outcome = handle.await.map_err(|e| EngineError::Build {
                image: "<unknown>".to_string(),
                details: format!("build monitor task panicked: {e}"),
            })?;
            outcomes.push(outcome);
        }

        let mut built = Vec::new();
        let mut first_failure = None;
        for outcome in outcomes {
            match outcome {
                Ok(image_name) => built.push(image_name),
                Err(failure) => {
                    if first_failure.is_none() {
                        first_failure = Some(failure);
                    }
                }
            }
        }

        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(built),
        }
    }

    /// Package, stage and submit one image build, then block until the
    /// substrate has scheduled the job out of `Pending` so that later
    /// status reads cannot race job creation.
    async fn submit_build(&self, image: &ImageConfig, tag: &str) -> Result<String> {
        let context_path = image.context_path.clone();
        let extra_paths: Vec<PathBuf> = image.extra_paths.clone();
        let archive = tokio::task::spawn_blocking(move || {
            archive::pack_context(&context_path, &extra_paths)
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;

        let object_name = format!("{}-{}.tar.gz", image.name, tag);
        self.store.put(&object_name, archive.path()).await?;
        // Archive temp file is released here; the store holds the copy.
        drop(archive);

        let spec = BuildJobSpec {
            image_name: image.name.clone(),
            destination: format!("{}/{}:{}", self.registry_uri, image.name, tag),
            context_object: object_name,
            context_store_url: self.store.public_url(),
            insecure_registry: self.insecure_registry,
        };

        let job_id = self.substrate.submit(&spec, &self.namespace).await?;

        loop {
            let phase = self.substrate.get_status(&job_id, &self.namespace).await?;
            if phase != BuildJobPhase::Pending {
                return Ok(job_id);
            }
            debug!(job_id, "build job still pending");
            sleep(JOB_POLL_INTERVAL).await;
        }
    }
}

/// Poll one build job to a terminal phase.
///
/// A transient poll failure is recorded as a build failure with the raw
/// error; the job itself is never retried.
async fn monitor_build(
    substrate: Arc<dyn BuildSubstrate>,
    namespace: String,
    image_name: String,
    job_id: String,
) -> Result<String> {
    loop {
        match substrate.get_status(&job_id, &namespace).await {
            Ok(BuildJobPhase::Succeeded) => {
                info!(image = %image_name, "image built and pushed");
                return Ok(image_name);
            }
            Ok(BuildJobPhase::Failed) => {
                let logs = substrate
                    .get_logs(&job_id, &namespace)
                    .await
                    .unwrap_or_else(|e| format!("(could not fetch logs: {e})"));
                return Err(EngineError::Build {
                    image: image_name,
                    details: format!("Logs:\n{logs}"),
                });
            }
            Ok(_) => sleep(JOB_POLL_INTERVAL).await,
            Err(e) => {
                return Err(EngineError::Build {
                    image: image_name,
                    details: format!("error while polling build job: {e}"),
                });
            }
        }
    }
}
