//! Pipeline builder
//!
//! Compiles the pipeline definition into a temporary artifact, uploads it
//! to the execution service (as a new pipeline or a new version of an
//! existing one), then kicks off the image builds tagged with the fresh
//! version id. The compiled artifact is a temp file released on every exit
//! path; the uploaded pipeline is never rolled back on a later failure.

use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::build::BuildCoordinator;
use crate::config::{ExecutionMode, PipelineConfig};
use crate::error::{EngineError, Result};
use canopy_client::ExecutionService;
use canopy_core::types::BuildDescriptor;

/// Compilation failure, split so "module/function not found" can be
/// reported as a setup problem rather than a generic compile error.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("pipeline function not found: {0}")]
    FunctionNotFound(String),
    #[error("{0}")]
    Failed(String),
}

/// Turns a pipeline definition file into an uploadable artifact.
#[async_trait]
pub trait PipelineCompiler: Send + Sync {
    async fn compile(
        &self,
        definition: &Path,
        function_name: Option<&str>,
        mode: ExecutionMode,
        output: &Path,
    ) -> std::result::Result<(), CompileError>;
}

/// Compiler that shells out to the execution service's SDK compiler
/// (`dsl-compile` by default).
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: String,
}

impl CommandCompiler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for CommandCompiler {
    fn default() -> Self {
        Self::new("dsl-compile")
    }
}

#[async_trait]
impl PipelineCompiler for CommandCompiler {
    async fn compile(
        &self,
        definition: &Path,
        function_name: Option<&str>,
        mode: ExecutionMode,
        output: &Path,
    ) -> std::result::Result<(), CompileError> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .arg("--py")
            .arg(definition)
            .arg("--output")
            .arg(output)
            .arg("--mode")
            .arg(mode.as_flag())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(function) = function_name {
            command.arg("--function").arg(function);
        }

        let result = command
            .output()
            .await
            .map_err(|e| CompileError::Failed(format!("cannot run {}: {e}", self.program)))?;

        if result.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&result.stderr);
        if stderr.contains("ModuleNotFoundError") || stderr.contains("AttributeError") {
            Err(CompileError::FunctionNotFound(stderr.into_owned()))
        } else {
            Err(CompileError::Failed(stderr.into_owned()))
        }
    }
}

/// Compiles, uploads and (optionally) builds images for one pipeline.
pub struct PipelineBuilder {
    execution: Arc<dyn ExecutionService>,
    compiler: Arc<dyn PipelineCompiler>,
    coordinator: Option<BuildCoordinator>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn new(
        execution: Arc<dyn ExecutionService>,
        compiler: Arc<dyn PipelineCompiler>,
        coordinator: Option<BuildCoordinator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            execution,
            compiler,
            coordinator,
            config,
        }
    }

    /// Compile and upload the pipeline, then build any configured images
    /// tagged with the new version id.
    pub async fn build(&self) -> Result<BuildDescriptor> {
        let pipeline_id = self.execution.get_pipeline_id(&self.config.name).await?;

        // Owned for the duration of this call and deleted on drop, so the
        // artifact is released on success, compile failure and build failure.
        let artifact = tempfile::Builder::new().suffix(".tar.gz").tempfile()?;

        self.compiler
            .compile(
                &self.config.definition_path,
                self.config.function_name.as_deref(),
                self.config.execution_mode,
                artifact.path(),
            )
            .await
            .map_err(|e| match e {
                CompileError::FunctionNotFound(details) => EngineError::Config(format!(
                    "invalid pipeline function setup, check pipeline.definition_path and \
                     pipeline.function_name: {details}"
                )),
                CompileError::Failed(details) => EngineError::Compile(details),
            })?;

        let descriptor = self.upload(pipeline_id, artifact.path()).await?;
        info!(
            pipeline_id = %descriptor.pipeline_id,
            version_id = %descriptor.version_id,
            "pipeline uploaded"
        );

        if let Some(coordinator) = &self.coordinator {
            coordinator
                .build_images(Some(&descriptor.version_id))
                .await?;
        }

        Ok(descriptor)
    }

    async fn upload(&self, pipeline_id: Option<String>, artifact: &Path) -> Result<BuildDescriptor> {
        let ui = self.execution.ui_url();

        match pipeline_id {
            Some(pipeline_id) => {
                let version_name =
                    format!("Version {}", Utc::now().format("%d %b %H:%M:%S, %Y"));
                let version_id = self
                    .execution
                    .upload_pipeline_version(artifact, &pipeline_id, &version_name)
                    .await?;
                Ok(BuildDescriptor {
                    url: format!("{ui}/#/pipelines/details/{pipeline_id}/version/{version_id}"),
                    pipeline_id,
                    version_id,
                })
            }
            None => {
                let uploaded = self
                    .execution
                    .upload_pipeline(artifact, &self.config.name, &self.config.description)
                    .await?;
                Ok(BuildDescriptor {
                    url: format!("{ui}/#/pipelines/details/{}", uploaded.pipeline_id),
                    pipeline_id: uploaded.pipeline_id,
                    version_id: uploaded.version_id,
                })
            }
        }
    }
}
