//! Engine configuration
//!
//! Loaded from `canopy.toml` and validated before any component runs.
//! There is no process-wide default: every component receives its
//! configuration explicitly, and overrides (`--config-override`, `--set`)
//! are applied by the loader at the composition boundary.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};
use canopy_core::params;

/// Namespace build pods run in when none is supplied.
pub const DEFAULT_WORKFLOW_NAMESPACE: &str = "canopy";

/// Pipeline execution mode of the execution service.
///
/// An unrecognized value is a configuration error raised at parse time,
/// before compilation is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum ExecutionMode {
    #[serde(rename = "V1_LEGACY")]
    V1Legacy,
    #[default]
    #[serde(rename = "V2_COMPATIBLE")]
    V2Compatible,
    #[serde(rename = "V2_ENGINE")]
    V2Engine,
}

impl ExecutionMode {
    /// Flag value passed to the pipeline compiler.
    pub fn as_flag(&self) -> &'static str {
        match self {
            ExecutionMode::V1Legacy => "V1_LEGACY",
            ExecutionMode::V2Compatible => "V2_COMPATIBLE",
            ExecutionMode::V2Engine => "V2_ENGINE",
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Execution-service namespace experiments and runs live in.
    pub namespace: String,
    pub experiment_name: String,
    /// Pipeline definition file handed to the compiler.
    pub definition_path: PathBuf,
    /// Pipeline function inside the definition file, if not the default.
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Default run parameters merged into every submitted run.
    #[serde(default)]
    pub run_params: BTreeMap<String, Value>,
}

/// One entry of `[[image_builder.images]]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    pub name: String,
    /// Directory holding the Dockerfile and its build context.
    pub context_path: PathBuf,
    /// Extra side folders archived next to the context.
    #[serde(default)]
    pub extra_paths: Vec<PathBuf>,
}

/// `[image_builder]` section; absent means the build command uploads the
/// pipeline without building any images.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageBuilderConfig {
    pub container_registry_uri: String,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub images: Vec<ImageConfig>,
}

/// Per-environment deployment target.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentTarget {
    pub namespace: String,
}

/// `[deployment]` section; absent means deploy commands are rejected.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    pub inference_service_name: String,
    /// Serving-spec template rendered for create/replace calls.
    pub spec_template_path: PathBuf,
    /// Sample input POSTed to the canary before promoting it. Absent means
    /// no smoke test: traffic shifts to 100% immediately.
    #[serde(default)]
    pub smoke_sample_path: Option<PathBuf>,
    #[serde(default)]
    pub production: Option<EnvironmentTarget>,
    #[serde(default)]
    pub staging: Option<EnvironmentTarget>,
}

impl DeploymentConfig {
    pub fn namespace_for(&self, environment: canopy_core::types::Environment) -> Option<&str> {
        use canopy_core::types::Environment;
        let target = match environment {
            Environment::Production => self.production.as_ref(),
            Environment::Staging => self.staging.as_ref(),
        };
        target.map(|t| t.namespace.as_str())
    }
}

/// `[repository]` section: the collaboration-platform repository commands
/// arrive from and hidden state persists into.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub owner: String,
    pub name: String,
}

/// Full engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub image_builder: Option<ImageBuilderConfig>,
    #[serde(default)]
    pub deployment: Option<DeploymentConfig>,
    #[serde(default)]
    pub repository: Option<RepositoryConfig>,
    #[serde(default = "default_workflow_namespace")]
    pub workflow_namespace: String,
}

fn default_workflow_namespace() -> String {
    DEFAULT_WORKFLOW_NAMESPACE.to_string()
}

impl Config {
    /// Parse configuration from a TOML string with no overrides.
    pub fn from_toml(text: &str) -> Result<Self> {
        ConfigLoader::default().parse(text)
    }

    /// Consistency checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.name.is_empty() {
            return Err(EngineError::Config("pipeline.name cannot be empty".to_string()));
        }
        if self.pipeline.experiment_name.is_empty() {
            return Err(EngineError::Config(
                "pipeline.experiment_name cannot be empty".to_string(),
            ));
        }
        if let Some(builder) = &self.image_builder {
            if builder.container_registry_uri.is_empty() {
                return Err(EngineError::Config(
                    "image_builder.container_registry_uri cannot be empty".to_string(),
                ));
            }
            for image in &builder.images {
                if image.name.is_empty() {
                    return Err(EngineError::Config(
                        "image_builder.images entries need a name".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Builds a [`Config`] from the main file plus optional overrides.
///
/// Override precedence, lowest to highest: `canopy.toml`, the
/// `--config-override` file's `[pipeline]` section, `--set key.sub=value`
/// arguments (which target the `[pipeline]` section), and finally an
/// explicit workflow namespace.
#[derive(Debug, Default, Clone)]
pub struct ConfigLoader {
    override_path: Option<PathBuf>,
    set_overrides: Vec<String>,
    workflow_namespace: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }

    pub fn with_set_overrides(mut self, overrides: Vec<String>) -> Self {
        self.set_overrides = overrides;
        self
    }

    pub fn with_workflow_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.workflow_namespace = Some(namespace.into());
        self
    }

    /// Load, merge and validate configuration from `path`.
    pub fn load(&self, path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        self.parse(&text)
    }

    fn parse(&self, text: &str) -> Result<Config> {
        let mut tree = toml_to_json(text)?;

        if let Some(override_path) = &self.override_path {
            let override_text = std::fs::read_to_string(override_path).map_err(|e| {
                EngineError::Config(format!(
                    "cannot read override file {}: {e}",
                    override_path.display()
                ))
            })?;
            let override_tree = toml_to_json(&override_text)?;
            if let Some(pipeline) = override_tree.get("pipeline") {
                merge_into_pipeline(&mut tree, pipeline);
            }
        }

        if !self.set_overrides.is_empty() {
            let overrides = params::overrides_to_object(&self.set_overrides)
                .map_err(|e| EngineError::Config(e.to_string()))?;
            merge_into_pipeline(&mut tree, &overrides);
        }

        if let Some(namespace) = &self.workflow_namespace {
            params::merge_values(
                &mut tree,
                &serde_json::json!({ "workflow_namespace": namespace }),
            );
        }

        let config: Config = serde_json::from_value(tree)
            .map_err(|e| EngineError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

fn toml_to_json(text: &str) -> Result<Value> {
    let parsed: toml::Value = toml::from_str(text)
        .map_err(|e| EngineError::Config(format!("invalid TOML: {e}")))?;
    serde_json::to_value(parsed)
        .map_err(|e| EngineError::Config(format!("invalid configuration: {e}")))
}

fn merge_into_pipeline(tree: &mut Value, overlay: &Value) {
    if let Some(pipeline) = tree.get_mut("pipeline") {
        params::merge_values(pipeline, overlay);
    }
}
