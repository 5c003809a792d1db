//! Shared domain types for Canopy
//!
//! Structure shared between the engine (drives the pipeline) and the CLI
//! (selects commands and reporting channels). State that must survive
//! between commands is carried by hidden-state markers, not by these types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A pipeline command, as typed on a terminal or in a pull-request comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Build,
    Run,
    BuildRun,
    Deploy,
    StagingDeploy,
}

impl Command {
    /// All commands, longest comment spelling first so `/build_run` is not
    /// matched as `/build`.
    pub const ALL: [Command; 5] = [
        Command::BuildRun,
        Command::StagingDeploy,
        Command::Build,
        Command::Run,
        Command::Deploy,
    ];

    /// The comment spelling of the command, without the leading slash.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Build => "build",
            Command::Run => "run",
            Command::BuildRun => "build_run",
            Command::Deploy => "deploy",
            Command::StagingDeploy => "staging_deploy",
        }
    }

    /// Target environment implied by a deploy variant, `None` otherwise.
    pub fn environment(&self) -> Option<Environment> {
        match self {
            Command::Deploy => Some(Environment::Production),
            Command::StagingDeploy => Some(Environment::Staging),
            _ => None,
        }
    }
}

/// Deployment target environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
        }
    }
}

/// Result of compiling and uploading a pipeline.
///
/// `version_id` is the unit of identity threaded through runs and
/// hidden-state persistence. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildDescriptor {
    pub pipeline_id: String,
    pub version_id: String,
    /// Details page on the execution service UI.
    pub url: String,
}

/// One configured container image; N image specs map to N concurrent
/// build jobs per batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSpec {
    pub name: String,
    /// Directory holding the Dockerfile and build context.
    pub build_context_ref: String,
    /// Full push destination, `{registry}/{name}:{tag}`.
    pub registry_destination: String,
}

/// Phase reported by the build substrate for one build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildJobPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl BuildJobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildJobPhase::Succeeded | BuildJobPhase::Failed)
    }
}

/// Status of a submitted pipeline run. Terminal once observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Succeeded,
    /// Any terminal status other than `Succeeded`; carries the raw status
    /// string reported by the execution service.
    Failed(String),
}

/// A submitted pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDescriptor {
    pub run_id: String,
    /// Details page on the execution service UI.
    pub url: String,
    /// Parameters the run was submitted with, in stable order.
    pub run_params: BTreeMap<String, serde_json::Value>,
    pub status: RunStatus,
}

/// A deployed (or deploying) serving endpoint.
///
/// `traffic_percent` is only ever 0 or 100; no intermediate canary
/// weights are modeled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutDescriptor {
    pub service_name: String,
    pub namespace: String,
    pub run_id: String,
    pub traffic_percent: u8,
    pub ready: bool,
}
