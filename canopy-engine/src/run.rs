//! Run controller
//!
//! Submits a run of an uploaded pipeline version into its experiment and,
//! when asked, blocks until the run reaches a terminal status. Experiment
//! creation is idempotent: an existing experiment with the configured name
//! is reused as-is.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::Result;
use canopy_client::{ExecutionService, ExperimentSummary};
use canopy_core::params::format_run_duration;
use canopy_core::types::{RunDescriptor, RunStatus};

/// Upper bound on how long a single run is waited for.
const RUN_COMPLETION_CEILING: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Terminal outcome of a waited-for run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Human-readable duration, e.g. `45 seconds` or `3 min(s)`.
    pub run_time: String,
}

/// Submits runs against the execution service and tracks them to completion.
pub struct RunController {
    execution: Arc<dyn ExecutionService>,
    config: PipelineConfig,
}

impl RunController {
    pub fn new(execution: Arc<dyn ExecutionService>, config: PipelineConfig) -> Self {
        Self { execution, config }
    }

    /// Submit a run of `version_id` with the configured default parameters.
    ///
    /// `version_id` is always injected into the run parameters under the
    /// `version_id` key unless the configuration already sets one; every
    /// other configured parameter is passed through untouched.
    pub async fn submit(&self, version_id: &str) -> Result<RunDescriptor> {
        let experiment = self.ensure_experiment().await?;

        let mut run_params = self.config.run_params.clone();
        run_params
            .entry("version_id".to_string())
            .or_insert_with(|| serde_json::Value::String(version_id.to_string()));

        let job_name = format!(
            "{} ({})",
            self.config.name, self.config.experiment_name
        );
        let run_id = self
            .execution
            .submit_run(&experiment.id, &job_name, version_id, &run_params)
            .await?;
        info!(run_id, version_id, "run submitted");

        Ok(RunDescriptor {
            url: format!("{}/#/runs/details/{run_id}", self.execution.ui_url()),
            run_id,
            run_params,
            status: RunStatus::Running,
        })
    }

    /// Block until `run_id` finishes and classify its terminal status.
    pub async fn wait(&self, run_id: &str) -> Result<RunOutcome> {
        let completion = self
            .execution
            .wait_completion(run_id, RUN_COMPLETION_CEILING)
            .await?;

        let status = if completion.status == "Succeeded" {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed(completion.status)
        };
        let seconds = (completion.finished_at - completion.started_at).num_seconds();

        Ok(RunOutcome {
            status,
            run_time: format_run_duration(seconds),
        })
    }

    async fn ensure_experiment(&self) -> Result<ExperimentSummary> {
        let name = &self.config.experiment_name;
        let namespace = &self.config.namespace;

        match self.execution.get_experiment(name, namespace).await {
            Ok(experiment) => Ok(experiment),
            Err(e) if e.is_not_found() => {
                info!(experiment = %name, "experiment not found, creating it");
                self.execution
                    .create_experiment(name, &self.config.description, namespace)
                    .await?;
                Ok(self.execution.get_experiment(name, namespace).await?)
            }
            Err(e) => Err(e.into()),
        }
    }
}
