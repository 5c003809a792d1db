//! Shared in-memory fakes for unit tests.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::ExecutionMode;
use crate::pipeline::{CompileError, PipelineCompiler};
use canopy_client::{
    ClientError, ExecutionService, ExperimentSummary, RunCompletion, UploadedPipeline,
};

/// One run handed to [`FakeExecutionService::submit_run`].
#[derive(Debug, Clone)]
pub struct SubmittedRun {
    pub experiment_id: String,
    pub job_name: String,
    pub version_id: String,
    pub params: BTreeMap<String, Value>,
}

#[derive(Default)]
struct ExecutionState {
    pipelines: HashMap<String, String>,
    experiments: Vec<ExperimentSummary>,
    uploaded_pipelines: usize,
    uploaded_versions: usize,
    create_experiment_calls: usize,
    submitted: Vec<SubmittedRun>,
    completion_status: String,
    run_seconds: i64,
}

/// Execution service fake backed by in-memory state.
pub struct FakeExecutionService {
    state: Mutex<ExecutionState>,
}

impl FakeExecutionService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ExecutionState {
                completion_status: "Succeeded".to_string(),
                run_seconds: 45,
                ..ExecutionState::default()
            }),
        }
    }

    pub fn register_pipeline(&self, name: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .pipelines
            .insert(name.to_string(), id.to_string());
    }

    pub fn add_experiment(&self, name: &str, id: &str) {
        self.state.lock().unwrap().experiments.push(ExperimentSummary {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    pub fn set_completion(&self, status: &str, run_seconds: i64) {
        let mut state = self.state.lock().unwrap();
        state.completion_status = status.to_string();
        state.run_seconds = run_seconds;
    }

    pub fn uploaded_pipelines(&self) -> usize {
        self.state.lock().unwrap().uploaded_pipelines
    }

    pub fn uploaded_versions(&self) -> usize {
        self.state.lock().unwrap().uploaded_versions
    }

    pub fn create_experiment_calls(&self) -> usize {
        self.state.lock().unwrap().create_experiment_calls
    }

    pub fn submitted_runs(&self) -> Vec<SubmittedRun> {
        self.state.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl ExecutionService for FakeExecutionService {
    async fn list_experiments(
        &self,
        _namespace: &str,
    ) -> canopy_client::Result<Vec<ExperimentSummary>> {
        Ok(self.state.lock().unwrap().experiments.clone())
    }

    async fn create_experiment(
        &self,
        name: &str,
        _description: &str,
        _namespace: &str,
    ) -> canopy_client::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.create_experiment_calls += 1;
        let id = format!("exp-{}", state.experiments.len() + 1);
        state.experiments.push(ExperimentSummary {
            id,
            name: name.to_string(),
        });
        Ok(())
    }

    async fn get_experiment(
        &self,
        name: &str,
        _namespace: &str,
    ) -> canopy_client::Result<ExperimentSummary> {
        self.state
            .lock()
            .unwrap()
            .experiments
            .iter()
            .find(|e| e.name == name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("experiment '{name}'")))
    }

    async fn submit_run(
        &self,
        experiment_id: &str,
        job_name: &str,
        version_id: &str,
        params: &BTreeMap<String, Value>,
    ) -> canopy_client::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.submitted.push(SubmittedRun {
            experiment_id: experiment_id.to_string(),
            job_name: job_name.to_string(),
            version_id: version_id.to_string(),
            params: params.clone(),
        });
        Ok(format!("run-{}", state.submitted.len()))
    }

    async fn wait_completion(
        &self,
        _run_id: &str,
        _timeout: Duration,
    ) -> canopy_client::Result<RunCompletion> {
        let state = self.state.lock().unwrap();
        let started_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Ok(RunCompletion {
            status: state.completion_status.clone(),
            started_at,
            finished_at: started_at + ChronoDuration::seconds(state.run_seconds),
        })
    }

    async fn upload_pipeline(
        &self,
        _artifact: &Path,
        name: &str,
        _description: &str,
    ) -> canopy_client::Result<UploadedPipeline> {
        let mut state = self.state.lock().unwrap();
        state.uploaded_pipelines += 1;
        let pipeline_id = format!("pipeline-{}", state.pipelines.len() + 1);
        state.pipelines.insert(name.to_string(), pipeline_id.clone());
        Ok(UploadedPipeline {
            pipeline_id,
            version_id: "version-1".to_string(),
        })
    }

    async fn upload_pipeline_version(
        &self,
        _artifact: &Path,
        _pipeline_id: &str,
        _version_name: &str,
    ) -> canopy_client::Result<String> {
        let mut state = self.state.lock().unwrap();
        state.uploaded_versions += 1;
        Ok(format!("version-{}", state.uploaded_versions + 1))
    }

    async fn get_pipeline_id(&self, name: &str) -> canopy_client::Result<Option<String>> {
        Ok(self.state.lock().unwrap().pipelines.get(name).cloned())
    }

    fn ui_url(&self) -> String {
        "https://kubeflow.test/pipeline".to_string()
    }
}

/// Compiler that writes nothing and always succeeds.
pub struct NoopCompiler;

#[async_trait]
impl PipelineCompiler for NoopCompiler {
    async fn compile(
        &self,
        _definition: &Path,
        _function_name: Option<&str>,
        _mode: ExecutionMode,
        _output: &Path,
    ) -> std::result::Result<(), CompileError> {
        Ok(())
    }
}
