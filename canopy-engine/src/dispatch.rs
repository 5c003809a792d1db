//! Command dispatcher
//!
//! Single entry point for every command, whether typed on a terminal or in
//! a pull-request comment. The dispatcher wires the configured platforms
//! into the build, run and rollout controllers, resolves missing ids from
//! hidden state, and turns every failure into exactly one operator-facing
//! message through the messenger.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::build::BuildCoordinator;
use crate::command::CommandParams;
use crate::config::Config;
use crate::error::Result;
use crate::messenger::{HIDDEN_STATE_PREFIX, Messenger, RUN_ID_KEY, VERSION_ID_KEY};
use crate::pipeline::{PipelineBuilder, PipelineCompiler};
use crate::rollout::RolloutController;
use crate::run::RunController;
use crate::template::ServingSpecFactory;
use canopy_client::{
    ArtifactStore, BuildSubstrate, CollabPlatform, EndpointProber, ExecutionService,
    ServingControlPlane,
};
use canopy_core::markers;
use canopy_core::types::{BuildDescriptor, Command, Environment, RunStatus};

/// Every external system the dispatcher can touch. All injected, so tests
/// run against in-memory fakes and a development setup can drop the
/// collaboration platform entirely.
pub struct Platforms {
    pub execution: Arc<dyn ExecutionService>,
    pub substrate: Arc<dyn BuildSubstrate>,
    pub store: Arc<dyn ArtifactStore>,
    pub serving: Arc<dyn ServingControlPlane>,
    pub prober: Arc<dyn EndpointProber>,
    pub compiler: Arc<dyn PipelineCompiler>,
    /// Absent in development mode; hidden state then never resolves and
    /// runs are only waited for when asked.
    pub collab: Option<Arc<dyn CollabPlatform>>,
}

/// Executes commands against the configured platforms.
pub struct Dispatcher {
    config: Config,
    platforms: Platforms,
    messenger: Arc<dyn Messenger>,
    rollout_timing: Option<(Duration, Duration)>,
}

impl Dispatcher {
    pub fn new(config: Config, platforms: Platforms, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            config,
            platforms,
            messenger,
            rollout_timing: None,
        }
    }

    /// Override rollout readiness timing (grace period, ready timeout).
    pub fn with_rollout_timing(mut self, grace: Duration, timeout: Duration) -> Self {
        self.rollout_timing = Some((grace, timeout));
        self
    }

    pub async fn execute(&self, command: Command, params: &CommandParams) -> Result<()> {
        match command {
            Command::Build => self.build(true).await.map(|_| ()),
            Command::Run => self.run(params).await,
            Command::BuildRun => {
                let descriptor = self.build(false).await?;
                self.run_version(&descriptor.version_id, params).await
            }
            Command::Deploy => self.deploy(Environment::Production, params).await,
            Command::StagingDeploy => self.deploy(Environment::Staging, params).await,
        }
    }

    async fn build(&self, build_only: bool) -> Result<BuildDescriptor> {
        let coordinator = self.config.image_builder.as_ref().map(|builder_config| {
            BuildCoordinator::new(
                builder_config,
                self.config.workflow_namespace.clone(),
                Arc::clone(&self.platforms.substrate),
                Arc::clone(&self.platforms.store),
            )
        });
        let builder = PipelineBuilder::new(
            Arc::clone(&self.platforms.execution),
            Arc::clone(&self.platforms.compiler),
            coordinator,
            self.config.pipeline.clone(),
        );

        match builder.build().await {
            Ok(descriptor) => {
                self.messenger
                    .component_built(&descriptor, build_only)
                    .await?;
                Ok(descriptor)
            }
            Err(e) => Err(self
                .messenger
                .fail(&format!("Failed while building the pipeline: {e}"))
                .await),
        }
    }

    async fn run(&self, params: &CommandParams) -> Result<()> {
        let version_id = match &params.version_id {
            Some(version_id) => version_id.clone(),
            None => match self.hidden_state(VERSION_ID_KEY).await? {
                Some(version_id) => version_id,
                None => {
                    return Err(self
                        .messenger
                        .fail("Could not find pipeline to run. Did you run /build?")
                        .await);
                }
            },
        };
        self.run_version(&version_id, params).await
    }

    async fn run_version(&self, version_id: &str, params: &CommandParams) -> Result<()> {
        let controller = RunController::new(
            Arc::clone(&self.platforms.execution),
            self.config.pipeline.clone(),
        );
        let run = controller.submit(version_id).await?;
        self.messenger.run_started(&run).await;

        // Comment-driven invocations always wait: the completion comment is
        // what persists the run id for a later deploy.
        if self.platforms.collab.is_some() || params.wait {
            let outcome = controller.wait(&run.run_id).await?;
            match outcome.status {
                RunStatus::Succeeded => {
                    self.messenger
                        .run_completed(&run.run_id, &outcome.run_time)
                        .await?;
                }
                RunStatus::Failed(status) => {
                    return Err(self
                        .messenger
                        .fail(&format!(
                            "Pipeline run finished with status: {status} after {}",
                            outcome.run_time
                        ))
                        .await);
                }
                RunStatus::Running => {}
            }
        }
        Ok(())
    }

    async fn deploy(&self, environment: Environment, params: &CommandParams) -> Result<()> {
        let Some(deployment) = self.config.deployment.clone() else {
            return Err(self
                .messenger
                .fail("Cannot deploy: deployment configuration is missing.")
                .await);
        };
        let Some(namespace) = deployment.namespace_for(environment).map(str::to_string) else {
            return Err(self
                .messenger
                .fail(&format!(
                    "Cannot deploy: no namespace configured for {}.",
                    environment.as_str()
                ))
                .await);
        };

        let run_id = match &params.run_id {
            Some(run_id) => run_id.clone(),
            None => match self.hidden_state(RUN_ID_KEY).await? {
                Some(run_id) => run_id,
                None => {
                    return Err(self
                        .messenger
                        .fail("Could not find a run to deploy. Did you run /run?")
                        .await);
                }
            },
        };

        // Production deploys from a stale branch are refused; --force is
        // the explicit operator override.
        if environment == Environment::Production && !params.force {
            if let Some(collab) = &self.platforms.collab {
                match collab.is_diverged().await {
                    Ok(false) => {}
                    Ok(true) => {
                        return Err(self
                            .messenger
                            .fail(
                                "Pull request branch has diverged from the base branch. \
                                 Update the branch, or deploy anyway with /deploy --force.",
                            )
                            .await);
                    }
                    Err(e) => {
                        return Err(self
                            .messenger
                            .fail(&format!("Failed while checking branch divergence: {e}"))
                            .await);
                    }
                }
            }
        }

        let factory = match ServingSpecFactory::load(&deployment.spec_template_path) {
            Ok(factory) => factory,
            Err(e) => return Err(self.messenger.fail(&e.to_string()).await),
        };
        let smoke_sample = match &deployment.smoke_sample_path {
            Some(path) => match std::fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
            {
                Ok(sample) => Some(sample),
                Err(e) => {
                    return Err(self
                        .messenger
                        .fail(&format!(
                            "Cannot read test sample {}: {e}",
                            path.display()
                        ))
                        .await);
                }
            },
            None => None,
        };

        let mut rollout = RolloutController::new(
            Arc::clone(&self.platforms.serving),
            Arc::clone(&self.platforms.prober),
            factory,
            deployment.inference_service_name.clone(),
            namespace.clone(),
            smoke_sample,
        );
        if let Some((grace, timeout)) = self.rollout_timing {
            rollout = rollout.with_timing(grace, timeout);
        }

        rollout.deploy(&run_id).await;
        if let Some(error) = rollout.error() {
            return Err(self.messenger.fail(error).await);
        }

        self.messenger
            .info(&format!(
                "Model from RUN_ID: {run_id} has been successfully deployed to namespace: {namespace}"
            ))
            .await;

        if let Some(collab) = &self.platforms.collab {
            // The label says where the repository is deployed right now;
            // losing it is not worth failing a finished rollout.
            if let Err(e) = collab.add_label(&format!("Deployed-to-{namespace}")).await {
                warn!("could not move deployment label: {e}");
            }

            if environment == Environment::Production {
                match collab.is_mergeable().await {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(self
                            .messenger
                            .fail("PR is not mergeable. Merge and close it manually.")
                            .await);
                    }
                    Err(e) => {
                        return Err(self
                            .messenger
                            .fail(&format!("Failed while checking if PR is mergeable: {e}"))
                            .await);
                    }
                }
                if let Err(e) = collab.merge().await {
                    return Err(self
                        .messenger
                        .fail(&format!("Failed while trying to merge PR: {e}"))
                        .await);
                }
                if let Err(e) = collab.close().await {
                    return Err(self
                        .messenger
                        .fail(&format!("Failed while trying to close PR: {e}"))
                        .await);
                }
            }
        }

        Ok(())
    }

    /// Most recent hidden-state value for `key` across the comment history,
    /// or `None` without a collaboration platform.
    async fn hidden_state(&self, key: &str) -> Result<Option<String>> {
        let Some(collab) = &self.platforms.collab else {
            return Ok(None);
        };
        let bodies = collab.list_comments().await?;
        Ok(markers::decode(&bodies, &[key], HIDDEN_STATE_PREFIX).remove(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Config, DeploymentConfig, EnvironmentTarget, ExecutionMode, PipelineConfig,
    };
    use crate::error::EngineError;
    use crate::testing::{FakeExecutionService, NoopCompiler};
    use async_trait::async_trait;
    use canopy_client::{BuildJobSpec, ClientError, ProbeResponse};
    use canopy_core::types::BuildJobPhase;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    const TEMPLATE: &str = r#"{
        "metadata": { "name": "{{name}}", "namespace": "{{namespace}}" },
        "spec": {
            "predictor": {
                "canaryTrafficPercent": {{canary_traffic_percent}},
                "model": { "storageUri": "{{storage_uri}}" }
            }
        }
    }"#;

    #[derive(Default)]
    struct CollabState {
        comments: Vec<String>,
        diverged: bool,
        mergeable: bool,
        is_diverged_calls: usize,
        labels: Vec<String>,
        merged: bool,
        closed: bool,
    }

    #[derive(Default)]
    struct FakeCollab {
        state: Mutex<CollabState>,
    }

    impl FakeCollab {
        fn with_comment(self, body: &str) -> Self {
            self.state.lock().unwrap().comments.push(body.to_string());
            self
        }

        fn diverged(self, diverged: bool) -> Self {
            self.state.lock().unwrap().diverged = diverged;
            self
        }

        fn mergeable(self, mergeable: bool) -> Self {
            self.state.lock().unwrap().mergeable = mergeable;
            self
        }
    }

    #[async_trait]
    impl CollabPlatform for FakeCollab {
        async fn list_comments(&self) -> canopy_client::Result<Vec<String>> {
            Ok(self.state.lock().unwrap().comments.clone())
        }

        async fn create_comment(&self, body: &str) -> canopy_client::Result<()> {
            self.state.lock().unwrap().comments.push(body.to_string());
            Ok(())
        }

        async fn add_label(&self, label: &str) -> canopy_client::Result<()> {
            self.state.lock().unwrap().labels.push(label.to_string());
            Ok(())
        }

        async fn is_diverged(&self) -> canopy_client::Result<bool> {
            let mut state = self.state.lock().unwrap();
            state.is_diverged_calls += 1;
            Ok(state.diverged)
        }

        async fn is_mergeable(&self) -> canopy_client::Result<bool> {
            Ok(self.state.lock().unwrap().mergeable)
        }

        async fn merge(&self) -> canopy_client::Result<()> {
            self.state.lock().unwrap().merged = true;
            Ok(())
        }

        async fn close(&self) -> canopy_client::Result<()> {
            self.state.lock().unwrap().closed = true;
            Ok(())
        }
    }

    struct NullSubstrate;

    #[async_trait]
    impl BuildSubstrate for NullSubstrate {
        async fn submit(
            &self,
            _spec: &BuildJobSpec,
            _namespace: &str,
        ) -> canopy_client::Result<String> {
            Err(ClientError::NotFound("no substrate in tests".to_string()))
        }

        async fn get_status(
            &self,
            _job_id: &str,
            _namespace: &str,
        ) -> canopy_client::Result<BuildJobPhase> {
            Err(ClientError::NotFound("no substrate in tests".to_string()))
        }

        async fn get_logs(
            &self,
            _job_id: &str,
            _namespace: &str,
        ) -> canopy_client::Result<String> {
            Err(ClientError::NotFound("no substrate in tests".to_string()))
        }
    }

    struct NullStore;

    #[async_trait]
    impl ArtifactStore for NullStore {
        async fn put(&self, object_name: &str, _local_path: &Path) -> canopy_client::Result<String> {
            Ok(object_name.to_string())
        }

        fn public_url(&self) -> String {
            "http://store.test/contexts".to_string()
        }
    }

    #[derive(Default)]
    struct FakeServing {
        existing: Vec<String>,
        replaces: Mutex<usize>,
        creates: Mutex<usize>,
    }

    #[async_trait]
    impl ServingControlPlane for FakeServing {
        async fn list(&self, _namespace: &str) -> canopy_client::Result<Vec<String>> {
            Ok(self.existing.clone())
        }

        async fn create(&self, _spec: &Value, _namespace: &str) -> canopy_client::Result<()> {
            *self.creates.lock().unwrap() += 1;
            Ok(())
        }

        async fn replace(
            &self,
            _name: &str,
            _spec: &Value,
            _namespace: &str,
        ) -> canopy_client::Result<()> {
            *self.replaces.lock().unwrap() += 1;
            Ok(())
        }

        async fn get_status(&self, _name: &str, _namespace: &str) -> canopy_client::Result<Value> {
            Ok(Value::Null)
        }

        async fn latest_revision(
            &self,
            _name: &str,
            _namespace: &str,
        ) -> canopy_client::Result<Option<String>> {
            Ok(Some("churn-predictor-00002".to_string()))
        }

        async fn wait_ready(
            &self,
            _name: &str,
            _namespace: &str,
            _timeout: Duration,
        ) -> canopy_client::Result<()> {
            Ok(())
        }
    }

    struct OkProber;

    #[async_trait]
    impl EndpointProber for OkProber {
        async fn post_json(
            &self,
            _url: &str,
            _input: &Value,
        ) -> canopy_client::Result<ProbeResponse> {
            Ok(ProbeResponse {
                status: 200,
                body: "{}".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingMessenger {
        infos: Mutex<Vec<String>>,
        failures: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn info(&self, message: &str) {
            self.infos.lock().unwrap().push(message.to_string());
        }

        async fn fail(&self, message: &str) -> EngineError {
            self.failures.lock().unwrap().push(message.to_string());
            EngineError::Aborted(message.to_string())
        }

        async fn component_built(
            &self,
            descriptor: &BuildDescriptor,
            _build_only: bool,
        ) -> crate::error::Result<()> {
            self.infos
                .lock()
                .unwrap()
                .push(format!("built {}", descriptor.version_id));
            Ok(())
        }

        async fn run_started(&self, run: &canopy_core::types::RunDescriptor) {
            self.infos
                .lock()
                .unwrap()
                .push(format!("started {}", run.run_id));
        }

        async fn run_completed(&self, run_id: &str, run_time: &str) -> crate::error::Result<()> {
            self.infos
                .lock()
                .unwrap()
                .push(format!("completed {run_id} in {run_time}"));
            Ok(())
        }
    }

    struct Fixture {
        template: tempfile::NamedTempFile,
    }

    impl Fixture {
        fn new() -> Self {
            let mut template = tempfile::NamedTempFile::new().unwrap();
            template.write_all(TEMPLATE.as_bytes()).unwrap();
            Self { template }
        }

        fn config(&self) -> Config {
            Config {
                pipeline: PipelineConfig {
                    name: "churn-model".to_string(),
                    description: "churn scoring".to_string(),
                    namespace: "team-ml".to_string(),
                    experiment_name: "churn".to_string(),
                    definition_path: PathBuf::from("pipeline.py"),
                    function_name: None,
                    execution_mode: ExecutionMode::V2Compatible,
                    run_params: BTreeMap::new(),
                },
                image_builder: None,
                deployment: Some(DeploymentConfig {
                    inference_service_name: "churn".to_string(),
                    spec_template_path: self.template.path().to_path_buf(),
                    smoke_sample_path: None,
                    production: Some(EnvironmentTarget {
                        namespace: "models-prod".to_string(),
                    }),
                    staging: Some(EnvironmentTarget {
                        namespace: "models-staging".to_string(),
                    }),
                }),
                repository: None,
                workflow_namespace: "canopy".to_string(),
            }
        }
    }

    fn dispatcher(
        config: Config,
        execution: Arc<FakeExecutionService>,
        serving: Arc<FakeServing>,
        collab: Option<Arc<FakeCollab>>,
        messenger: Arc<RecordingMessenger>,
    ) -> Dispatcher {
        let platforms = Platforms {
            execution,
            substrate: Arc::new(NullSubstrate),
            store: Arc::new(NullStore),
            serving,
            prober: Arc::new(OkProber),
            compiler: Arc::new(NoopCompiler),
            collab: collab.map(|c| c as Arc<dyn CollabPlatform>),
        };
        Dispatcher::new(config, platforms, messenger)
            .with_rollout_timing(Duration::ZERO, Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn run_without_any_version_fails_with_hint() {
        let fixture = Fixture::new();
        let messenger = Arc::new(RecordingMessenger::default());
        let d = dispatcher(
            fixture.config(),
            Arc::new(FakeExecutionService::new()),
            Arc::new(FakeServing::default()),
            Some(Arc::new(FakeCollab::default())),
            messenger.clone(),
        );

        let err = d
            .execute(Command::Run, &CommandParams::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Aborted(_)));
        let failures = messenger.failures.lock().unwrap();
        assert_eq!(
            failures.as_slice(),
            ["Could not find pipeline to run. Did you run /build?"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_resolves_version_from_hidden_state() {
        let fixture = Fixture::new();
        let execution = Arc::new(FakeExecutionService::new());
        let collab = Arc::new(
            FakeCollab::default()
                .with_comment("built <!-- CANOPY_VERSION_ID=v-old -->")
                .with_comment("rebuilt <!-- CANOPY_VERSION_ID=v-new -->"),
        );
        let messenger = Arc::new(RecordingMessenger::default());
        let d = dispatcher(
            fixture.config(),
            execution.clone(),
            Arc::new(FakeServing::default()),
            Some(collab),
            messenger,
        );

        d.execute(Command::Run, &CommandParams::default())
            .await
            .unwrap();

        assert_eq!(execution.submitted_runs()[0].version_id, "v-new");
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_version_beats_hidden_state() {
        let fixture = Fixture::new();
        let execution = Arc::new(FakeExecutionService::new());
        let collab =
            Arc::new(FakeCollab::default().with_comment("<!-- CANOPY_VERSION_ID=v-old -->"));
        let messenger = Arc::new(RecordingMessenger::default());
        let d = dispatcher(
            fixture.config(),
            execution.clone(),
            Arc::new(FakeServing::default()),
            Some(collab),
            messenger,
        );

        let params = CommandParams {
            version_id: Some("v-explicit".to_string()),
            ..CommandParams::default()
        };
        d.execute(Command::Run, &params).await.unwrap();

        assert_eq!(execution.submitted_runs()[0].version_id, "v-explicit");
    }

    #[tokio::test(start_paused = true)]
    async fn comment_driven_run_always_waits() {
        let fixture = Fixture::new();
        let execution = Arc::new(FakeExecutionService::new());
        execution.set_completion("Succeeded", 45);
        let collab = Arc::new(FakeCollab::default());
        let messenger = Arc::new(RecordingMessenger::default());
        let d = dispatcher(
            fixture.config(),
            execution,
            Arc::new(FakeServing::default()),
            Some(collab),
            messenger.clone(),
        );

        let params = CommandParams {
            version_id: Some("v-1".to_string()),
            ..CommandParams::default()
        };
        d.execute(Command::Run, &params).await.unwrap();

        let infos = messenger.infos.lock().unwrap();
        assert!(infos.iter().any(|m| m.starts_with("completed run-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn local_run_without_wait_returns_after_submit() {
        let fixture = Fixture::new();
        let execution = Arc::new(FakeExecutionService::new());
        let messenger = Arc::new(RecordingMessenger::default());
        let d = dispatcher(
            fixture.config(),
            execution,
            Arc::new(FakeServing::default()),
            None,
            messenger.clone(),
        );

        let params = CommandParams {
            version_id: Some("v-1".to_string()),
            ..CommandParams::default()
        };
        d.execute(Command::Run, &params).await.unwrap();

        let infos = messenger.infos.lock().unwrap();
        assert!(infos.iter().any(|m| m.starts_with("started ")));
        assert!(!infos.iter().any(|m| m.starts_with("completed ")));
    }

    #[tokio::test(start_paused = true)]
    async fn diverged_production_deploy_refused() {
        let fixture = Fixture::new();
        let collab = Arc::new(FakeCollab::default().diverged(true).mergeable(true));
        let messenger = Arc::new(RecordingMessenger::default());
        let serving = Arc::new(FakeServing::default());
        let d = dispatcher(
            fixture.config(),
            Arc::new(FakeExecutionService::new()),
            serving.clone(),
            Some(collab.clone()),
            messenger,
        );

        let params = CommandParams {
            run_id: Some("run-7".to_string()),
            ..CommandParams::default()
        };
        let err = d.execute(Command::Deploy, &params).await.unwrap_err();

        assert!(err.to_string().contains("--force"));
        assert_eq!(*serving.creates.lock().unwrap(), 0);
        assert_eq!(*serving.replaces.lock().unwrap(), 0);
        assert_eq!(collab.state.lock().unwrap().is_diverged_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_deploy_never_checks_divergence() {
        let fixture = Fixture::new();
        let collab = Arc::new(FakeCollab::default().diverged(true).mergeable(true));
        let messenger = Arc::new(RecordingMessenger::default());
        let serving = Arc::new(FakeServing::default());
        let d = dispatcher(
            fixture.config(),
            Arc::new(FakeExecutionService::new()),
            serving.clone(),
            Some(collab.clone()),
            messenger,
        );

        let params = CommandParams {
            run_id: Some("run-7".to_string()),
            force: true,
            ..CommandParams::default()
        };
        d.execute(Command::Deploy, &params).await.unwrap();

        let state = collab.state.lock().unwrap();
        assert_eq!(state.is_diverged_calls, 0);
        assert_eq!(state.labels.as_slice(), ["Deployed-to-models-prod"]);
        assert!(state.merged);
        assert!(state.closed);
        assert_eq!(*serving.creates.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn staging_deploy_skips_merge_and_divergence() {
        let fixture = Fixture::new();
        let collab = Arc::new(FakeCollab::default().diverged(true).mergeable(false));
        let messenger = Arc::new(RecordingMessenger::default());
        let serving = Arc::new(FakeServing::default());
        let d = dispatcher(
            fixture.config(),
            Arc::new(FakeExecutionService::new()),
            serving,
            Some(collab.clone()),
            messenger.clone(),
        );

        let params = CommandParams {
            run_id: Some("run-7".to_string()),
            ..CommandParams::default()
        };
        d.execute(Command::StagingDeploy, &params).await.unwrap();

        let state = collab.state.lock().unwrap();
        assert_eq!(state.is_diverged_calls, 0);
        assert!(!state.merged);
        assert!(!state.closed);
        assert_eq!(state.labels.as_slice(), ["Deployed-to-models-staging"]);
        let infos = messenger.infos.lock().unwrap();
        assert!(infos.iter().any(|m| m.contains("run-7")
            && m.contains("models-staging")));
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_without_run_id_fails_with_hint() {
        let fixture = Fixture::new();
        let messenger = Arc::new(RecordingMessenger::default());
        let d = dispatcher(
            fixture.config(),
            Arc::new(FakeExecutionService::new()),
            Arc::new(FakeServing::default()),
            Some(Arc::new(FakeCollab::default())),
            messenger.clone(),
        );

        let err = d
            .execute(Command::Deploy, &CommandParams::default())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Did you run /run?"));
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_resolves_run_from_hidden_state() {
        let fixture = Fixture::new();
        let collab = Arc::new(
            FakeCollab::default()
                .mergeable(true)
                .with_comment("finished <!-- CANOPY_RUN_ID=run-9 -->"),
        );
        let messenger = Arc::new(RecordingMessenger::default());
        let d = dispatcher(
            fixture.config(),
            Arc::new(FakeExecutionService::new()),
            Arc::new(FakeServing::default()),
            Some(collab),
            messenger.clone(),
        );

        let params = CommandParams {
            force: true,
            ..CommandParams::default()
        };
        d.execute(Command::Deploy, &params).await.unwrap();

        let infos = messenger.infos.lock().unwrap();
        assert!(infos.iter().any(|m| m.contains("RUN_ID: run-9")));
    }

    #[tokio::test(start_paused = true)]
    async fn unmergeable_production_deploy_reported() {
        let fixture = Fixture::new();
        let collab = Arc::new(FakeCollab::default().mergeable(false));
        let messenger = Arc::new(RecordingMessenger::default());
        let d = dispatcher(
            fixture.config(),
            Arc::new(FakeExecutionService::new()),
            Arc::new(FakeServing::default()),
            Some(collab.clone()),
            messenger,
        );

        let params = CommandParams {
            run_id: Some("run-7".to_string()),
            force: true,
            ..CommandParams::default()
        };
        let err = d.execute(Command::Deploy, &params).await.unwrap_err();

        assert!(err.to_string().contains("not mergeable"));
        let state = collab.state.lock().unwrap();
        assert!(!state.merged);
        assert!(!state.closed);
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_without_deployment_config_refused() {
        let fixture = Fixture::new();
        let mut config = fixture.config();
        config.deployment = None;
        let messenger = Arc::new(RecordingMessenger::default());
        let d = dispatcher(
            config,
            Arc::new(FakeExecutionService::new()),
            Arc::new(FakeServing::default()),
            Some(Arc::new(FakeCollab::default())),
            messenger,
        );

        let params = CommandParams {
            run_id: Some("run-7".to_string()),
            ..CommandParams::default()
        };
        let err = d.execute(Command::Deploy, &params).await.unwrap_err();

        assert!(err.to_string().contains("deployment configuration is missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn build_run_threads_fresh_version_into_run() {
        let fixture = Fixture::new();
        let execution = Arc::new(FakeExecutionService::new());
        let messenger = Arc::new(RecordingMessenger::default());
        let d = dispatcher(
            fixture.config(),
            execution.clone(),
            Arc::new(FakeServing::default()),
            None,
            messenger.clone(),
        );

        d.execute(Command::BuildRun, &CommandParams::default())
            .await
            .unwrap();

        assert_eq!(execution.uploaded_pipelines(), 1);
        let runs = execution.submitted_runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].version_id, "version-1");
        let infos = messenger.infos.lock().unwrap();
        assert!(infos.iter().any(|m| m == "built version-1"));
    }
}
