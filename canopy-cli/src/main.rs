//! Canopy CLI
//!
//! Command-line interface for the Canopy delivery engine. The same binary
//! serves two callers: an operator at a terminal, and a CI job relaying a
//! pull-request comment through `canopy exec`. Platform clients are wired
//! here and nowhere else.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use canopy_client::{
    CollabPlatform, DevCollabPlatform, GithubCollab, HttpObjectStore, HttpProber, KserveClient,
    KubeBuildSubstrate, KubeflowClient,
};
use canopy_core::types::Command;
use canopy_engine::command::{CommandParams, parse_comment};
use canopy_engine::config::{Config, ConfigLoader};
use canopy_engine::dispatch::{Dispatcher, Platforms};
use canopy_engine::messenger::{CollabMessenger, Messenger, TerminalMessenger};
use canopy_engine::pipeline::CommandCompiler;
use canopy_engine::EngineError;

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "ML pipeline delivery: build, run, deploy", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "CANOPY_CONFIG", default_value = "canopy.toml")]
    config: PathBuf,

    /// Extra file whose [pipeline] section is merged over the configuration
    #[arg(long, global = true)]
    config_override: Option<PathBuf>,

    /// Pipeline setting override, `key=value` or `key.subkey=value`
    #[arg(long = "set", global = true)]
    set: Vec<String>,

    /// Namespace build pods run in
    #[arg(long, global = true, env = "CANOPY_WORKFLOW_NAMESPACE")]
    namespace: Option<String>,

    /// Kubeflow installation URL
    #[arg(
        long,
        global = true,
        env = "KUBEFLOW_URL",
        default_value = "http://localhost:8080"
    )]
    kubeflow_url: String,

    /// Kubernetes API server URL
    #[arg(
        long,
        global = true,
        env = "KUBE_API_URL",
        default_value = "https://kubernetes.default.svc"
    )]
    kube_api_url: String,

    /// Bearer token for the Kubernetes API
    #[arg(long, global = true, env = "KUBE_TOKEN", hide_env_values = true)]
    kube_token: Option<String>,

    /// Object gateway build contexts are staged on
    #[arg(
        long,
        global = true,
        env = "ARTIFACT_STORE_URL",
        default_value = "http://minio.canopy.svc.cluster.local:9000"
    )]
    artifact_store_url: String,

    #[arg(
        long,
        global = true,
        env = "ARTIFACT_STORE_BUCKET",
        default_value = "build-contexts"
    )]
    artifact_store_bucket: String,

    /// GitHub API token, required for `exec` outside development
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Pull request number the triggering comment belongs to
    #[arg(long, global = true, env = "PR_NUMBER")]
    pr_number: Option<u64>,

    /// `development` swaps the collaboration platform for a logging dummy
    #[arg(long, global = true, env = "RUN_ENV", default_value = "production")]
    run_env: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build container images and upload the pipeline
    Build,
    /// Submit a run of an uploaded pipeline version
    Run {
        /// Version to run; defaults to the last built one from hidden state
        #[arg(long)]
        version_id: Option<String>,
        /// Block until the run finishes
        #[arg(long)]
        wait: bool,
    },
    /// Build, then immediately run the fresh version
    BuildRun {
        #[arg(long)]
        wait: bool,
    },
    /// Roll a trained model out to the production namespace
    Deploy {
        /// Run to deploy from; defaults to the last one from hidden state
        #[arg(long)]
        run_id: Option<String>,
        /// Skip the branch divergence gate
        #[arg(long)]
        force: bool,
    },
    /// Roll a trained model out to the staging namespace
    StagingDeploy {
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Execute the command found in a pull-request comment body
    Exec {
        /// Full comment body, commands and flags included
        comment: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canopy=info,canopy_engine=info,canopy_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        // Already reported through the messenger; just set the exit code.
        Err(e) if e.downcast_ref::<EngineError>().is_some_and(|e| matches!(e, EngineError::Aborted(_))) => {
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    let (command, params) = match &cli.command {
        Commands::Build => (Command::Build, CommandParams::default()),
        Commands::Run { version_id, wait } => (
            Command::Run,
            CommandParams {
                version_id: version_id.clone(),
                wait: *wait,
                ..CommandParams::default()
            },
        ),
        Commands::BuildRun { wait } => (
            Command::BuildRun,
            CommandParams {
                wait: *wait,
                ..CommandParams::default()
            },
        ),
        Commands::Deploy { run_id, force } => (
            Command::Deploy,
            CommandParams {
                run_id: run_id.clone(),
                force: *force,
                ..CommandParams::default()
            },
        ),
        Commands::StagingDeploy { run_id, force } => (
            Command::StagingDeploy,
            CommandParams {
                run_id: run_id.clone(),
                force: *force,
                ..CommandParams::default()
            },
        ),
        Commands::Exec { comment } => {
            let Some((command, params)) = parse_comment(comment) else {
                info!("no command found in comment, nothing to do");
                return Ok(());
            };
            (command, params)
        }
    };

    let comment_driven = matches!(cli.command, Commands::Exec { .. });
    let collab = if comment_driven {
        Some(collab_platform(&cli, &config)?)
    } else {
        None
    };
    let messenger: Arc<dyn Messenger> = match &collab {
        Some(collab) => Arc::new(CollabMessenger::new(Arc::clone(collab))),
        None => Arc::new(TerminalMessenger),
    };

    let platforms = Platforms {
        execution: Arc::new(KubeflowClient::new(cli.kubeflow_url.clone())),
        substrate: Arc::new(KubeBuildSubstrate::new(
            cli.kube_api_url.clone(),
            cli.kube_token.clone(),
        )),
        store: Arc::new(HttpObjectStore::new(
            cli.artifact_store_url.clone(),
            cli.artifact_store_bucket.clone(),
            None,
        )),
        serving: Arc::new(KserveClient::new(
            cli.kube_api_url.clone(),
            cli.kube_token.clone(),
        )),
        prober: Arc::new(HttpProber::default()),
        compiler: Arc::new(CommandCompiler::default()),
        collab,
    };

    let dispatcher = Dispatcher::new(config, platforms, messenger);
    dispatcher.execute(command, &params).await?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut loader = ConfigLoader::new().with_set_overrides(cli.set.clone());
    if let Some(override_path) = &cli.config_override {
        loader = loader.with_override_file(override_path);
    }
    if let Some(namespace) = &cli.namespace {
        loader = loader.with_workflow_namespace(namespace);
    }
    loader
        .load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))
}

fn collab_platform(cli: &Cli, config: &Config) -> Result<Arc<dyn CollabPlatform>> {
    if cli.run_env == "development" {
        warn!("development mode: comments go to the log, merge gates pass");
        return Ok(Arc::new(DevCollabPlatform));
    }

    let Some(repository) = &config.repository else {
        bail!("cannot execute comment commands: [repository] is missing from the configuration");
    };
    let Some(token) = &cli.github_token else {
        bail!("cannot execute comment commands: GITHUB_TOKEN is not set");
    };
    let Some(pr_number) = cli.pr_number else {
        bail!("cannot execute comment commands: PR_NUMBER is not set");
    };

    Ok(Arc::new(GithubCollab::new(
        repository.owner.clone(),
        repository.name.clone(),
        pr_number,
        token.clone(),
    )))
}
