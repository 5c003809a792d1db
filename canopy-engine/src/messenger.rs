//! Operator messaging
//!
//! Every command reports progress through a [`Messenger`]: a colored
//! terminal reporter when invoked locally, or a comment poster when driven
//! from a pull request. The comment variant doubles as the persistence
//! layer, appending hidden-state markers to its success messages so a later
//! command can pick up the version or run id without any database.

use async_trait::async_trait;
use colored::Colorize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::{EngineError, Result};
use canopy_client::CollabPlatform;
use canopy_core::markers;
use canopy_core::types::{BuildDescriptor, RunDescriptor};

/// Marker prefix namespacing this tool's hidden state in comment bodies.
pub const HIDDEN_STATE_PREFIX: &str = "CANOPY";

/// Hidden-state key for the last built pipeline version.
pub const VERSION_ID_KEY: &str = "VERSION_ID";

/// Hidden-state key for the last completed run.
pub const RUN_ID_KEY: &str = "RUN_ID";

/// Reporting channel for command progress and failures.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn info(&self, message: &str);

    /// Report a terminal failure and hand back the error the command should
    /// propagate. The returned [`EngineError::Aborted`] is already reported;
    /// callers exit non-zero without reporting it again.
    async fn fail(&self, message: &str) -> EngineError;

    /// Report a built pipeline version. Fallible: on the comment channel
    /// this message is the only place the version id is persisted, so a
    /// failed post must fail the command instead of losing the id.
    async fn component_built(&self, descriptor: &BuildDescriptor, build_only: bool) -> Result<()>;

    async fn run_started(&self, run: &RunDescriptor);

    /// Report a finished run. Fallible for the same reason as
    /// [`Self::component_built`]: the message carries the run id marker.
    async fn run_completed(&self, run_id: &str, run_time: &str) -> Result<()>;
}

/// Local reporter for interactive use.
#[derive(Debug, Default)]
pub struct TerminalMessenger;

#[async_trait]
impl Messenger for TerminalMessenger {
    async fn info(&self, message: &str) {
        println!("{message}");
    }

    async fn fail(&self, message: &str) -> EngineError {
        error!("{message}");
        eprintln!("{}", message.red());
        EngineError::Aborted(message.to_string())
    }

    async fn component_built(&self, descriptor: &BuildDescriptor, build_only: bool) -> Result<()> {
        println!(
            "{} pipeline version {} uploaded",
            "Built:".green().bold(),
            descriptor.version_id.cyan()
        );
        println!("  {}", descriptor.url);
        if build_only {
            println!(
                "  start a run with: {}",
                format!("canopy run --version-id {}", descriptor.version_id).yellow()
            );
        }
        Ok(())
    }

    async fn run_started(&self, run: &RunDescriptor) {
        println!(
            "{} run {} submitted",
            "Running:".green().bold(),
            run.run_id.cyan()
        );
        println!("  {}", run.url);
        for (name, value) in &run.run_params {
            println!("  {name} = {}", render_param(value));
        }
    }

    async fn run_completed(&self, run_id: &str, run_time: &str) -> Result<()> {
        println!(
            "{} run {} finished in {run_time}",
            "Done:".green().bold(),
            run_id.cyan()
        );
        println!(
            "  deploy it with: {}",
            format!("canopy deploy --run-id {run_id}").yellow()
        );
        Ok(())
    }
}

/// Reporter that posts pull-request comments carrying hidden state.
pub struct CollabMessenger {
    collab: Arc<dyn CollabPlatform>,
}

impl CollabMessenger {
    pub fn new(collab: Arc<dyn CollabPlatform>) -> Self {
        Self { collab }
    }

    async fn post(&self, body: &str) -> Result<()> {
        self.collab
            .create_comment(body)
            .await
            .map_err(|e| EngineError::Collab(format!("could not post comment: {e}")))
    }

    /// For messages that carry no state a failed post only loses cosmetics,
    /// so it is logged instead of failing the command.
    async fn post_best_effort(&self, body: &str) {
        if let Err(e) = self.collab.create_comment(body).await {
            warn!("could not post comment: {e}");
        }
    }
}

#[async_trait]
impl Messenger for CollabMessenger {
    async fn info(&self, message: &str) {
        self.post_best_effort(message).await;
    }

    async fn fail(&self, message: &str) -> EngineError {
        error!("{message}");
        self.post_best_effort(&format!("❌ {message}")).await;
        EngineError::Aborted(message.to_string())
    }

    async fn component_built(&self, descriptor: &BuildDescriptor, build_only: bool) -> Result<()> {
        let hint = if build_only {
            "\n\nStart a run with a `/run` comment."
        } else {
            ""
        };
        let body = format!(
            "✅ Pipeline built successfully. <a href=\"{}\">Details</a>.{hint}\n{}",
            descriptor.url,
            markers::encode(HIDDEN_STATE_PREFIX, VERSION_ID_KEY, &descriptor.version_id)
        );
        self.post(&body).await
    }

    async fn run_started(&self, run: &RunDescriptor) {
        let mut rows = String::new();
        for (name, value) in &run.run_params {
            rows.push_str(&format!(
                "<tr><td>{name}</td><td>{}</td></tr>",
                render_param(value)
            ));
        }
        let body = format!(
            "⏳ Pipeline run started. <a href=\"{}\">Details</a>.\n\
             <table><tr><th>Parameter</th><th>Value</th></tr>{rows}</table>",
            run.url
        );
        self.post_best_effort(&body).await;
    }

    async fn run_completed(&self, run_id: &str, run_time: &str) -> Result<()> {
        let body = format!(
            "✅ Pipeline run finished in {run_time}.\n\n\
             Deploy the trained model with a `/deploy` or `/staging_deploy` comment.\n{}",
            markers::encode(HIDDEN_STATE_PREFIX, RUN_ID_KEY, run_id)
        );
        self.post(&body).await
    }
}

fn render_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
