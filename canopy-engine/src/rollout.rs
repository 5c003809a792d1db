//! Rollout controller
//!
//! Deploys a trained model to a serving namespace. A brand-new endpoint is
//! created directly with full traffic. An existing endpoint goes through a
//! canary pass: the new revision is applied with 0% traffic, smoke-tested
//! with the configured sample input, and only then promoted to 100%. On any
//! failure the rollout stalls where it is. There is no automatic rollback,
//! so a failed canary keeps serving 0% traffic until an operator intervenes.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::template::ServingSpecFactory;
use canopy_client::{ClientError, EndpointProber, ServingControlPlane};
use canopy_core::types::RolloutDescriptor;

const DEFAULT_READY_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Bucket trained model artifacts are exported to, keyed by run id.
const MODEL_STORE_PREFIX: &str = "s3://trained-models";

/// Explicit rollout progression. Terminal states are `Done` and `Stalled`;
/// `Stalled` always has a recorded error explaining where it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RolloutState {
    Checking,
    Creating,
    /// Apply the new revision; `Some(0)` is the canary pass, `None` removes
    /// the traffic split and promotes the revision to 100%.
    Replacing { canary_traffic_percent: Option<u8> },
    SmokeTest,
    Done,
    Stalled { traffic_percent: u8 },
}

/// Drives one inference endpoint through create or canary-replace.
pub struct RolloutController {
    serving: Arc<dyn ServingControlPlane>,
    prober: Arc<dyn EndpointProber>,
    factory: ServingSpecFactory,
    service_name: String,
    namespace: String,
    /// Sample input for the canary smoke test; absent means promote blindly.
    smoke_sample: Option<Value>,
    ready_grace: Duration,
    ready_timeout: Duration,
    error: Option<String>,
}

impl RolloutController {
    pub fn new(
        serving: Arc<dyn ServingControlPlane>,
        prober: Arc<dyn EndpointProber>,
        factory: ServingSpecFactory,
        service_name: impl Into<String>,
        namespace: impl Into<String>,
        smoke_sample: Option<Value>,
    ) -> Self {
        Self {
            serving,
            prober,
            factory,
            service_name: service_name.into(),
            namespace: namespace.into(),
            smoke_sample,
            ready_grace: DEFAULT_READY_GRACE,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            error: None,
        }
    }

    /// Override readiness timing. Used by tests and impatient operators.
    pub fn with_timing(mut self, ready_grace: Duration, ready_timeout: Duration) -> Self {
        self.ready_grace = ready_grace;
        self.ready_timeout = ready_timeout;
        self
    }

    /// First error encountered, if the rollout stalled.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Roll out the model trained by `run_id`. The returned descriptor
    /// reflects where the rollout ended up; when it stalled, [`Self::error`]
    /// says why.
    pub async fn deploy(&mut self, run_id: &str) -> RolloutDescriptor {
        let storage_uri = format!("{MODEL_STORE_PREFIX}/{run_id}/");
        let mut state = RolloutState::Checking;

        let traffic_percent = loop {
            state = self.advance(state, &storage_uri).await;
            match state {
                RolloutState::Done => break 100,
                RolloutState::Stalled { traffic_percent } => break traffic_percent,
                _ => {}
            }
        };

        RolloutDescriptor {
            service_name: self.service_name.clone(),
            namespace: self.namespace.clone(),
            run_id: run_id.to_string(),
            traffic_percent,
            ready: self.error.is_none(),
        }
    }

    async fn advance(&mut self, state: RolloutState, storage_uri: &str) -> RolloutState {
        match state {
            RolloutState::Checking => match self.serving.list(&self.namespace).await {
                Ok(existing) if existing.contains(&self.service_name) => {
                    info!(service = %self.service_name, "endpoint exists, starting canary pass");
                    RolloutState::Replacing {
                        canary_traffic_percent: Some(0),
                    }
                }
                Ok(_) => RolloutState::Creating,
                Err(e) => self.stall(
                    0,
                    format!(
                        "failed while checking deployments in namespace {}: {e}",
                        self.namespace
                    ),
                ),
            },

            RolloutState::Creating => {
                match self.apply(storage_uri, None, false).await {
                    Ok(()) => RolloutState::Done,
                    Err(stalled) => stalled,
                }
            }

            RolloutState::Replacing {
                canary_traffic_percent,
            } => match self.apply(storage_uri, canary_traffic_percent, true).await {
                Ok(()) if canary_traffic_percent.is_some() => {
                    if self.smoke_sample.is_some() {
                        RolloutState::SmokeTest
                    } else {
                        RolloutState::Replacing {
                            canary_traffic_percent: None,
                        }
                    }
                }
                Ok(()) => {
                    info!(service = %self.service_name, "revision promoted to full traffic");
                    RolloutState::Done
                }
                Err(stalled) => stalled,
            },

            RolloutState::SmokeTest => self.smoke_test().await,

            terminal => terminal,
        }
    }

    /// Render the spec, create or replace the endpoint, then wait for it to
    /// report ready.
    async fn apply(
        &mut self,
        storage_uri: &str,
        canary_traffic_percent: Option<u8>,
        replace: bool,
    ) -> Result<(), RolloutState> {
        // A stall mid-apply leaves traffic wherever this pass put it: 0 for
        // the canary pass, 100 for a create or a promote.
        let traffic_now = canary_traffic_percent.unwrap_or(100);

        let spec = self
            .factory
            .render(
                &self.service_name,
                storage_uri,
                &self.namespace,
                canary_traffic_percent,
            )
            .map_err(|e| self.stall(traffic_now, e.to_string()))?;

        let applied = if replace {
            self.serving
                .replace(&self.service_name, &spec, &self.namespace)
                .await
        } else {
            self.serving.create(&spec, &self.namespace).await
        };
        applied.map_err(|e| {
            self.stall(
                traffic_now,
                format!("failed while applying inference service: {e}"),
            )
        })?;

        // The control plane can briefly report the previous revision as
        // Ready right after an apply.
        sleep(self.ready_grace).await;

        match self
            .serving
            .wait_ready(&self.service_name, &self.namespace, self.ready_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(ClientError::Timeout(_)) => {
                let status = self
                    .serving
                    .get_status(&self.service_name, &self.namespace)
                    .await
                    .map(|s| serde_json::to_string_pretty(&s).unwrap_or_default())
                    .unwrap_or_else(|e| format!("status unavailable: {e}"));
                Err(self.stall(
                    traffic_now,
                    format!(
                        "inference service did not become ready in time. Status:\n{status}"
                    ),
                ))
            }
            Err(e) => Err(self.stall(
                traffic_now,
                format!("failed while waiting for inference service: {e}"),
            )),
        }
    }

    /// POST the sample input at the canary revision's private hostname.
    /// Success promotes; anything else stalls the canary at 0% traffic.
    async fn smoke_test(&mut self) -> RolloutState {
        let sample = self
            .smoke_sample
            .clone()
            .unwrap_or(Value::Null);

        let revision = match self
            .serving
            .latest_revision(&self.service_name, &self.namespace)
            .await
        {
            Ok(Some(revision)) => revision,
            Ok(None) => {
                return self.stall(
                    0,
                    "New model is deployed (with traffic 0%) but its revision could not be \
                     determined for the smoke test"
                        .to_string(),
                );
            }
            Err(e) => {
                return self.stall(
                    0,
                    format!(
                        "New model is deployed (with traffic 0%) but reading its revision \
                         failed: {e}"
                    ),
                );
            }
        };

        let url = format!(
            "http://{revision}-private.{}.svc.cluster.local/v1/models/{}:predict",
            self.namespace, self.service_name
        );
        info!(%url, "smoke testing canary revision");

        match self.prober.post_json(&url, &sample).await {
            Ok(response) if response.is_success() => RolloutState::Replacing {
                canary_traffic_percent: None,
            },
            Ok(response) => self.stall(
                0,
                format!(
                    "New model is deployed (with traffic 0%) but test sample failed with \
                     status: {}. Response: {}",
                    response.status, response.body
                ),
            ),
            Err(e) => self.stall(
                0,
                format!(
                    "New model is deployed (with traffic 0%) but test sample request \
                     failed: {e}"
                ),
            ),
        }
    }

    fn stall(&mut self, traffic_percent: u8, message: String) -> RolloutState {
        warn!(service = %self.service_name, error = %message, "rollout stalled");
        if self.error.is_none() {
            self.error = Some(message);
        }
        RolloutState::Stalled { traffic_percent }
    }
}
