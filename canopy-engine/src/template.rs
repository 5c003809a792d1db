//! Serving-spec templates
//!
//! The inference service manifest is not hardcoded: operators supply a JSON
//! template with a small fixed set of placeholders, and the factory renders
//! it per rollout step. The template is validated when loaded, before any
//! endpoint is touched, so a broken template can never interrupt a rollout
//! halfway through.

use serde_json::Value;
use std::path::Path;

use crate::error::{EngineError, Result};

const PLACEHOLDER_NAME: &str = "{{name}}";
const PLACEHOLDER_STORAGE_URI: &str = "{{storage_uri}}";
const PLACEHOLDER_NAMESPACE: &str = "{{namespace}}";
const PLACEHOLDER_CANARY: &str = "{{canary_traffic_percent}}";

const REQUIRED_PLACEHOLDERS: [&str; 4] = [
    PLACEHOLDER_NAME,
    PLACEHOLDER_STORAGE_URI,
    PLACEHOLDER_NAMESPACE,
    PLACEHOLDER_CANARY,
];

/// Renders inference service manifests from a validated JSON template.
#[derive(Debug, Clone)]
pub struct ServingSpecFactory {
    template: String,
}

impl ServingSpecFactory {
    /// Read and validate a template file.
    pub fn load(path: &Path) -> Result<Self> {
        let template = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!(
                "cannot read serving spec template {}: {e}",
                path.display()
            ))
        })?;
        Self::from_template(template)
    }

    /// Validate template text: every placeholder must appear at least once.
    pub fn from_template(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        for placeholder in REQUIRED_PLACEHOLDERS {
            if !template.contains(placeholder) {
                return Err(EngineError::Config(format!(
                    "serving spec template is missing the {placeholder} placeholder"
                )));
            }
        }
        Ok(Self { template })
    }

    /// Render a manifest. `canary_traffic_percent = None` drops the canary
    /// field entirely, which the serving control plane reads as "all
    /// traffic to the new revision".
    pub fn render(
        &self,
        name: &str,
        storage_uri: &str,
        namespace: &str,
        canary_traffic_percent: Option<u8>,
    ) -> Result<Value> {
        let canary = match canary_traffic_percent {
            Some(percent) => percent.to_string(),
            None => "null".to_string(),
        };
        let rendered = self
            .template
            .replace(PLACEHOLDER_NAME, name)
            .replace(PLACEHOLDER_STORAGE_URI, storage_uri)
            .replace(PLACEHOLDER_NAMESPACE, namespace)
            .replace(PLACEHOLDER_CANARY, &canary);

        let mut spec: Value = serde_json::from_str(&rendered).map_err(|e| {
            EngineError::Config(format!("serving spec template is not valid JSON: {e}"))
        })?;
        prune_nulls(&mut spec);
        Ok(spec)
    }
}

fn prune_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                prune_nulls(v);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                prune_nulls(item);
            }
        }
        _ => {}
    }
}
