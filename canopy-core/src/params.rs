//! Parameter helpers
//!
//! Conversion of `--set key.sub_key=value` style overrides into nested JSON
//! objects, deep-merging of those objects into configuration, and the
//! operator-facing run-duration format.

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from parsing override parameters.
#[derive(Debug, Error)]
pub enum ParamError {
    #[error("parameter '{0}' has invalid format, use key=value or key.sub_key=value")]
    InvalidFormat(String),
}

/// Convert a list of `a.b.c=d` overrides into a nested JSON object
/// `{"a": {"b": {"c": "d"}}}`.
///
/// Repeated application merges sibling keys: `a.b=1` then `a.c=2` yields
/// `{"a": {"b": "1", "c": "2"}}` rather than overwriting `a`.
pub fn overrides_to_object(parameters: &[String]) -> Result<Value, ParamError> {
    let mut root = Value::Object(Map::new());
    for parameter in parameters {
        let (key, value) = parameter
            .split_once('=')
            .ok_or_else(|| ParamError::InvalidFormat(parameter.clone()))?;
        if key.is_empty() {
            return Err(ParamError::InvalidFormat(parameter.clone()));
        }
        let path: Vec<&str> = key.split('.').collect();
        set_path(&mut root, &path, Value::String(value.to_string()));
    }
    Ok(root)
}

/// Set a value at a dotted path inside a JSON object, creating intermediate
/// objects as needed and preserving unrelated siblings.
fn set_path(target: &mut Value, path: &[&str], value: Value) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let map = target.as_object_mut().unwrap();
    match path {
        [] => {}
        [last] => {
            map.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            set_path(entry, rest, value);
        }
    }
}

/// Deep-merge `overlay` into `base`. Objects merge recursively; any other
/// value in the overlay replaces the base value.
pub fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Format an elapsed run time for operator-facing messages.
///
/// Below one minute the value is reported in seconds, above it in whole
/// minutes (integer floor).
pub fn format_run_duration(seconds: i64) -> String {
    if seconds > 60 {
        format!("{} min(s)", seconds / 60)
    } else {
        format!("{seconds} seconds")
    }
}
