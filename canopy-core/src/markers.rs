//! Hidden-state markers
//!
//! The pipeline is stateless between commands: the only thing that survives
//! a `/build` so that a later `/run` can find the built version is an
//! invisible HTML comment embedded in the operator-facing output, in the
//! literal form `<!-- PREFIX_KEY=value -->`.
//!
//! Decoding scans an ordered comment history and keeps overwriting each
//! requested key with every newly found occurrence, so the returned value is
//! always the most recent one. Absence is not an error; callers treat a
//! missing key as "unknown, ask the operator".

use regex::Regex;
use std::collections::HashMap;

/// Render a marker for `key=value` under the given prefix.
///
/// The output has zero visual width when rendered as HTML, so it can be
/// appended to any comment body.
pub fn encode(prefix: &str, key: &str, value: &str) -> String {
    format!("<!-- {prefix}_{key}={value} -->")
}

/// Extract the most recent value for each requested key from an ordered
/// sequence of comment bodies.
///
/// Markers with a different prefix are ignored. Keys with no marker in the
/// whole history are absent from the result.
pub fn decode<'a, I, S>(bodies: I, keys: &[&str], prefix: &str) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a S>,
    S: AsRef<str> + 'a,
{
    let mut found = HashMap::new();

    let patterns: Vec<(String, Regex)> = keys
        .iter()
        .map(|key| {
            let pattern = format!(
                r"<!-- {}_{}=(.*?) -->",
                regex::escape(prefix),
                regex::escape(key)
            );
            // Patterns are built from escaped literals and cannot fail.
            (key.to_string(), Regex::new(&pattern).unwrap())
        })
        .collect();

    for body in bodies {
        for (key, re) in &patterns {
            // Later comments and later markers within a comment both win.
            if let Some(capture) = re.captures_iter(body.as_ref()).last() {
                found.insert(key.clone(), capture[1].to_string());
            }
        }
    }

    found
}
