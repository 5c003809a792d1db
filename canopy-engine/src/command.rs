//! Comment command parsing
//!
//! A pull-request comment drives the pipeline when any of its lines starts
//! with a slash command. The first recognized command wins; the rest of its
//! line may carry flags in `--flag`, `--key value` or `--key=value` form.

use canopy_core::types::Command;

/// Flags accepted alongside a command, from a comment line or the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandParams {
    /// Pipeline version to run; falls back to hidden state when absent.
    pub version_id: Option<String>,
    /// Run to deploy from; falls back to hidden state when absent.
    pub run_id: Option<String>,
    /// Skip the production divergence gate.
    pub force: bool,
    /// Block until the submitted run finishes.
    pub wait: bool,
}

impl CommandParams {
    /// Fold recognized flags from `args` into `self`. Unrecognized tokens
    /// are ignored so chatter after a command does not break it.
    pub fn merge_parameters<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter().peekable();

        while let Some(arg) = args.next() {
            let arg = arg.as_ref();
            let (flag, inline_value) = match arg.split_once('=') {
                Some((flag, value)) => (flag, Some(value.to_string())),
                None => (arg, None),
            };

            let mut take_value = |args: &mut std::iter::Peekable<I::IntoIter>| {
                inline_value.clone().or_else(|| {
                    let next = args.peek()?.as_ref();
                    if next.starts_with("--") {
                        None
                    } else {
                        args.next().map(|v| v.as_ref().to_string())
                    }
                })
            };

            match flag {
                "--version-id" => {
                    if let Some(value) = take_value(&mut args) {
                        self.version_id = Some(value);
                    }
                }
                "--run-id" => {
                    if let Some(value) = take_value(&mut args) {
                        self.run_id = Some(value);
                    }
                }
                "--force" => self.force = true,
                "--wait" => self.wait = true,
                _ => {}
            }
        }

        self
    }
}

/// Find the first slash command in a comment body.
///
/// Longer spellings are tried first so `/build_run` never matches as
/// `/build`, and the command must be followed by whitespace or end of line.
pub fn parse_comment(body: &str) -> Option<(Command, CommandParams)> {
    for line in body.lines() {
        let line = line.trim();
        if !line.starts_with('/') {
            continue;
        }

        for command in Command::ALL {
            let spelling = format!("/{}", command.as_str());
            if let Some(rest) = line.strip_prefix(&spelling) {
                if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                    let params =
                        CommandParams::default().merge_parameters(rest.split_whitespace());
                    return Some((command, params));
                }
            }
        }
    }
    None
}
