use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Failure while expanding an `{{ env.VAR }}` template
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpandError {
    #[error("environment variable not found: `{0}`")]
    MissingVariable(String),
    #[error("only variables scoped with 'env.' are supported: `{0}`")]
    UnsupportedScope(String),
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Group 1: the key (`env.VAR_NAME`), group 2: optional default("...") value
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*([a-zA-Z0-9_.]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
            .expect("placeholder pattern is a valid regex")
    })
}

/// Expand `{{ env.VAR }}` placeholders in a whole TOML document
///
/// Supports `{{ env.VAR | default("fallback") }}`. Lines starting with `#`
/// are passed through unchanged so commented-out settings never require
/// their variables to be set.
pub fn expand_env(input: &str) -> Result<String, ExpandError> {
    let mut output = String::with_capacity(input.len());

    for (i, line) in input.lines().enumerate() {
        if i > 0 {
            output.push('\n');
        }

        if line.trim_start().starts_with('#') {
            output.push_str(line);
        } else {
            output.push_str(&expand_value(line)?);
        }
    }

    if input.ends_with('\n') {
        output.push('\n');
    }

    Ok(output)
}

/// Expand placeholders in a single value, such as stored API key material
///
/// Unlike [`expand_env`] there is no comment handling: the whole input is
/// treated as one value.
pub fn expand_value(value: &str) -> Result<String, ExpandError> {
    let mut result = String::with_capacity(value.len());
    let mut last_end = 0;

    for captures in placeholder().captures_iter(value) {
        let Some(overall) = captures.get(0) else {
            continue;
        };

        result.push_str(&value[last_end..overall.start()]);
        result.push_str(&resolve(&captures)?);
        last_end = overall.end();
    }

    result.push_str(&value[last_end..]);

    Ok(result)
}

fn resolve(captures: &Captures<'_>) -> Result<String, ExpandError> {
    let key = captures.get(1).map_or("", |m| m.as_str());
    let default_value = captures.get(2).map(|m| m.as_str());

    let mut parts = key.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("env"), Some(var_name), None) => std::env::var(var_name).or_else(|_| {
            default_value
                .map(str::to_owned)
                .ok_or_else(|| ExpandError::MissingVariable(var_name.to_owned()))
        }),
        _ => Err(ExpandError::UnsupportedScope(key.to_owned())),
    }
}
