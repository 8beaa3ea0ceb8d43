use anyhow::{bail, Context, Result};
use serde_json::Value;
use shared::domain::Settings;

/// Applies one `key=value` assignment. Keys may omit the leading underscore
/// used in the config file.
pub fn apply_assignment(settings: &Settings, assignment: &str) -> Result<Settings> {
    let Some((raw_key, raw_value)) = assignment.split_once('=') else {
        bail!("expected key=value, got '{assignment}'");
    };
    let raw_key = raw_key.trim();
    let key = if raw_key.starts_with('_') {
        raw_key.to_string()
    } else {
        format!("_{raw_key}")
    };
    if !Settings::KEYS.contains(&key.as_str()) {
        bail!("unknown setting '{raw_key}'");
    }

    let mut value = serde_json::to_value(settings)?;
    let Some(fields) = value.as_object_mut() else {
        bail!("settings did not serialize to an object");
    };
    let replacement = match fields.get(&key) {
        Some(Value::Bool(_)) => Value::Bool(parse_flag(raw_value)?),
        _ => Value::String(raw_value.trim().to_string()),
    };
    fields.insert(key, replacement);
    serde_json::from_value(value).context("rebuild settings")
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("expected a boolean, got '{other}'"),
    }
}

#[cfg(test)]
#[path = "tests/settings_edit_tests.rs"]
mod tests;
