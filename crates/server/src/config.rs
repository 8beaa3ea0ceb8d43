use std::{fs, io, path::PathBuf};

use serde::Deserialize;
use storage::CONFIG_FILE_NAME;
use tracing::warn;
use triggers::cloud::{DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT};

pub const SETTINGS_FILE: &str = "smartlink.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: String,
    pub config_path: PathBuf,
    pub broker_host: String,
    pub broker_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".into(),
            config_path: default_config_path(),
            broker_host: DEFAULT_BROKER_HOST.into(),
            broker_port: DEFAULT_BROKER_PORT,
        }
    }
}

/// Keys accepted in the settings file. Absent keys keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    bind_addr: Option<String>,
    config_path: Option<PathBuf>,
    broker_host: Option<String>,
    broker_port: Option<u16>,
}

pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

pub fn load_settings() -> Settings {
    let file = match fs::read_to_string(SETTINGS_FILE) {
        Ok(raw) => Some(raw),
        Err(error) if error.kind() == io::ErrorKind::NotFound => None,
        Err(error) => {
            warn!(file = SETTINGS_FILE, %error, "settings file unreadable; using defaults");
            None
        }
    };
    settings_from_sources(file.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the optional settings file, then environment variables.
pub fn settings_from_sources(
    file: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file {
        match toml::from_str::<FileSettings>(raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.bind_addr {
                    settings.bind_addr = v;
                }
                if let Some(v) = file_cfg.config_path {
                    settings.config_path = v;
                }
                if let Some(v) = file_cfg.broker_host {
                    settings.broker_host = v;
                }
                if let Some(v) = file_cfg.broker_port {
                    settings.broker_port = v;
                }
            }
            Err(error) => {
                warn!(file = SETTINGS_FILE, %error, "settings file is invalid; ignoring it");
            }
        }
    }

    if let Some(v) = env("SMARTLINK_BIND") {
        settings.bind_addr = v;
    }
    if let Some(v) = env("APP__BIND_ADDR") {
        settings.bind_addr = v;
    }

    if let Some(v) = env("SMARTLINK_CONFIG") {
        settings.config_path = PathBuf::from(v);
    }
    if let Some(v) = env("APP__CONFIG_PATH") {
        settings.config_path = PathBuf::from(v);
    }

    if let Some(v) = env("APP__BROKER_HOST") {
        settings.broker_host = v;
    }
    if let Some(port) = env("APP__BROKER_PORT").and_then(|v| v.parse().ok()) {
        settings.broker_port = port;
    }

    settings
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
