use std::{io, sync::Arc, time::Duration};

use shared::{
    domain::{ConfigDocument, Item, ItemKind, Settings},
    protocol::{DispatchOutcome, TriggerSource},
};
use thiserror::Error;
use tracing::{info, warn};

pub mod brightness;
pub mod deeplink;
pub mod device;
pub mod launcher;

pub use device::DeviceBridge;
pub use launcher::{CommandLine, CommandOutput, ProcessLauncher, SystemLauncher};

use deeplink::DeepLinkError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("unknown type: {0}")]
    UnknownType(String),
    #[error("item '{0}' has no command")]
    EmptyCommand(String),
    #[error(transparent)]
    DeepLink(#[from] DeepLinkError),
    #[error("failed to launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchTimings {
    /// Pause between the lines of a multi-line command.
    pub line_delay: Duration,
    /// Pause after each wake keystroke.
    pub wake_delay: Duration,
}

impl Default for DispatchTimings {
    fn default() -> Self {
        Self {
            line_delay: Duration::from_secs(1),
            wake_delay: Duration::from_secs(1),
        }
    }
}

/// Runs launch items. Shared by the manual, card and cloud paths so all three
/// behave the same for the same item.
#[derive(Clone)]
pub struct Dispatcher {
    launcher: Arc<dyn ProcessLauncher>,
    device: DeviceBridge,
    timings: DispatchTimings,
}

impl Dispatcher {
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self::with_timings(launcher, DispatchTimings::default())
    }

    pub fn with_timings(launcher: Arc<dyn ProcessLauncher>, timings: DispatchTimings) -> Self {
        Self {
            device: DeviceBridge::new(Arc::clone(&launcher), timings.wake_delay),
            launcher,
            timings,
        }
    }

    pub fn device(&self) -> &DeviceBridge {
        &self.device
    }

    /// Runs item `name` from `config`. `value` is only used by brightness
    /// items. Multi-line commands continue in the background after this
    /// returns; the outcome reflects only what could be checked up front.
    pub async fn dispatch(
        &self,
        config: &ConfigDocument,
        name: &str,
        value: Option<u32>,
        source: TriggerSource,
    ) -> DispatchOutcome {
        match self.try_dispatch(config, name, value).await {
            Ok(message) => {
                info!(item = name, source = source.as_str(), "{message}");
                DispatchOutcome::ok(message)
            }
            Err(error) => {
                warn!(item = name, source = source.as_str(), %error, "dispatch failed");
                DispatchOutcome::failed(error.to_string())
            }
        }
    }

    async fn try_dispatch(
        &self,
        config: &ConfigDocument,
        name: &str,
        value: Option<u32>,
    ) -> Result<String, DispatchError> {
        let item = config
            .item(name)
            .ok_or_else(|| DispatchError::NotFound(name.to_string()))?;

        match &item.kind {
            ItemKind::Exe => {
                let lines = command_lines(name, item, |line| CommandLine::shell(line))?;
                let count = lines.len();
                self.run_in_background(name, lines);
                Ok(format!("started {count} command(s)"))
            }
            ItemKind::Adb => {
                let lines = command_lines(name, item, CommandLine::from_device_line)?;
                if config.settings.adb_screen_on {
                    self.device.wake(&config.settings).await;
                }
                let count = lines.len();
                self.run_in_background(name, lines);
                Ok(format!("started {count} adb command(s)"))
            }
            ItemKind::Music => {
                let scheme =
                    deeplink::resolve_scheme(&item.uri_scheme, &config.settings.music_platform);
                let uri = deeplink::build_uri(&item.command, scheme)?;
                if config.settings.music_screen_on {
                    self.device.wake(&config.settings).await;
                }
                self.launch(&view_intent(&uri)).await?;
                Ok("music started".to_string())
            }
            ItemKind::Brightness => {
                if item.command.trim().is_empty() {
                    return Err(DispatchError::EmptyCommand(name.to_string()));
                }
                let level = brightness::clamp_level(value.unwrap_or(brightness::DEFAULT_LEVEL));
                let command = brightness::render(&item.command, level);
                self.launch(&CommandLine::shell(command)).await?;
                Ok(format!("brightness set to {level}"))
            }
            ItemKind::Unknown(raw) => Err(DispatchError::UnknownType(raw.clone())),
        }
    }

    async fn launch(&self, command: &CommandLine) -> Result<(), DispatchError> {
        self.launcher
            .spawn(command)
            .await
            .map_err(|source| DispatchError::Launch {
                command: command.to_string(),
                source,
            })
    }

    fn run_in_background(&self, name: &str, lines: Vec<CommandLine>) {
        let launcher = Arc::clone(&self.launcher);
        let delay = self.timings.line_delay;
        let name = name.to_string();

        tokio::spawn(async move {
            let total = lines.len();
            for (idx, line) in lines.iter().enumerate() {
                if let Err(error) = launcher.spawn(line).await {
                    warn!(item = %name, command = %line, %error, "command failed to start");
                }
                if idx + 1 < total {
                    tokio::time::sleep(delay).await;
                }
            }
        });
    }

    pub async fn connect_device(&self, settings: &Settings) -> DispatchOutcome {
        self.device.connect(&settings.adb_ip).await
    }
}

fn command_lines(
    name: &str,
    item: &Item,
    parse: impl Fn(&str) -> CommandLine,
) -> Result<Vec<CommandLine>, DispatchError> {
    let lines: Vec<CommandLine> = item
        .command
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse)
        .collect();
    if lines.is_empty() {
        return Err(DispatchError::EmptyCommand(name.to_string()));
    }
    Ok(lines)
}

fn view_intent(uri: &str) -> CommandLine {
    CommandLine::adb([
        "shell",
        "am",
        "start",
        "-a",
        "android.intent.action.VIEW",
        "-d",
        uri,
    ])
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
