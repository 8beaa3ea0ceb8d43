use std::{io, sync::Arc, time::Duration};

use shared::{domain::Settings, protocol::DispatchOutcome};
use tracing::{debug, info, warn};

use crate::launcher::{CommandLine, CommandOutput, ProcessLauncher};

/// Upper bound for any adb call whose output is awaited.
pub const ADB_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to the Android device over the `adb` bridge.
#[derive(Clone)]
pub struct DeviceBridge {
    launcher: Arc<dyn ProcessLauncher>,
    wake_delay: Duration,
}

impl DeviceBridge {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, wake_delay: Duration) -> Self {
        Self {
            launcher,
            wake_delay,
        }
    }

    pub async fn connect(&self, ip: &str) -> DispatchOutcome {
        let ip = ip.trim();
        if ip.is_empty() {
            return DispatchOutcome::failed("device IP is not set");
        }
        match self.output(&CommandLine::adb(["connect", ip])).await {
            Ok(output) if output.success => {
                info!(ip, "adb connect finished");
                DispatchOutcome::ok(format!("connect: {}", output.text()))
            }
            Ok(output) => {
                warn!(ip, output = output.text(), "adb connect failed");
                DispatchOutcome::failed(format!("connect failed: {}", output.text()))
            }
            Err(error) => {
                warn!(ip, %error, "adb connect could not run");
                DispatchOutcome::failed(format!("connect error: {error}"))
            }
        }
    }

    pub async fn disconnect(&self) -> DispatchOutcome {
        match self.output(&CommandLine::adb(["disconnect"])).await {
            Ok(output) if output.success => {
                info!("adb disconnect finished");
                DispatchOutcome::ok(format!("disconnect: {}", output.text()))
            }
            Ok(output) => DispatchOutcome::failed(format!("disconnect failed: {}", output.text())),
            Err(error) => DispatchOutcome::failed(format!("disconnect error: {error}")),
        }
    }

    /// `None` when the display state could not be determined.
    pub async fn is_screen_on(&self) -> Option<bool> {
        let query = CommandLine::adb(["shell", "dumpsys", "display"]);
        match self.output(&query).await {
            Ok(output) if output.success => parse_screen_state(&output.stdout),
            Ok(output) => {
                debug!(output = output.text(), "display query failed");
                None
            }
            Err(error) => {
                debug!(%error, "display query could not run");
                None
            }
        }
    }

    async fn output(&self, command: &CommandLine) -> io::Result<CommandOutput> {
        tokio::time::timeout(ADB_TIMEOUT, self.launcher.output(command))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("'{command}' did not finish within {}s", ADB_TIMEOUT.as_secs()),
                )
            })?
    }

    /// Turns the screen on unless it is already on, then types the unlock
    /// password when configured. Never fails; problems are logged.
    pub async fn wake(&self, settings: &Settings) {
        if self.is_screen_on().await == Some(true) {
            debug!("screen already on");
            return;
        }

        let power = CommandLine::adb(["shell", "input", "keyevent", "KEYCODE_POWER"]);
        if let Err(error) = self.launcher.spawn(&power).await {
            warn!(%error, "failed to send power key");
            return;
        }
        tokio::time::sleep(self.wake_delay).await;

        let password = settings.device_password.trim();
        if settings.unlock_after_screen_on && !password.is_empty() {
            let unlock = CommandLine::adb(["shell", "input", "text", password]);
            if let Err(error) = self.launcher.spawn(&unlock).await {
                warn!(%error, "failed to type unlock password");
                return;
            }
            tokio::time::sleep(self.wake_delay).await;
        }
        info!("device woken");
    }
}

/// Reads the first `mState=ON` or `mState=OFF` marker from `dumpsys display`.
pub fn parse_screen_state(dumpsys: &str) -> Option<bool> {
    dumpsys
        .match_indices("mState=")
        .find_map(|(idx, marker)| {
            let rest = &dumpsys[idx + marker.len()..];
            if rest.starts_with("ON") {
                Some(true)
            } else if rest.starts_with("OFF") {
                Some(false)
            } else {
                None
            }
        })
}
