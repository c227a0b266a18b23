//! Companion app supervision.
//!
//! The lock panel only exists while the companion app is in the foreground
//! and paired with the lock. After a reboot, a crash, or another app stealing
//! focus, the supervisor relaunches it and accepts its Bluetooth prompt.

use crate::config::AppConfig;
use crate::device::{Device, Point};
use crate::error::{DoorlockError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Keeps the companion app in the foreground.
pub struct AppSupervisor {
    device: Arc<Device>,
    component: String,
    probe_command: String,
    launch_settle: Duration,
    permission_tap: Point,
    pair_settle: Duration,
    screen_off_command: Option<String>,
    screen_off_marker: String,
}

impl AppSupervisor {
    /// Create a supervisor for the configured app.
    pub fn new(device: Arc<Device>, config: &AppConfig) -> Self {
        Self {
            device,
            component: config.component.clone(),
            probe_command: config.foreground_probe_command.clone(),
            launch_settle: Duration::from_secs(config.launch_settle_secs),
            permission_tap: config.permission_tap,
            pair_settle: Duration::from_secs(config.pair_settle_secs),
            screen_off_command: config.screen_off_command.clone(),
            screen_off_marker: config.screen_off_marker.clone(),
        }
    }

    /// Whether the app's activity is the resumed one.
    ///
    /// A probe that fails to run counts as "in the foreground": relaunching
    /// on a flaky probe would tear down a working pairing.
    ///
    /// # Errors
    ///
    /// Returns [`DoorlockError::Connection`] if the device is unreachable.
    pub async fn is_foreground(&self) -> Result<bool> {
        let device = &self.device;
        let command = self.probe_command.as_str();
        let probe = device
            .guarded(|| async move { device.channel().shell(command).await })
            .await;

        match probe {
            Ok(output) => Ok(output.stdout.contains(self.component.as_str())),
            Err(e @ DoorlockError::Connection { .. }) => Err(e),
            Err(e) => {
                warn!(error = %e, "foreground probe failed, assuming app is running");
                Ok(true)
            }
        }
    }

    /// Start the app, accept its permission prompt, and wait for pairing.
    ///
    /// # Errors
    ///
    /// Propagates guard and channel failures.
    pub async fn launch(&self) -> Result<()> {
        let device = &self.device;
        let start = format!("am start -n {}", self.component);
        let start = start.as_str();
        device
            .guarded(|| async move { device.channel().shell_checked(start).await })
            .await?;
        info!(component = %self.component, "app launch requested");
        tokio::time::sleep(self.launch_settle).await;

        let prompt = self.permission_tap;
        device
            .guarded(|| async move { device.channel().tap(prompt).await })
            .await?;
        info!(
            wait_secs = self.pair_settle.as_secs(),
            "accepted permission prompt, waiting for the app to pair"
        );
        tokio::time::sleep(self.pair_settle).await;
        Ok(())
    }

    /// Launch the app unless it is already in the foreground. Returns `true`
    /// when a launch happened.
    ///
    /// # Errors
    ///
    /// Propagates connection failures and launch failures.
    pub async fn ensure_foreground(&self) -> Result<bool> {
        if self.is_foreground().await? {
            return Ok(false);
        }
        info!(component = %self.component, "app not in foreground, launching");
        self.launch().await?;
        Ok(true)
    }

    /// Switch the display off. Returns `false` when no command is configured
    /// or the command did not confirm.
    ///
    /// # Errors
    ///
    /// Propagates connection and transport failures.
    pub async fn turn_off_screen(&self) -> Result<bool> {
        let Some(command) = self.screen_off_command.as_deref() else {
            return Ok(false);
        };
        let device = &self.device;
        let output = device
            .connection()
            .guarded(|| async move { device.channel().shell(command).await })
            .await?;

        if output.stdout.contains(self.screen_off_marker.as_str()) {
            info!("display switched off");
            Ok(true)
        } else {
            error!(stdout = %output.stdout.trim(), "display did not switch off");
            Ok(false)
        }
    }
}
