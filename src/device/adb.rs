//! [`RemoteChannel`] over the `adb` command-line tool.
//!
//! Every invocation is bounded by the configured per-call timeout; a hung adb
//! process is killed when its timeout elapses.

use super::{AttachedDevice, RemoteChannel, ShellOutput};
use crate::config::DeviceConfig;
use crate::error::{DoorlockError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

/// adb-backed channel to one device.
pub struct AdbChannel {
    adb_path: PathBuf,
    serial: String,
    command_timeout: Duration,
}

impl AdbChannel {
    /// Create a channel from device settings.
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            adb_path: config.adb_path.clone(),
            serial: config.serial.clone(),
            command_timeout: config.command_timeout(),
        }
    }

    /// Run adb with `args`, bounded by the per-call timeout.
    async fn run(&self, args: &[&str]) -> Result<Output> {
        let rendered = args.join(" ");
        debug!(command = %rendered, "adb");

        let mut command = Command::new(&self.adb_path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match timeout(self.command_timeout, command.output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DoorlockError::Timeout {
                command: rendered,
                timeout: self.command_timeout,
            }),
        }
    }

    /// Run adb against this device (`adb -s <serial> ...`).
    async fn run_on_device(&self, args: &[&str]) -> Result<Output> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.extend_from_slice(&["-s", self.serial.as_str()]);
        full.extend_from_slice(args);
        self.run(&full).await
    }
}

#[async_trait]
impl RemoteChannel for AdbChannel {
    fn serial(&self) -> &str {
        &self.serial
    }

    async fn connect(&self) -> Result<bool> {
        let output = self.run(&["connect", self.serial.as_str()]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(result = %stdout.trim(), "adb connect");
        Ok(connect_succeeded(&stdout))
    }

    async fn list_devices(&self) -> Result<Vec<AttachedDevice>> {
        let output = self.run(&["devices"]).await?;
        Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn shell(&self, command: &str) -> Result<ShellOutput> {
        let output = self.run_on_device(&["shell", command]).await?;
        Ok(ShellOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn capture_screen(&self) -> Result<Vec<u8>> {
        let output = self.run_on_device(&["exec-out", "screencap", "-p"]).await?;
        if !output.status.success() || output.stdout.is_empty() {
            return Err(DoorlockError::Command {
                command: "exec-out screencap -p".to_owned(),
                detail: format!(
                    "exit status {:?}, {} bytes: {}",
                    output.status.code(),
                    output.stdout.len(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(output.stdout)
    }

    async fn reboot(&self) -> Result<()> {
        let output = self.run_on_device(&["reboot"]).await?;
        if !output.status.success() {
            return Err(DoorlockError::Command {
                command: "reboot".to_owned(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        info!(serial = %self.serial, "reboot issued");
        Ok(())
    }
}

/// `adb connect` prints `connected to ...` or `already connected to ...` on
/// success and `failed to connect ...` / `unable to connect ...` otherwise.
fn connect_succeeded(stdout: &str) -> bool {
    let lower = stdout.to_lowercase();
    lower.contains("connected") && !lower.contains("failed") && !lower.contains("unable")
}

/// Parse `adb devices` output, skipping the header and daemon notices.
fn parse_devices(stdout: &str) -> Vec<AttachedDevice> {
    stdout
        .lines()
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(AttachedDevice {
                serial: serial.to_owned(),
                state: state.to_owned(),
            })
        })
        .collect()
}
