//! Remote control channel to the phone running the companion app.
//!
//! [`RemoteChannel`] is the raw transport (adb in production, see [`adb`]).
//! [`Device`] layers the two guards on top of it: every screen-touching
//! operation goes through [`Device::guarded`], which checks the link with the
//! [`ConnectionMonitor`] and then wakes the screen with the [`ScreenGuard`]
//! before running the operation.

pub mod adb;
pub mod connection;
pub mod screen;

pub use adb::AdbChannel;
pub use connection::ConnectionMonitor;
pub use screen::ScreenGuard;

use crate::config::{ConnectionConfig, ScreenConfig};
use crate::error::{DoorlockError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A screen coordinate in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal offset from the left edge.
    pub x: u32,
    /// Vertical offset from the top edge.
    pub y: u32,
}

impl Point {
    /// Construct a point.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.x, self.y)
    }
}

/// Captured result of a shell command on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

impl ShellOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns `true` when the command exited with status 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// A device as reported by `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedDevice {
    /// adb serial.
    pub serial: String,
    /// adb state, e.g. `device`, `offline`, `unauthorized`.
    pub state: String,
}

impl AttachedDevice {
    /// Returns `true` when adb can run commands on the device.
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

/// Shell and screen-capture access to one device.
///
/// Only [`connect`](Self::connect), [`list_devices`](Self::list_devices),
/// [`shell`](Self::shell), [`capture_screen`](Self::capture_screen) and
/// [`reboot`](Self::reboot) touch the transport; input gestures are shell
/// commands built on top of [`shell`](Self::shell).
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// The serial this channel targets.
    fn serial(&self) -> &str;

    /// (Re)connect to the device. Returns `true` when the link is up.
    async fn connect(&self) -> Result<bool>;

    /// Devices currently known to the transport.
    async fn list_devices(&self) -> Result<Vec<AttachedDevice>>;

    /// Run one shell line on the device.
    async fn shell(&self, command: &str) -> Result<ShellOutput>;

    /// Capture the screen as PNG bytes.
    async fn capture_screen(&self) -> Result<Vec<u8>>;

    /// Reboot the device.
    async fn reboot(&self) -> Result<()>;

    /// Run a shell line and fail unless it exits with status 0.
    async fn shell_checked(&self, command: &str) -> Result<ShellOutput> {
        let output = self.shell(command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(DoorlockError::Command {
                command: command.to_owned(),
                detail: format!(
                    "exit status {:?}: {}",
                    output.status,
                    output.stderr.trim()
                ),
            })
        }
    }

    /// Tap at a coordinate.
    async fn tap(&self, at: Point) -> Result<()> {
        self.shell_checked(&format!("input tap {at}")).await.map(drop)
    }

    /// Swipe between two coordinates.
    async fn swipe(&self, from: Point, to: Point) -> Result<()> {
        self.shell_checked(&format!("input swipe {from} {to}"))
            .await
            .map(drop)
    }

    /// Send a key event, e.g. `KEYCODE_WAKEUP`.
    async fn key_event(&self, keycode: &str) -> Result<()> {
        self.shell_checked(&format!("input keyevent {keycode}"))
            .await
            .map(drop)
    }
}

/// A channel plus the guards that must wrap every screen-touching operation.
pub struct Device {
    channel: Arc<dyn RemoteChannel>,
    connection: ConnectionMonitor,
    screen: ScreenGuard,
}

impl Device {
    /// Build a guarded device over `channel`.
    pub fn new(
        channel: Arc<dyn RemoteChannel>,
        connection: &ConnectionConfig,
        screen: &ScreenConfig,
    ) -> Self {
        Self {
            connection: ConnectionMonitor::new(Arc::clone(&channel), connection),
            screen: ScreenGuard::new(Arc::clone(&channel), screen),
            channel,
        }
    }

    /// The raw channel. Callers outside the guards must only use it for
    /// operations that do not depend on screen state.
    pub fn channel(&self) -> &dyn RemoteChannel {
        self.channel.as_ref()
    }

    /// The connection health monitor.
    pub fn connection(&self) -> &ConnectionMonitor {
        &self.connection
    }

    /// The screen precondition guard.
    pub fn screen(&self) -> &ScreenGuard {
        &self.screen
    }

    /// Run `op` with the connection guard outside and the screen guard inside.
    ///
    /// # Errors
    ///
    /// Returns [`DoorlockError::Connection`] if the link cannot be restored,
    /// [`DoorlockError::Precondition`] if the screen stays locked, or the
    /// error of `op` itself.
    pub async fn guarded<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let screen = &self.screen;
        self.connection
            .guarded(move || screen.with_screen_awake(op))
            .await
    }
}
