//! Configuration types for the door-lock bridge.
//!
//! Every section is `#[serde(default)]`, so a TOML file only needs to name the
//! values it changes. Deployment-specific values (device serial, broker, topics)
//! can also come from the environment; see [`DoorlockConfig::apply_env_overrides`].

use crate::classifier::{ColorProfile, Rgb};
use crate::device::Point;
use crate::error::{DoorlockError, Result};
use crate::scheduler::tasks::TimeOfDay;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoorlockConfig {
    /// Which device to drive and how to reach it.
    pub device: DeviceConfig,
    /// Connection health monitoring.
    pub connection: ConnectionConfig,
    /// Screen wake/unlock precondition.
    pub screen: ScreenConfig,
    /// Companion app panel coordinates and delays.
    pub panel: PanelConfig,
    /// Reference colors for state classification.
    pub colors: ColorConfig,
    /// Companion app supervision.
    pub app: AppConfig,
    /// Lock command reconciliation.
    pub reconcile: ReconcileConfig,
    /// Periodic check and daily reboot.
    pub schedule: ScheduleConfig,
    /// MQTT command/state bus.
    pub bus: BusConfig,
    /// Diagnostic screenshots.
    pub diagnostics: DiagnosticsConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Remote control channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// adb serial of the phone, usually `host:port` for network adb.
    pub serial: String,
    /// Path to the `adb` binary.
    pub adb_path: PathBuf,
    /// Upper bound for any single adb invocation, in seconds.
    pub command_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: "127.0.0.1:5555".to_owned(),
            adb_path: PathBuf::from("adb"),
            command_timeout_secs: 30,
        }
    }
}

impl DeviceConfig {
    /// Per-call timeout as a [`Duration`].
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Connection health monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Total number of probes before the link is declared down.
    pub max_attempts: u32,
    /// Pause between probes, in seconds.
    pub retry_interval_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            retry_interval_secs: 5,
        }
    }
}

/// Screen precondition guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Shell command whose output reveals keyguard / sleep state.
    pub lock_probe_command: String,
    /// Any of these substrings in the probe output means "locked or asleep".
    pub locked_markers: Vec<String>,
    /// Key event sent to wake the display.
    pub wake_keycode: String,
    /// Delay after the wake key event, in milliseconds.
    pub wake_settle_ms: u64,
    /// Swipe-up gesture start point.
    pub swipe_from: Point,
    /// Swipe-up gesture end point.
    pub swipe_to: Point,
    /// Delay after the swipe for the unlock animation, in milliseconds.
    pub swipe_settle_ms: u64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            lock_probe_command:
                "dumpsys window policy | grep -E 'mAwake|mDreamingLockscreen|isStatusBarKeyguard'"
                    .to_owned(),
            locked_markers: vec![
                "mAwake=false".to_owned(),
                "mDreamingLockscreen=true".to_owned(),
                "isStatusBarKeyguard=true".to_owned(),
            ],
            wake_keycode: "KEYCODE_WAKEUP".to_owned(),
            wake_settle_ms: 1_000,
            swipe_from: Point::new(540, 1800),
            swipe_to: Point::new(540, 800),
            swipe_settle_ms: 3_000,
        }
    }
}

/// Companion app panel layout and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Tap that dismisses the app's idle/sleep overlay.
    pub wake_tap: Point,
    /// Delay after the wake tap, in milliseconds.
    pub wake_settle_ms: u64,
    /// Unlock button.
    pub unlock_tap: Point,
    /// Lock button.
    pub lock_tap: Point,
    /// Delay after pressing lock/unlock before verifying, in milliseconds.
    pub press_settle_ms: u64,
    /// Pixel sampled to classify the lock state.
    pub sample_point: Point,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            wake_tap: Point::new(530, 1440),
            wake_settle_ms: 1_000,
            unlock_tap: Point::new(750, 1200),
            lock_tap: Point::new(330, 1200),
            press_settle_ms: 3_000,
            sample_point: Point::new(140, 380),
        }
    }
}

/// Reference colors for each detectable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    /// Indicator color while the door is unlocked (red).
    pub unlocked: Rgb,
    /// Indicator color while the door is locked (green).
    pub locked: Rgb,
    /// Indicator color when the app has lost the lock (grey).
    pub unlinked: Rgb,
    /// Maximum per-channel absolute difference for a match.
    pub tolerance: u8,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            unlocked: Rgb::new(194, 23, 45),
            locked: Rgb::new(0, 168, 135),
            unlinked: Rgb::new(130, 130, 130),
            tolerance: 10,
        }
    }
}

impl ColorConfig {
    /// Build the immutable profile used by the classifier.
    pub fn profile(&self) -> ColorProfile {
        ColorProfile::new(self.unlocked, self.locked, self.unlinked, self.tolerance)
    }
}

/// Companion app supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Activity component, `package/.Activity`.
    pub component: String,
    /// Shell command listing the resumed (foreground) activity.
    pub foreground_probe_command: String,
    /// Delay after launching the app, in seconds.
    pub launch_settle_secs: u64,
    /// Tap accepting the app's Bluetooth permission prompt.
    pub permission_tap: Point,
    /// Delay for the app to pair with the lock, in seconds.
    pub pair_settle_secs: u64,
    /// Command that switches the display off; `None` leaves the screen on.
    pub screen_off_command: Option<String>,
    /// Substring in the screen-off command output that signals success.
    pub screen_off_marker: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            component: "com.alpha.lockapp/.MainActivity".to_owned(),
            foreground_probe_command: "dumpsys activity activities | grep mResumedActivity"
                .to_owned(),
            launch_settle_secs: 5,
            permission_tap: Point::new(900, 1120),
            pair_settle_secs: 15,
            screen_off_command: Some(
                "CLASSPATH=/mnt/sdcard/Documents/DisplayToggle.dex app_process / DisplayToggle 0"
                    .to_owned(),
            ),
            screen_off_marker: "Display mode: 0".to_owned(),
        }
    }
}

/// Lock command reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Retries after the first dispatch when the observed state mismatches.
    pub max_retries: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { max_retries: 2 }
    }
}

/// Periodic check and daily reboot scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Minutes between periodic status checks.
    pub check_interval_mins: u64,
    /// Start of the window in which periodic checks run (local time).
    pub active_start: TimeOfDay,
    /// End of the window in which periodic checks run (local time, inclusive).
    pub active_end: TimeOfDay,
    /// Whether the daily reboot runs at all.
    pub reboot_enabled: bool,
    /// Local time of the daily reboot.
    pub reboot_at: TimeOfDay,
    /// Wait after issuing the reboot before polling, in seconds.
    pub boot_settle_secs: u64,
    /// Interval between reappearance polls, in seconds.
    pub reappear_poll_secs: u64,
    /// Give up waiting for the device after this many seconds.
    pub reappear_timeout_secs: u64,
    /// Initialization attempts after a reboot.
    pub init_attempts: u32,
    /// Pause between initialization attempts, in seconds.
    pub init_retry_secs: u64,
    /// Pauses inside the initialization sequence, in seconds.
    pub init_settle_secs: u64,
    /// How often the scheduler loop looks for due tasks, in seconds.
    pub tick_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_mins: 30,
            active_start: TimeOfDay::new(7, 0),
            active_end: TimeOfDay::new(22, 0),
            reboot_enabled: true,
            reboot_at: TimeOfDay::new(3, 0),
            boot_settle_secs: 60,
            reappear_poll_secs: 10,
            reappear_timeout_secs: 300,
            init_attempts: 3,
            init_retry_secs: 60,
            init_settle_secs: 10,
            tick_secs: 30,
        }
    }
}

/// MQTT bus settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Broker host name or address.
    pub broker: String,
    /// Broker port.
    pub port: u16,
    /// MQTT client identifier.
    pub client_id: String,
    /// Topic carrying `LOCK` / `UNLOCK`.
    pub set_topic: String,
    /// Topic the current state is published to.
    pub state_topic: String,
    /// Topic whose messages trigger an immediate status check.
    pub check_topic: String,
    /// Keep-alive interval, in seconds.
    pub keep_alive_secs: u64,
    /// Publish state (and the `OFFLINE` last will) as retained messages.
    pub retain_state: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_owned(),
            port: 1883,
            client_id: "doorlock-bridge".to_owned(),
            set_topic: "home/doorlock/set".to_owned(),
            state_topic: "home/doorlock/state".to_owned(),
            check_topic: "home/doorlock/check_status".to_owned(),
            keep_alive_secs: 60,
            retain_state: false,
        }
    }
}

/// Diagnostic screenshot settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Where screenshots go (None = [`crate::paths::screenshots_dir`]).
    pub screenshot_dir: Option<PathBuf>,
}

impl DiagnosticsConfig {
    /// Resolved screenshot directory.
    pub fn screenshot_dir(&self) -> PathBuf {
        self.screenshot_dir
            .clone()
            .unwrap_or_else(crate::paths::screenshots_dir)
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Log directory (None = [`crate::paths::logs_dir`]).
    pub directory: Option<PathBuf>,
    /// Number of rotated log files kept.
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            directory: None,
            max_files: 3,
        }
    }
}

impl DoorlockConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
            .map_err(|e| DoorlockError::Config(format!("{}: {e}", path.display())))
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| DoorlockError::Config(e.to_string()))
    }

    /// Resolve configuration for the daemon: explicit path, then
    /// `DOORLOCK_CONFIG`, then the default config file if it exists, then
    /// built-in defaults. Environment overrides are applied and the result is
    /// validated.
    ///
    /// # Errors
    ///
    /// Returns an error if a named file is unreadable or the result is invalid.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os("DOORLOCK_CONFIG").map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path)?,
            None => {
                let default_path = crate::paths::config_file();
                if default_path.is_file() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply deployment overrides using `lookup` to read variables.
    ///
    /// Recognised: `ADB_DEVICE`, `MQTT_BROKER`, `MQTT_PORT`, `MQTT_SET_TOPIC`,
    /// `MQTT_STATE_TOPIC`, `MQTT_CHECK_TOPIC`, `LOGGING_LEVEL`.
    ///
    /// # Errors
    ///
    /// Returns an error if `MQTT_PORT` is not a valid port number.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(serial) = lookup("ADB_DEVICE") {
            self.device.serial = serial;
        }
        if let Some(broker) = lookup("MQTT_BROKER") {
            self.bus.broker = broker;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.bus.port = port
                .trim()
                .parse()
                .map_err(|_| DoorlockError::Config(format!("invalid MQTT_PORT: {port}")))?;
        }
        if let Some(topic) = lookup("MQTT_SET_TOPIC") {
            self.bus.set_topic = topic;
        }
        if let Some(topic) = lookup("MQTT_STATE_TOPIC") {
            self.bus.state_topic = topic;
        }
        if let Some(topic) = lookup("MQTT_CHECK_TOPIC") {
            self.bus.check_topic = topic;
        }
        if let Some(level) = lookup("LOGGING_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`DoorlockError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(DoorlockError::Config(msg.to_owned()));

        if self.device.serial.trim().is_empty() {
            return fail("device.serial must not be empty");
        }
        if self.device.command_timeout_secs == 0 {
            return fail("device.command_timeout_secs must be at least 1");
        }
        if self.connection.max_attempts == 0 {
            return fail("connection.max_attempts must be at least 1");
        }
        if self.schedule.check_interval_mins == 0 {
            return fail("schedule.check_interval_mins must be at least 1");
        }
        if self.schedule.active_start == self.schedule.active_end {
            return fail("schedule.active_start and active_end must differ");
        }
        if self.schedule.reappear_poll_secs == 0 || self.schedule.tick_secs == 0 {
            return fail("schedule poll and tick intervals must be at least 1 second");
        }
        if self.schedule.init_attempts == 0 {
            return fail("schedule.init_attempts must be at least 1");
        }
        for (name, topic) in [
            ("bus.set_topic", &self.bus.set_topic),
            ("bus.state_topic", &self.bus.state_topic),
            ("bus.check_topic", &self.bus.check_topic),
        ] {
            if topic.trim().is_empty() {
                return Err(DoorlockError::Config(format!("{name} must not be empty")));
            }
        }
        for (a, b, message) in [
            (
                &self.bus.set_topic,
                &self.bus.state_topic,
                "bus.set_topic and bus.state_topic must differ",
            ),
            (
                &self.bus.check_topic,
                &self.bus.state_topic,
                "bus.check_topic and bus.state_topic must differ",
            ),
            (
                &self.bus.set_topic,
                &self.bus.check_topic,
                "bus.set_topic and bus.check_topic must differ",
            ),
        ] {
            if a == b {
                return fail(message);
            }
        }
        Ok(())
    }
}
