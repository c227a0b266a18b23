//! Filesystem locations used by the bridge.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | Linux default |
//! |---------|---------------|
//! | Data (logs, screenshots) | `~/.local/share/doorlock/` |
//! | Config | `~/.config/doorlock/` |
//!
//! # Environment Overrides
//!
//! - `DOORLOCK_DATA_DIR` overrides [`data_dir`]
//! - `DOORLOCK_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Resolves to `dirs::data_dir()/doorlock/` by default.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("DOORLOCK_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("doorlock"))
        .unwrap_or_else(|| PathBuf::from("/tmp/doorlock-data"))
}

/// Application config directory.
///
/// Resolves to `dirs::config_dir()/doorlock/` by default.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("DOORLOCK_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("doorlock"))
        .unwrap_or_else(|| PathBuf::from("/tmp/doorlock-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Diagnostic screenshot directory (`data_dir()/errshot/`).
#[must_use]
pub fn screenshots_dir() -> PathBuf {
    data_dir().join("errshot")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
