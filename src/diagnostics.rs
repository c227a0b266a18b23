//! Diagnostic screenshots for post-hoc debugging.
//!
//! Written on every reconciliation retry and terminal failure. Files are named
//! `[@retry_]<action>_<YYYYmmddHHMMSS>_<attempt>.png` in the screenshot
//! directory; nothing in the bridge ever reads them back.

use crate::device::Device;
use crate::error::Result;
use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Why a screenshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticTag {
    /// The observed state did not match and the command will be retried.
    Retry,
    /// The command ended without reaching the desired state.
    Failure,
}

impl fmt::Display for DiagnosticTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Retry => "retry",
            Self::Failure => "failure",
        })
    }
}

/// Build the file name for a screenshot.
pub fn screenshot_filename(
    action: &str,
    tag: DiagnosticTag,
    attempt: u32,
    at: DateTime<Local>,
) -> String {
    let marker = match tag {
        DiagnosticTag::Retry => "@retry_",
        DiagnosticTag::Failure => "",
    };
    format!("{marker}{action}_{}_{attempt}.png", at.format("%Y%m%d%H%M%S"))
}

/// Writes screenshots into one directory.
#[derive(Debug, Clone)]
pub struct ScreenshotStore {
    dir: PathBuf,
}

impl ScreenshotStore {
    /// Store screenshots under `dir` (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `png` and return its path.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory or file cannot be written.
    pub async fn save(
        &self,
        png: &[u8],
        action: &str,
        tag: DiagnosticTag,
        attempt: u32,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self
            .dir
            .join(screenshot_filename(action, tag, attempt, Local::now()));
        tokio::fs::write(&path, png).await?;
        info!(path = %path.display(), %tag, "saved diagnostic screenshot");
        Ok(path)
    }

    /// Capture the current screen from `device` and persist it.
    ///
    /// Only the connection guard applies: a locked screen is itself worth
    /// recording.
    ///
    /// # Errors
    ///
    /// Returns channel failures of the capture or I/O errors of the write.
    pub async fn capture(
        &self,
        device: &Device,
        action: &str,
        tag: DiagnosticTag,
        attempt: u32,
    ) -> Result<PathBuf> {
        let png = device
            .connection()
            .guarded(|| async move { device.channel().capture_screen().await })
            .await?;
        self.save(&png, action, tag, attempt).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).single().unwrap()
    }

    #[test]
    fn retry_screenshots_carry_marker() {
        assert_eq!(
            screenshot_filename("unlock", DiagnosticTag::Retry, 1, at()),
            "@retry_unlock_20240506070809_1.png"
        );
    }

    #[test]
    fn failure_screenshots_have_no_marker() {
        assert_eq!(
            screenshot_filename("lock", DiagnosticTag::Failure, 3, at()),
            "lock_20240506070809_3.png"
        );
    }

    #[tokio::test]
    async fn save_creates_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenshotStore::new(dir.path().join("errshot"));
        let path = store
            .save(b"png-bytes", "unlock", DiagnosticTag::Failure, 1)
            .await
            .unwrap();
        assert!(path.starts_with(store.dir()));
        assert_eq!(std::fs::read(&path).unwrap(), b"png-bytes");
    }
}
