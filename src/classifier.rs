//! Visual lock-state classification.
//!
//! The companion app shows a colored indicator whose hue reflects the lock
//! state. [`ColorProfile::classify`] is the pure matching step; [`Classifier`]
//! wraps it with the wake tap and screenshot needed to obtain a sample.

use crate::device::{Device, Point};
use crate::error::{DoorlockError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Observed state of the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockState {
    /// Indicator shows the door locked.
    Locked,
    /// Indicator shows the door unlocked.
    Unlocked,
    /// The app reports the lock hardware as not paired or out of range.
    Unlinked,
    /// No reference color matched.
    Unknown,
}

impl LockState {
    /// Lowercase label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
            Self::Unlinked => "unlinked",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An RGB color; serialized as `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// Construct a color from its channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Returns `true` when every channel differs from `reference` by at most
    /// `tolerance`.
    pub fn within(self, reference: Self, tolerance: u8) -> bool {
        self.r.abs_diff(reference.r) <= tolerance
            && self.g.abs_diff(reference.g) <= tolerance
            && self.b.abs_diff(reference.b) <= tolerance
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Self { r, g, b }
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(c: Rgb) -> Self {
        [c.r, c.g, c.b]
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.r, self.g, self.b)
    }
}

/// Reference colors and the shared tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorProfile {
    unlocked: Rgb,
    locked: Rgb,
    unlinked: Rgb,
    tolerance: u8,
}

impl ColorProfile {
    /// Create a profile.
    pub fn new(unlocked: Rgb, locked: Rgb, unlinked: Rgb, tolerance: u8) -> Self {
        Self {
            unlocked,
            locked,
            unlinked,
            tolerance,
        }
    }

    /// Map a sample to a state. Unlocked is checked first, then Locked, then
    /// Unlinked; the first reference within tolerance wins.
    pub fn classify(&self, sample: Rgb) -> LockState {
        let ordered = [
            (LockState::Unlocked, self.unlocked),
            (LockState::Locked, self.locked),
            (LockState::Unlinked, self.unlinked),
        ];
        ordered
            .into_iter()
            .find(|(_, reference)| sample.within(*reference, self.tolerance))
            .map_or(LockState::Unknown, |(state, _)| state)
    }
}

/// Read the pixel at `point` from PNG bytes.
///
/// # Errors
///
/// Returns [`DoorlockError::Capture`] if the image cannot be decoded or does
/// not contain `point`.
pub fn sample_pixel(png: &[u8], point: Point) -> Result<Rgb> {
    let image = image::load_from_memory(png)
        .map_err(|e| DoorlockError::Capture(format!("cannot decode screenshot: {e}")))?
        .to_rgb8();
    if point.x >= image.width() || point.y >= image.height() {
        return Err(DoorlockError::Capture(format!(
            "sample point {point} outside {}x{} screenshot",
            image.width(),
            image.height()
        )));
    }
    let [r, g, b] = image.get_pixel(point.x, point.y).0;
    Ok(Rgb::new(r, g, b))
}

/// Produces a fresh [`LockState`] from the device screen.
pub struct Classifier {
    device: Arc<Device>,
    profile: ColorProfile,
    wake_tap: Point,
    wake_settle: Duration,
    sample_point: Point,
}

impl Classifier {
    /// Create a classifier sampling `sample_point` after tapping `wake_tap`.
    pub fn new(
        device: Arc<Device>,
        profile: ColorProfile,
        wake_tap: Point,
        wake_settle: Duration,
        sample_point: Point,
    ) -> Self {
        Self {
            device,
            profile,
            wake_tap,
            wake_settle,
            sample_point,
        }
    }

    /// Tap away the app's idle overlay and wait for it to settle.
    ///
    /// # Errors
    ///
    /// Propagates guard and channel failures.
    pub async fn dismiss_idle_overlay(&self) -> Result<()> {
        let device = &self.device;
        let point = self.wake_tap;
        device
            .guarded(|| async move { device.channel().tap(point).await })
            .await?;
        tokio::time::sleep(self.wake_settle).await;
        Ok(())
    }

    /// Classify the current lock state from a fresh screenshot.
    ///
    /// # Errors
    ///
    /// Returns channel-level failures; an unmatched color is
    /// [`LockState::Unknown`], not an error.
    pub async fn classify(&self) -> Result<LockState> {
        self.dismiss_idle_overlay().await?;

        let device = &self.device;
        let png = device
            .guarded(|| async move { device.channel().capture_screen().await })
            .await?;
        let sample = sample_pixel(&png, self.sample_point)?;
        let state = self.profile.classify(sample);

        match state {
            LockState::Unknown => warn!(%sample, point = %self.sample_point, "no reference color matched"),
            LockState::Unlinked => warn!(%sample, "indicator shows the lock as unlinked"),
            _ => info!(%sample, %state, "classified lock state"),
        }
        Ok(state)
    }
}
