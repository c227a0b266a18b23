//! The companion app's lock panel as a [`LockSurface`].

use crate::classifier::{Classifier, LockState};
use crate::config::PanelConfig;
use crate::device::{Device, Point};
use crate::diagnostics::{DiagnosticTag, ScreenshotStore};
use crate::error::Result;
use crate::reconciler::{LockAction, LockSurface};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Lock and unlock buttons plus the state indicator, driven over a [`Device`].
pub struct DoorPanel {
    device: Arc<Device>,
    classifier: Arc<Classifier>,
    screenshots: ScreenshotStore,
    lock_tap: Point,
    unlock_tap: Point,
    press_settle: Duration,
}

impl DoorPanel {
    /// Build a panel from its layout.
    pub fn new(
        device: Arc<Device>,
        classifier: Arc<Classifier>,
        screenshots: ScreenshotStore,
        config: &PanelConfig,
    ) -> Self {
        Self {
            device,
            classifier,
            screenshots,
            lock_tap: config.lock_tap,
            unlock_tap: config.unlock_tap,
            press_settle: Duration::from_millis(config.press_settle_ms),
        }
    }

    fn button(&self, action: LockAction) -> Point {
        match action {
            LockAction::Lock => self.lock_tap,
            LockAction::Unlock => self.unlock_tap,
        }
    }
}

#[async_trait]
impl LockSurface for DoorPanel {
    async fn press(&self, action: LockAction) -> Result<()> {
        self.classifier.dismiss_idle_overlay().await?;

        let button = self.button(action);
        debug!(%action, at = %button, "pressing lock panel button");
        let device = &self.device;
        device
            .guarded(|| async move { device.channel().tap(button).await })
            .await?;
        tokio::time::sleep(self.press_settle).await;
        Ok(())
    }

    async fn observe(&self) -> Result<LockState> {
        self.classifier.classify().await
    }

    async fn capture_diagnostic(
        &self,
        action: LockAction,
        tag: DiagnosticTag,
        attempt: u32,
    ) -> Result<PathBuf> {
        self.screenshots
            .capture(&self.device, action.as_str(), tag, attempt)
            .await
    }
}
