//! Screen precondition guard.
//!
//! Taps and screenshots are meaningless while the phone shows its keyguard or
//! has the display off, so every screen-touching operation first makes sure the
//! device is awake and unlocked.

use super::{Point, RemoteChannel};
use crate::config::ScreenConfig;
use crate::error::{DoorlockError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Wakes and unlocks the display before an operation runs.
pub struct ScreenGuard {
    channel: Arc<dyn RemoteChannel>,
    probe_command: String,
    locked_markers: Vec<String>,
    wake_keycode: String,
    wake_settle: Duration,
    swipe_from: Point,
    swipe_to: Point,
    swipe_settle: Duration,
}

impl ScreenGuard {
    /// Create a guard for `channel`.
    pub fn new(channel: Arc<dyn RemoteChannel>, config: &ScreenConfig) -> Self {
        Self {
            channel,
            probe_command: config.lock_probe_command.clone(),
            locked_markers: config.locked_markers.clone(),
            wake_keycode: config.wake_keycode.clone(),
            wake_settle: Duration::from_millis(config.wake_settle_ms),
            swipe_from: config.swipe_from,
            swipe_to: config.swipe_to,
            swipe_settle: Duration::from_millis(config.swipe_settle_ms),
        }
    }

    /// Returns `true` when the probe output shows the keyguard or a sleeping
    /// display.
    ///
    /// # Errors
    ///
    /// Propagates channel failures of the probe command.
    pub async fn is_locked(&self) -> Result<bool> {
        let output = self.channel.shell(&self.probe_command).await?;
        let locked = self
            .locked_markers
            .iter()
            .any(|marker| output.stdout.contains(marker.as_str()));
        debug!(locked, "screen lock probe");
        Ok(locked)
    }

    /// Swipe up over the keyguard and wait for the unlock animation.
    ///
    /// # Errors
    ///
    /// Propagates channel failures of the swipe.
    pub async fn swipe_unlock(&self) -> Result<()> {
        self.channel.swipe(self.swipe_from, self.swipe_to).await?;
        tokio::time::sleep(self.swipe_settle).await;
        Ok(())
    }

    /// Make sure the display is on and unlocked: wake key first, swipe second.
    ///
    /// # Errors
    ///
    /// Returns [`DoorlockError::Precondition`] if the device is still locked
    /// after both attempts.
    pub async fn ensure_awake(&self) -> Result<()> {
        if !self.is_locked().await? {
            return Ok(());
        }

        info!(keycode = %self.wake_keycode, "screen locked or asleep, sending wake key");
        self.channel.key_event(&self.wake_keycode).await?;
        tokio::time::sleep(self.wake_settle).await;
        if !self.is_locked().await? {
            return Ok(());
        }

        info!("screen still locked, swiping up");
        self.swipe_unlock().await?;
        if !self.is_locked().await? {
            info!("screen unlocked");
            return Ok(());
        }

        warn!("screen still locked after wake key and swipe");
        Err(DoorlockError::Precondition(
            "device still locked after wake key and swipe".to_owned(),
        ))
    }

    /// Run `op` only once the screen is awake and unlocked.
    ///
    /// # Errors
    ///
    /// Returns the precondition failure without running `op`, or the error
    /// of `op`.
    pub async fn with_screen_awake<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_awake().await?;
        op().await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::device::ShellOutput;
    use crate::testing::ScriptedChannel;

    const PROBE: &str = "dumpsys window";

    fn guard(channel: &Arc<ScriptedChannel>) -> ScreenGuard {
        let channel: Arc<dyn RemoteChannel> = channel.clone();
        ScreenGuard::new(channel, &ScreenConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn awake_screen_needs_no_input() {
        let channel = Arc::new(ScriptedChannel::new("dev"));
        channel.respond(PROBE, ShellOutput::ok("mAwake=true\nmDreamingLockscreen=false"));

        guard(&channel).ensure_awake().await.unwrap();

        assert_eq!(channel.count_shell(PROBE), 1);
        assert_eq!(channel.count_shell("input"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wake_key_is_enough_for_a_sleeping_display() {
        let channel = Arc::new(ScriptedChannel::new("dev"));
        channel.respond_seq(
            PROBE,
            vec![
                ShellOutput::ok("mAwake=false"),
                ShellOutput::ok("mAwake=true"),
            ],
        );

        guard(&channel).ensure_awake().await.unwrap();

        assert_eq!(channel.count_shell("input keyevent KEYCODE_WAKEUP"), 1);
        assert_eq!(channel.count_shell("input swipe"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keyguard_falls_back_to_swipe() {
        let channel = Arc::new(ScriptedChannel::new("dev"));
        channel.respond_seq(
            PROBE,
            vec![
                ShellOutput::ok("mDreamingLockscreen=true"),
                ShellOutput::ok("mDreamingLockscreen=true"),
                ShellOutput::ok("mDreamingLockscreen=false"),
            ],
        );

        guard(&channel).ensure_awake().await.unwrap();

        assert_eq!(channel.count_shell("input swipe 540 1800 540 800"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_keyguard_fails_and_skips_op() {
        let channel = Arc::new(ScriptedChannel::new("dev"));
        channel.respond(PROBE, ShellOutput::ok("isStatusBarKeyguard=true"));

        let mut ran = false;
        let err = guard(&channel)
            .with_screen_awake(|| {
                ran = true;
                async { Ok(()) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DoorlockError::Precondition(_)));
        assert!(!ran);
        assert_eq!(channel.count_shell(PROBE), 3);
    }
}
