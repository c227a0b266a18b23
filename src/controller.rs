//! The door controller: one place that owns the device and serializes
//! everything that touches its screen.
//!
//! Bus commands and scheduled tasks both end up here. Each public operation
//! takes the controller lock for its whole duration, so a reconciliation can
//! never interleave with a status check or the daily reboot.

use crate::bus::{BusCommand, PublishedState, StatePublisher};
use crate::classifier::{Classifier, LockState};
use crate::config::{DoorlockConfig, ScheduleConfig};
use crate::device::{Device, RemoteChannel};
use crate::diagnostics::ScreenshotStore;
use crate::error::{DoorlockError, Result};
use crate::panel::DoorPanel;
use crate::reconciler::{LockAction, ReconcileReport, Reconciler};
use crate::scheduler::tasks::ActiveWindow;
use crate::supervisor::AppSupervisor;
use chrono::{Local, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Serialized access to the door lock.
pub struct DoorController {
    device: Arc<Device>,
    classifier: Arc<Classifier>,
    supervisor: AppSupervisor,
    reconciler: Reconciler,
    publisher: Arc<dyn StatePublisher>,
    window: ActiveWindow,
    schedule: ScheduleConfig,
    max_retries: u32,
    busy: Mutex<()>,
}

impl DoorController {
    /// Wire up the engine over `channel`, publishing through `publisher`.
    pub fn new(
        config: &DoorlockConfig,
        channel: Arc<dyn RemoteChannel>,
        publisher: Arc<dyn StatePublisher>,
    ) -> Self {
        let device = Arc::new(Device::new(channel, &config.connection, &config.screen));
        let classifier = Arc::new(Classifier::new(
            Arc::clone(&device),
            config.colors.profile(),
            config.panel.wake_tap,
            Duration::from_millis(config.panel.wake_settle_ms),
            config.panel.sample_point,
        ));
        let panel = DoorPanel::new(
            Arc::clone(&device),
            Arc::clone(&classifier),
            ScreenshotStore::new(config.diagnostics.screenshot_dir()),
            &config.panel,
        );
        Self {
            supervisor: AppSupervisor::new(Arc::clone(&device), &config.app),
            reconciler: Reconciler::new(Arc::new(panel), Arc::clone(&publisher)),
            device,
            classifier,
            publisher,
            window: ActiveWindow::new(config.schedule.active_start, config.schedule.active_end),
            schedule: config.schedule.clone(),
            max_retries: config.reconcile.max_retries,
            busy: Mutex::new(()),
        }
    }

    /// Dispatch a bus command.
    pub async fn handle(&self, command: BusCommand) {
        match command {
            BusCommand::Apply(action) => {
                self.apply(action).await;
            }
            BusCommand::Check => {
                self.check_status().await;
            }
        }
    }

    /// Drive the lock to `action`'s target state.
    pub async fn apply(&self, action: LockAction) -> ReconcileReport {
        let _busy = self.busy.lock().await;
        self.reconciler.reconcile(action, self.max_retries).await
    }

    /// Bring the app forward, classify, and publish the result.
    pub async fn check_status(&self) -> PublishedState {
        let _busy = self.busy.lock().await;
        self.check_status_locked().await
    }

    async fn check_status_locked(&self) -> PublishedState {
        let state = match self.observe().await {
            Ok(state) => {
                match state {
                    LockState::Unlinked => warn!("status check: lock unlinked"),
                    LockState::Unknown => warn!("status check: state could not be determined"),
                    _ => info!(%state, "status check"),
                }
                PublishedState::from(state)
            }
            Err(e) => {
                error!(error = %e, "status check failed");
                PublishedState::Error
            }
        };
        self.publish(state).await;
        state
    }

    async fn observe(&self) -> Result<LockState> {
        self.supervisor.ensure_foreground().await?;
        self.classifier.classify().await
    }

    /// Periodic status check at the current local time.
    pub async fn periodic_check(&self) -> Option<PublishedState> {
        self.periodic_check_at(Local::now().time()).await
    }

    /// Periodic status check as if the local time were `now`. Outside the
    /// active window nothing touches the device and nothing is published.
    pub async fn periodic_check_at(&self, now: NaiveTime) -> Option<PublishedState> {
        if !self.window.contains(now) {
            debug!(
                time = %now.format("%H:%M"),
                start = %self.window.start,
                end = %self.window.end,
                "outside active window, skipping status check"
            );
            return None;
        }
        Some(self.check_status().await)
    }

    /// Connection check, app foreground, display off.
    ///
    /// # Errors
    ///
    /// Returns connection or launch failures. A display that refuses to
    /// switch off is logged, not returned.
    pub async fn initialize(&self) -> Result<()> {
        let _busy = self.busy.lock().await;
        self.initialize_locked().await
    }

    async fn initialize_locked(&self) -> Result<()> {
        info!("initializing device");
        self.device.connection().ensure_connected().await?;
        self.settle().await;

        self.supervisor.ensure_foreground().await?;
        self.settle().await;

        match self.supervisor.turn_off_screen().await {
            Ok(true) => {}
            Ok(false) => warn!("display left on"),
            Err(e) => warn!(error = %e, "display off command failed"),
        }
        info!("device initialized");
        Ok(())
    }

    async fn settle(&self) {
        tokio::time::sleep(Duration::from_secs(self.schedule.init_settle_secs)).await;
    }

    /// Reboot the phone, wait for it to come back, and reinitialize with a
    /// bounded number of attempts.
    ///
    /// When every attempt fails the failure is logged as critical and a
    /// swipe unlock is still attempted so the phone stays operable.
    ///
    /// # Errors
    ///
    /// Returns the last initialization error once the attempts run out.
    pub async fn daily_reboot_and_initialize(&self) -> Result<()> {
        let _busy = self.busy.lock().await;

        info!("rebooting device");
        let device = &self.device;
        match device
            .connection()
            .guarded(|| async move { device.channel().reboot().await })
            .await
        {
            Ok(()) => {
                info!(
                    settle_secs = self.schedule.boot_settle_secs,
                    "reboot issued, waiting for the device to restart"
                );
                tokio::time::sleep(Duration::from_secs(self.schedule.boot_settle_secs)).await;
                if !self.wait_for_device().await {
                    error!(
                        timeout_secs = self.schedule.reappear_timeout_secs,
                        "device did not come back after reboot"
                    );
                }
            }
            Err(e) => error!(error = %e, "reboot failed"),
        }

        let attempts = self.schedule.init_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.initialize_locked().await {
                Ok(()) => {
                    info!(attempt, "daily reboot and initialization complete");
                    return Ok(());
                }
                Err(e) => {
                    error!(attempt, remaining = attempts - attempt, error = %e, "initialization failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_secs(self.schedule.init_retry_secs))
                            .await;
                    }
                }
            }
        }

        error!(
            critical = true,
            attempts, "initialization after daily reboot failed, manual check required"
        );
        if let Err(e) = self.device.screen().swipe_unlock().await {
            error!(error = %e, "could not unlock the device screen");
        }
        Err(last_error.unwrap_or(DoorlockError::Connection { attempts }))
    }

    /// Poll the link until it answers or the reappearance timeout passes.
    async fn wait_for_device(&self) -> bool {
        let timeout = Duration::from_secs(self.schedule.reappear_timeout_secs);
        let poll = Duration::from_secs(self.schedule.reappear_poll_secs);
        let started = Instant::now();

        while started.elapsed() < timeout {
            if self.device_online().await {
                info!(
                    after_secs = started.elapsed().as_secs(),
                    "device back after reboot"
                );
                return true;
            }
            tokio::time::sleep(poll).await;
        }
        false
    }

    async fn device_online(&self) -> bool {
        if !self.device.connection().probe().await {
            return false;
        }
        let serial = self.device.channel().serial();
        match self.device.channel().list_devices().await {
            Ok(devices) => devices
                .iter()
                .any(|d| d.serial == serial && d.is_online()),
            Err(e) => {
                debug!(error = %e, "device listing failed");
                false
            }
        }
    }

    /// Wait for any running operation, then publish `OFFLINE`.
    pub async fn shutdown(&self) {
        let _busy = self.busy.lock().await;
        info!("controller shutting down");
        self.publish(PublishedState::Offline).await;
    }

    async fn publish(&self, state: PublishedState) {
        if let Err(e) = self.publisher.publish(state).await {
            error!(%state, error = %e, "failed to publish state");
        }
    }
}

/// Feed bus commands to the controller one at a time until cancelled or the
/// sending side closes.
pub fn run_command_worker(
    controller: Arc<DoorController>,
    mut commands: mpsc::Receiver<BusCommand>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("command worker started");
        loop {
            let command = tokio::select! {
                () = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            debug!(?command, "handling bus command");
            controller.handle(command).await;
        }
        info!("command worker stopped");
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::classifier::Rgb;
    use crate::device::ShellOutput;
    use crate::testing::{RecordingPublisher, ScriptedChannel, solid_png};

    struct Rig {
        channel: Arc<ScriptedChannel>,
        publisher: Arc<RecordingPublisher>,
        controller: Arc<DoorController>,
        _dir: tempfile::TempDir,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DoorlockConfig::default();
        config.diagnostics.screenshot_dir = Some(dir.path().to_path_buf());
        let channel = Arc::new(ScriptedChannel::new("127.0.0.1:5555"));
        channel.respond(
            "mResumedActivity",
            ShellOutput::ok("mResumedActivity: ActivityRecord{1 u0 com.alpha.lockapp/.MainActivity}"),
        );
        let publisher = Arc::new(RecordingPublisher::new());
        let raw: Arc<dyn RemoteChannel> = channel.clone();
        let controller = Arc::new(DoorController::new(&config, raw, publisher.clone()));
        Rig {
            channel,
            publisher,
            controller,
            _dir: dir,
        }
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_check_outside_window_is_silent() {
        let rig = rig();

        assert_eq!(rig.controller.periodic_check_at(at(23, 30)).await, None);

        assert!(rig.channel.calls().is_empty());
        assert!(rig.publisher.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_check_inside_window_publishes() {
        let rig = rig();
        rig.channel
            .set_screens(vec![solid_png(200, 400, Rgb::new(194, 23, 45))]);

        let state = rig.controller.periodic_check_at(at(12, 0)).await;

        assert_eq!(state, Some(PublishedState::Unlocked));
        assert_eq!(rig.publisher.published(), vec![PublishedState::Unlocked]);
    }

    #[tokio::test(start_paused = true)]
    async fn check_status_reports_errors_as_error_state() {
        let rig = rig();
        rig.channel.break_capture();

        assert_eq!(rig.controller.check_status().await, PublishedState::Error);
        assert_eq!(rig.publisher.published(), vec![PublishedState::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_turns_display_off() {
        let rig = rig();
        rig.channel
            .respond("DisplayToggle", ShellOutput::ok("Display mode: 0"));

        rig.controller.initialize().await.unwrap();

        assert_eq!(rig.channel.count_shell("DisplayToggle"), 1);
        assert_eq!(rig.channel.count_shell("am start"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_fails_without_a_link() {
        let rig = rig();
        rig.channel.fail_connects(usize::MAX);

        let err = rig.controller.initialize().await.unwrap_err();
        assert!(matches!(err, DoorlockError::Connection { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_publishes_offline() {
        let rig = rig();
        rig.controller.shutdown().await;
        assert_eq!(rig.publisher.published(), vec![PublishedState::Offline]);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_runs_commands_until_cancelled() {
        let rig = rig();
        rig.channel
            .set_screens(vec![solid_png(200, 400, Rgb::new(0, 168, 135))]);
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let worker = run_command_worker(Arc::clone(&rig.controller), rx, cancel.clone());

        tx.send(BusCommand::Apply(LockAction::Lock)).await.unwrap();
        tx.send(BusCommand::Check).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        assert_eq!(
            rig.publisher.published(),
            vec![PublishedState::Locked, PublishedState::Locked]
        );
        assert!(!cancel.is_cancelled());
    }
}
