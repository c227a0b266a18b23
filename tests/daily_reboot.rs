//! Daily reboot-and-reinitialize over the scripted channel.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use doorlock::DoorlockConfig;
use doorlock::controller::DoorController;
use doorlock::device::{AttachedDevice, RemoteChannel, ShellOutput};
use doorlock::testing::{RecordingPublisher, ScriptedChannel};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const SERIAL: &str = "127.0.0.1:5555";

fn controller(channel: &Arc<ScriptedChannel>) -> (DoorController, Arc<RecordingPublisher>) {
    let dir = std::env::temp_dir().join("doorlock-daily-reboot-tests");
    let mut config = DoorlockConfig::default();
    config.diagnostics.screenshot_dir = Some(dir);
    let publisher = Arc::new(RecordingPublisher::new());
    let raw: Arc<dyn RemoteChannel> = channel.clone();
    (DoorController::new(&config, raw, publisher.clone()), publisher)
}

fn healthy_channel() -> Arc<ScriptedChannel> {
    let channel = Arc::new(ScriptedChannel::new(SERIAL));
    channel.respond(
        "mResumedActivity",
        ShellOutput::ok("mResumedActivity: ActivityRecord{1 u0 com.alpha.lockapp/.MainActivity}"),
    );
    channel.respond("DisplayToggle", ShellOutput::ok("Display mode: 0"));
    channel
}

#[tokio::test(start_paused = true)]
async fn reboot_waits_for_device_then_initializes() {
    let channel = healthy_channel();
    let (controller, publisher) = controller(&channel);
    let started = Instant::now();

    controller.daily_reboot_and_initialize().await.unwrap();

    assert_eq!(channel.count("reboot"), 1);
    assert_eq!(channel.count_shell("DisplayToggle"), 1);
    // Boot settle plus the two settles inside initialization.
    assert!(started.elapsed() >= Duration::from_secs(60 + 2 * 10));
    assert!(publisher.published().is_empty());

    let calls = channel.calls();
    let reboot = calls.iter().position(|c| c == "reboot").unwrap();
    let listed = calls.iter().position(|c| c == "devices").unwrap();
    assert!(reboot < listed);
}

#[tokio::test(start_paused = true)]
async fn slow_device_is_polled_until_listed() {
    let channel = healthy_channel();
    channel.set_devices(vec![AttachedDevice {
        serial: SERIAL.to_owned(),
        state: "offline".to_owned(),
    }]);
    let (controller, _) = controller(&channel);

    let flip = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move {
            // Boot settle is 60 s; come back on the third poll.
            tokio::time::sleep(Duration::from_secs(60 + 25)).await;
            channel.set_devices(vec![AttachedDevice {
                serial: SERIAL.to_owned(),
                state: "device".to_owned(),
            }]);
        })
    };

    controller.daily_reboot_and_initialize().await.unwrap();
    flip.await.unwrap();

    assert!(channel.count("devices") >= 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_initialization_still_unlocks_screen() {
    let channel = healthy_channel();
    channel.fail_connects(usize::MAX);
    let (controller, _) = controller(&channel);
    let started = Instant::now();

    let err = controller.daily_reboot_and_initialize().await.unwrap_err();

    assert!(matches!(err, doorlock::DoorlockError::Connection { .. }));
    assert_eq!(channel.count("reboot"), 0);
    // Reboot guard plus three initialization attempts, 20 probes each.
    assert_eq!(channel.count("connect"), 4 * 20);
    assert!(started.elapsed() >= Duration::from_secs(2 * 60));
    assert_eq!(channel.count_shell("input swipe 540 1800 540 800"), 1);
}

#[tokio::test(start_paused = true)]
async fn device_that_never_returns_times_out_and_init_is_still_attempted() {
    let channel = healthy_channel();
    channel.set_devices(Vec::new());
    let (controller, _) = controller(&channel);
    let started = Instant::now();

    controller.daily_reboot_and_initialize().await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(60 + 300));
    assert_eq!(channel.count_shell("DisplayToggle"), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_reboot_skips_the_wait_and_still_initializes() {
    let channel = healthy_channel();
    channel.break_reboot();
    let (controller, publisher) = controller(&channel);
    let started = Instant::now();

    controller.daily_reboot_and_initialize().await.unwrap();

    assert_eq!(channel.count("reboot"), 1);
    assert_eq!(channel.count("devices"), 0);
    assert_eq!(channel.count_shell("DisplayToggle"), 1);
    // Only the two initialization settles; no boot settle.
    assert!(started.elapsed() < Duration::from_secs(60));
    assert!(publisher.published().is_empty());
}
