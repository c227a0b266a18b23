//! In-memory stand-ins for the device channel and the state bus.
//!
//! Used by unit tests, the integration tests under `tests/`, and anyone
//! exercising the engine without a phone attached.

use crate::bus::{PublishedState, StatePublisher};
use crate::classifier::Rgb;
use crate::device::{AttachedDevice, RemoteChannel, ShellOutput};
use crate::error::{DoorlockError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Encode a `width`×`height` PNG filled with `color`.
pub fn solid_png(width: u32, height: u32, color: Rgb) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([color.r, color.g, color.b]));
    let mut buf = Vec::new();
    match image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
    {
        Ok(()) => buf,
        Err(_) => Vec::new(),
    }
}

/// A queue of scripted values; the last one repeats once the queue drains.
#[derive(Debug, Default)]
struct Script<T: Clone> {
    queue: VecDeque<T>,
}

impl<T: Clone> Script<T> {
    fn new(values: Vec<T>) -> Self {
        Self {
            queue: values.into(),
        }
    }

    fn next(&mut self) -> Option<T> {
        if self.queue.len() > 1 {
            self.queue.pop_front()
        } else {
            self.queue.front().cloned()
        }
    }
}

#[derive(Default)]
struct ChannelState {
    calls: Vec<String>,
    connect_failures: usize,
    responses: Vec<(String, Script<ShellOutput>)>,
    broken: Vec<String>,
    screens: Script<Vec<u8>>,
    capture_broken: bool,
    reboot_broken: bool,
    devices: Option<Vec<AttachedDevice>>,
}

/// A [`RemoteChannel`] that records every call and answers from a script.
///
/// Unscripted shell commands succeed with empty output, so the screen guard
/// sees an awake, unlocked phone unless told otherwise. Shell commands and
/// captures yield to the runtime first, as a real transport would, so
/// concurrent callers interleave unless something serializes them. Call names recorded by
/// [`calls`](Self::calls): `connect`, `devices`, `shell:<command>`,
/// `screencap`, `reboot`.
#[derive(Default)]
pub struct ScriptedChannel {
    serial: String,
    state: Mutex<ChannelState>,
}

impl ScriptedChannel {
    /// A healthy channel for `serial`.
    pub fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_owned(),
            state: Mutex::new(ChannelState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `n` connection probes report a down link.
    pub fn fail_connects(&self, n: usize) {
        self.lock().connect_failures = n;
    }

    /// Answer shell commands containing `pattern` with `output`.
    pub fn respond(&self, pattern: &str, output: ShellOutput) {
        self.respond_seq(pattern, vec![output]);
    }

    /// Answer successive shell commands containing `pattern` with `outputs`
    /// in order, repeating the last one.
    pub fn respond_seq(&self, pattern: &str, outputs: Vec<ShellOutput>) {
        let mut state = self.lock();
        state.responses.retain(|(p, _)| p != pattern);
        state
            .responses
            .push((pattern.to_owned(), Script::new(outputs)));
    }

    /// Make shell commands containing `pattern` fail at the transport level.
    pub fn break_shell(&self, pattern: &str) {
        self.lock().broken.push(pattern.to_owned());
    }

    /// Screens returned by successive captures, repeating the last one.
    pub fn set_screens(&self, screens: Vec<Vec<u8>>) {
        self.lock().screens = Script::new(screens);
    }

    /// Make screen captures fail.
    pub fn break_capture(&self) {
        self.lock().capture_broken = true;
    }

    /// Make reboot commands fail.
    pub fn break_reboot(&self) {
        self.lock().reboot_broken = true;
    }

    /// Override the `adb devices` listing (default: this serial, online).
    pub fn set_devices(&self, devices: Vec<AttachedDevice>) {
        self.lock().devices = Some(devices);
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Shell commands run so far.
    pub fn shell_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("shell:").map(str::to_owned))
            .collect()
    }

    /// Number of calls named exactly `name`.
    pub fn count(&self, name: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == name).count()
    }

    /// Number of shell commands containing `pattern`.
    pub fn count_shell(&self, pattern: &str) -> usize {
        self.shell_calls()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

#[async_trait]
impl RemoteChannel for ScriptedChannel {
    fn serial(&self) -> &str {
        &self.serial
    }

    async fn connect(&self) -> Result<bool> {
        let mut state = self.lock();
        state.calls.push("connect".to_owned());
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    async fn list_devices(&self) -> Result<Vec<AttachedDevice>> {
        let mut state = self.lock();
        state.calls.push("devices".to_owned());
        Ok(state.devices.clone().unwrap_or_else(|| {
            vec![AttachedDevice {
                serial: self.serial.clone(),
                state: "device".to_owned(),
            }]
        }))
    }

    async fn shell(&self, command: &str) -> Result<ShellOutput> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.calls.push(format!("shell:{command}"));
        if state.broken.iter().any(|p| command.contains(p.as_str())) {
            return Err(DoorlockError::Command {
                command: command.to_owned(),
                detail: "device offline".to_owned(),
            });
        }
        let scripted = state
            .responses
            .iter_mut()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .and_then(|(_, script)| script.next());
        Ok(scripted.unwrap_or_else(|| ShellOutput::ok("")))
    }

    async fn capture_screen(&self) -> Result<Vec<u8>> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        state.calls.push("screencap".to_owned());
        if state.capture_broken {
            return Err(DoorlockError::Command {
                command: "exec-out screencap -p".to_owned(),
                detail: "device offline".to_owned(),
            });
        }
        state
            .screens
            .next()
            .ok_or_else(|| DoorlockError::Capture("no screen scripted".to_owned()))
    }

    async fn reboot(&self) -> Result<()> {
        let mut state = self.lock();
        state.calls.push("reboot".to_owned());
        if state.reboot_broken {
            return Err(DoorlockError::Command {
                command: "reboot".to_owned(),
                detail: "device offline".to_owned(),
            });
        }
        Ok(())
    }
}

/// A [`StatePublisher`] that keeps every published state in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PublishedState>>,
}

impl RecordingPublisher {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// States published so far, oldest first.
    pub fn published(&self) -> Vec<PublishedState> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl StatePublisher for RecordingPublisher {
    async fn publish(&self, state: PublishedState) -> Result<()> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(state);
        Ok(())
    }
}
