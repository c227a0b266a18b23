//! Doorlock bridge: drives a smart door lock through its Android companion app.
//!
//! The lock has no API of its own. The companion app runs on a dedicated phone
//! reachable over adb, so every command is a tap at fixed coordinates and every
//! observation is a pixel sampled from a fresh screenshot.
//!
//! # Architecture
//!
//! - **Device** ([`device`]): the adb channel plus the connection and screen
//!   guards every screen-touching operation runs inside.
//! - **Classifier** ([`classifier`]): maps one sampled pixel to a [`LockState`].
//! - **Reconciler** ([`reconciler`]): bounded tap/verify/retry loop over the
//!   lock panel ([`panel`]), with screenshots kept by [`diagnostics`].
//! - **Supervisor** ([`supervisor`]): keeps the companion app in the foreground.
//! - **Scheduler** ([`scheduler`]): periodic checks and the daily reboot.
//! - **Controller** ([`controller`]): the single serialization point shared by
//!   bus commands and scheduled work.
//! - **Bus** ([`bus`]): MQTT command intake and state publication.

pub mod bus;
pub mod classifier;
pub mod config;
pub mod controller;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod panel;
pub mod paths;
pub mod reconciler;
pub mod scheduler;
pub mod supervisor;
pub mod testing;

pub use bus::{BusCommand, PublishedState, StatePublisher};
pub use classifier::{ColorProfile, LockState, Rgb};
pub use config::DoorlockConfig;
pub use controller::DoorController;
pub use error::{DoorlockError, Result};
pub use reconciler::{LockAction, ReconcileReport, Resolution};
