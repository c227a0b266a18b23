//! Background task scheduler.
//!
//! Runs the periodic status check and the daily reboot-and-reinitialize.

pub mod runner;
pub mod tasks;

pub use runner::Scheduler;
pub use tasks::{ActiveWindow, Schedule, ScheduledTask, TaskResult, TimeOfDay};
