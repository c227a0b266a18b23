//! Scheduled task definitions.
//!
//! Defines the [`ScheduledTask`] type, the [`Schedule`] enum for timing, and
//! the [`ActiveWindow`] that gates the periodic status check. All times are
//! local wall-clock time; the bridge runs next to the door, not in UTC.

use chrono::{Duration as ChronoDuration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task ID of the periodic status check.
pub const TASK_STATUS_CHECK: &str = "status_check";

/// Task ID of the daily reboot-and-reinitialize.
pub const TASK_DAILY_REBOOT: &str = "daily_reboot";

/// A local time of day with minute resolution, written `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// Construct a time of day. Out-of-range values are clamped.
    pub const fn new(hour: u8, minute: u8) -> Self {
        Self {
            hour: if hour > 23 { 23 } else { hour },
            minute: if minute > 59 { 59 } else { minute },
        }
    }

    /// As a chrono time.
    pub fn naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let time = NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map_err(|e| format!("expected HH:MM, got {s:?}: {e}"))?;
        // Both fit in u8 after a successful parse.
        Ok(Self::new(time.hour() as u8, time.minute() as u8))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Daily window in which the periodic check is allowed to touch the device.
///
/// Both ends are inclusive to the second: a window ending `22:00` closes at
/// `22:00:00`. A window whose start is after its end wraps past midnight
/// (`22:00`-`06:00` covers the night).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    /// Opening time.
    pub start: TimeOfDay,
    /// Closing time.
    pub end: TimeOfDay,
}

impl ActiveWindow {
    /// Build a window.
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    /// Whether `time` falls inside the window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        let (start, end) = (self.start.naive(), self.end.naive());
        if start <= end {
            start <= time && time <= end
        } else {
            time >= start || time <= end
        }
    }
}

/// How often a task should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Run every N seconds.
    Interval {
        /// Interval in seconds between runs.
        secs: u64,
    },
    /// Run once daily at a given local time.
    Daily {
        /// Time of day.
        at: TimeOfDay,
    },
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval { secs } => {
                if *secs >= 3600 && secs % 3600 == 0 {
                    write!(f, "every {} hours", secs / 3600)
                } else {
                    write!(f, "every {} minutes", secs / 60)
                }
            }
            Self::Daily { at } => write!(f, "daily at {at}"),
        }
    }
}

/// Outcome of executing a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    /// Task completed with a summary message.
    Success(String),
    /// Task had nothing to do (e.g. outside the active window).
    Skipped(String),
    /// Task failed with an error message.
    Error(String),
}

/// A task that runs on a schedule.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    /// Unique task identifier (e.g. `"status_check"`).
    pub id: String,
    /// Human-readable task name.
    pub name: String,
    /// When to run this task.
    pub schedule: Schedule,
    /// Local time of the last run, or of registration.
    pub last_run: Option<NaiveDateTime>,
    /// Whether the task is enabled.
    pub enabled: bool,
}

impl ScheduledTask {
    /// Create a new enabled task that has never run.
    pub fn new(id: impl Into<String>, name: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            schedule,
            last_run: None,
            enabled: true,
        }
    }

    /// Treat `now` as the last run, so the first firing is one full period
    /// away (interval) or at the next occurrence of the time (daily).
    pub fn armed_at(mut self, now: NaiveDateTime) -> Self {
        self.last_run = Some(now);
        self
    }

    /// Returns `true` if the task is enabled and due at `now`.
    pub fn is_due_at(&self, now: NaiveDateTime) -> bool {
        if !self.enabled {
            return false;
        }

        match self.schedule {
            Schedule::Interval { secs } => match self.last_run {
                None => true,
                Some(last) => {
                    let secs = i64::try_from(secs).unwrap_or(i64::MAX);
                    now.signed_duration_since(last) >= ChronoDuration::seconds(secs)
                }
            },
            Schedule::Daily { at } => {
                let scheduled = now.date().and_time(at.naive());
                match self.last_run {
                    None => now >= scheduled,
                    Some(last) => last < scheduled && now >= scheduled,
                }
            }
        }
    }

    /// Record that the task ran at `now`.
    pub fn mark_run_at(&mut self, now: NaiveDateTime) {
        self.last_run = Some(now);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn time_of_day_parses_and_displays() {
        let tod: TimeOfDay = "07:05".parse().unwrap();
        assert_eq!(tod, TimeOfDay::new(7, 5));
        assert_eq!(tod.to_string(), "07:05");
        assert_eq!(tod.naive(), t(7, 5));
    }

    #[test]
    fn time_of_day_rejects_garbage() {
        assert!("25:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
        assert!("7".parse::<TimeOfDay>().is_err());
        assert!("07:05:30".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn window_is_inclusive_at_both_ends() {
        let window = ActiveWindow::new(TimeOfDay::new(7, 0), TimeOfDay::new(22, 0));
        assert!(window.contains(t(7, 0)));
        assert!(window.contains(t(12, 30)));
        assert!(window.contains(t(22, 0)));
        assert!(!window.contains(t(6, 59)));
        assert!(!window.contains(t(22, 1)));
        assert!(!window.contains(t(23, 30)));
    }

    #[test]
    fn window_closes_on_the_second() {
        let window = ActiveWindow::new(TimeOfDay::new(7, 0), TimeOfDay::new(22, 0));
        assert!(!window.contains(NaiveTime::from_hms_opt(22, 0, 1).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(22, 0, 59).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(21, 59, 59).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(6, 59, 59).unwrap()));
    }

    #[test]
    fn window_wraps_past_midnight() {
        let window = ActiveWindow::new(TimeOfDay::new(22, 0), TimeOfDay::new(6, 0));
        assert!(window.contains(t(23, 30)));
        assert!(window.contains(t(0, 0)));
        assert!(window.contains(t(6, 0)));
        assert!(!window.contains(t(12, 0)));
    }

    #[test]
    fn new_task_defaults() {
        let task = ScheduledTask::new("t", "Test Task", Schedule::Interval { secs: 60 });
        assert_eq!(task.id, "t");
        assert!(task.last_run.is_none());
        assert!(task.enabled);
    }

    #[test]
    fn armed_interval_task_waits_one_period() {
        let task = ScheduledTask::new("t", "T", Schedule::Interval { secs: 1800 })
            .armed_at(at(8, 0));
        assert!(!task.is_due_at(at(8, 29)));
        assert!(task.is_due_at(at(8, 30)));
    }

    #[test]
    fn unarmed_interval_task_is_due_immediately() {
        let task = ScheduledTask::new("t", "T", Schedule::Interval { secs: 60 });
        assert!(task.is_due_at(at(8, 0)));
    }

    #[test]
    fn disabled_task_is_never_due() {
        let mut task = ScheduledTask::new("t", "T", Schedule::Interval { secs: 0 });
        task.enabled = false;
        assert!(!task.is_due_at(at(8, 0)));
    }

    #[test]
    fn daily_task_fires_once_per_day() {
        let mut task = ScheduledTask::new(
            "t",
            "T",
            Schedule::Daily {
                at: TimeOfDay::new(3, 0),
            },
        )
        .armed_at(at(1, 0));
        assert!(!task.is_due_at(at(2, 59)));
        assert!(task.is_due_at(at(3, 0)));
        task.mark_run_at(at(3, 0));
        assert!(!task.is_due_at(at(3, 30)));
        assert!(!task.is_due_at(at(23, 59)));

        let next_day = at(3, 0) + ChronoDuration::days(1);
        assert!(task.is_due_at(next_day));
    }

    #[test]
    fn daily_task_registered_after_its_time_waits_for_tomorrow() {
        let task = ScheduledTask::new(
            "t",
            "T",
            Schedule::Daily {
                at: TimeOfDay::new(3, 0),
            },
        )
        .armed_at(at(10, 0));
        assert!(!task.is_due_at(at(23, 0)));
        assert!(task.is_due_at(at(3, 0) + ChronoDuration::days(1)));
    }

    #[test]
    fn schedule_display() {
        assert_eq!(Schedule::Interval { secs: 1800 }.to_string(), "every 30 minutes");
        assert_eq!(Schedule::Interval { secs: 7200 }.to_string(), "every 2 hours");
        assert_eq!(
            Schedule::Daily {
                at: TimeOfDay::new(3, 0)
            }
            .to_string(),
            "daily at 03:00"
        );
    }
}
