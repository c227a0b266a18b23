//! Scheduler background loop.
//!
//! Spawns a tokio task that periodically checks for due tasks and runs them
//! against the [`DoorController`]. Tasks run inline on the scheduler task, one
//! at a time; the controller lock serializes them with bus commands.

use crate::config::ScheduleConfig;
use crate::controller::DoorController;
use crate::scheduler::tasks::{
    Schedule, ScheduledTask, TASK_DAILY_REBOOT, TASK_STATUS_CHECK, TaskResult,
};
use chrono::{Local, NaiveDateTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Background scheduler for the periodic check and the daily reboot.
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    controller: Arc<DoorController>,
    tick: Duration,
}

impl Scheduler {
    /// Create a scheduler with no tasks.
    pub fn new(controller: Arc<DoorController>, tick: Duration) -> Self {
        Self {
            tasks: Vec::new(),
            controller,
            tick,
        }
    }

    /// Create a scheduler with the tasks `config` asks for, armed at `now`.
    pub fn from_config(
        controller: Arc<DoorController>,
        config: &ScheduleConfig,
        now: NaiveDateTime,
    ) -> Self {
        let mut scheduler = Self::new(controller, Duration::from_secs(config.tick_secs.max(1)));
        scheduler.with_status_checks(config.check_interval_mins, now);
        if config.reboot_enabled {
            scheduler.with_daily_reboot(config, now);
        } else {
            info!("daily reboot disabled");
        }
        scheduler
    }

    /// Register the periodic status check.
    pub fn with_status_checks(&mut self, interval_mins: u64, now: NaiveDateTime) {
        let task = ScheduledTask::new(
            TASK_STATUS_CHECK,
            "Check and publish lock status",
            Schedule::Interval {
                secs: interval_mins.saturating_mul(60),
            },
        )
        .armed_at(now);
        self.add_task(task);
    }

    /// Register the daily reboot-and-reinitialize.
    pub fn with_daily_reboot(&mut self, config: &ScheduleConfig, now: NaiveDateTime) {
        let task = ScheduledTask::new(
            TASK_DAILY_REBOOT,
            "Reboot and reinitialize the device",
            Schedule::Daily {
                at: config.reboot_at,
            },
        )
        .armed_at(now);
        self.add_task(task);
    }

    /// Add a task, replacing any task with the same ID.
    pub fn add_task(&mut self, task: ScheduledTask) {
        info!(id = %task.id, schedule = %task.schedule, "scheduled task registered");
        self.tasks.retain(|t| t.id != task.id);
        self.tasks.push(task);
    }

    /// All registered tasks.
    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    /// Start the scheduler loop. It stops once `cancel` fires; a task that is
    /// already running is allowed to finish first.
    pub fn run(mut self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("scheduler started with {} tasks", self.tasks.len());
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                self.tick_at(Local::now().naive_local()).await;
            }
            info!("scheduler stopped");
        })
    }

    /// Run every task due at `now`. Returns the outcome per task that ran.
    pub async fn tick_at(&mut self, now: NaiveDateTime) -> Vec<(String, TaskResult)> {
        let due: Vec<usize> = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.is_due_at(now))
            .map(|(i, _)| i)
            .collect();

        let mut outcomes = Vec::with_capacity(due.len());
        for index in due {
            let Some(task) = self.tasks.get_mut(index) else {
                continue;
            };
            // Re-armed before running so a slow task cannot fire twice.
            task.mark_run_at(now);
            let id = task.id.clone();
            debug!(%id, "running scheduled task");

            let result = self.execute(&id, now).await;
            match &result {
                TaskResult::Success(msg) => info!(%id, "{msg}"),
                TaskResult::Skipped(msg) => debug!(%id, "{msg}"),
                TaskResult::Error(msg) => error!(%id, "{msg}"),
            }
            outcomes.push((id, result));
        }
        outcomes
    }

    async fn execute(&self, task_id: &str, now: NaiveDateTime) -> TaskResult {
        match task_id {
            TASK_STATUS_CHECK => match self.controller.periodic_check_at(now.time()).await {
                Some(state) => TaskResult::Success(format!("published {state}")),
                None => TaskResult::Skipped("outside active window".to_owned()),
            },
            TASK_DAILY_REBOOT => match self.controller.daily_reboot_and_initialize().await {
                Ok(()) => TaskResult::Success("device rebooted and initialized".to_owned()),
                Err(e) => TaskResult::Error(format!("daily reboot failed: {e}")),
            },
            other => {
                warn!(id = other, "no executor for scheduled task");
                TaskResult::Error(format!("unknown task: {other}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::bus::PublishedState;
    use crate::classifier::Rgb;
    use crate::config::DoorlockConfig;
    use crate::device::{RemoteChannel, ShellOutput};
    use crate::testing::{RecordingPublisher, ScriptedChannel, solid_png};
    use chrono::{Duration as ChronoDuration, NaiveDate};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn setup(config: &DoorlockConfig) -> (Arc<ScriptedChannel>, Arc<RecordingPublisher>, Arc<DoorController>) {
        let channel = Arc::new(ScriptedChannel::new("127.0.0.1:5555"));
        channel.respond(
            "mResumedActivity",
            ShellOutput::ok("com.alpha.lockapp/.MainActivity"),
        );
        channel.set_screens(vec![solid_png(200, 400, Rgb::new(0, 168, 135))]);
        let publisher = Arc::new(RecordingPublisher::new());
        let raw: Arc<dyn RemoteChannel> = channel.clone();
        let controller = Arc::new(DoorController::new(config, raw, publisher.clone()));
        (channel, publisher, controller)
    }

    fn config() -> (DoorlockConfig, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DoorlockConfig::default();
        config.diagnostics.screenshot_dir = Some(dir.path().to_path_buf());
        (config, dir)
    }

    #[test]
    fn from_config_registers_both_tasks() {
        let (config, _dir) = config();
        let (_, _, controller) = setup(&config);
        let scheduler = Scheduler::from_config(controller, &config.schedule, at(8, 0));
        let ids: Vec<&str> = scheduler.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![TASK_STATUS_CHECK, TASK_DAILY_REBOOT]);
    }

    #[test]
    fn disabled_reboot_is_not_registered() {
        let (mut config, _dir) = config();
        config.schedule.reboot_enabled = false;
        let (_, _, controller) = setup(&config);
        let scheduler = Scheduler::from_config(controller, &config.schedule, at(8, 0));
        assert_eq!(scheduler.tasks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn status_check_fires_after_interval_inside_window() {
        let (config, _dir) = config();
        let (_, publisher, controller) = setup(&config);
        let mut scheduler = Scheduler::from_config(controller, &config.schedule, at(8, 0));

        assert!(scheduler.tick_at(at(8, 10)).await.is_empty());

        let outcomes = scheduler.tick_at(at(8, 30)).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, TASK_STATUS_CHECK);
        assert!(matches!(outcomes[0].1, TaskResult::Success(_)));
        assert_eq!(publisher.published(), vec![PublishedState::Locked]);

        assert!(scheduler.tick_at(at(8, 45)).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn status_check_outside_window_is_skipped_without_io() {
        let (config, _dir) = config();
        let (channel, publisher, controller) = setup(&config);
        let mut scheduler = Scheduler::from_config(controller, &config.schedule, at(23, 0));

        let outcomes = scheduler.tick_at(at(23, 30)).await;

        assert_eq!(
            outcomes,
            vec![(
                TASK_STATUS_CHECK.to_owned(),
                TaskResult::Skipped("outside active window".to_owned())
            )]
        );
        assert!(channel.calls().is_empty());
        assert!(publisher.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn daily_reboot_fires_at_configured_time() {
        let (mut config, _dir) = config();
        config.schedule.check_interval_mins = 24 * 60;
        let (channel, _, controller) = setup(&config);
        let mut scheduler = Scheduler::from_config(controller, &config.schedule, at(2, 0));

        let outcomes = scheduler.tick_at(at(3, 0)).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, TASK_DAILY_REBOOT);
        assert!(matches!(outcomes[0].1, TaskResult::Success(_)));
        assert_eq!(channel.count("reboot"), 1);

        assert!(scheduler.tick_at(at(3, 1)).await.is_empty());
        let tomorrow = at(3, 0) + ChronoDuration::days(1);
        let outcomes = scheduler.tick_at(tomorrow).await;
        assert!(outcomes.iter().any(|(id, _)| id == TASK_DAILY_REBOOT));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let (config, _dir) = config();
        let (_, _, controller) = setup(&config);
        let scheduler = Scheduler::new(controller, Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let handle = scheduler.run(cancel.clone());

        tokio::time::sleep(Duration::from_secs(90)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
