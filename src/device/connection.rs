//! Connection health monitoring for the remote control channel.
//!
//! Network adb drops silently when the phone sleeps its Wi-Fi or the host
//! restarts the adb server. The monitor re-derives link health on every
//! guarded operation; nothing is cached between calls.

use super::RemoteChannel;
use crate::config::ConnectionConfig;
use crate::error::{DoorlockError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Verifies and restores the channel link with a bounded probe loop.
pub struct ConnectionMonitor {
    channel: Arc<dyn RemoteChannel>,
    max_attempts: u32,
    retry_interval: Duration,
}

impl ConnectionMonitor {
    /// Create a monitor for `channel`.
    pub fn new(channel: Arc<dyn RemoteChannel>, config: &ConnectionConfig) -> Self {
        Self {
            channel,
            max_attempts: config.max_attempts.max(1),
            retry_interval: Duration::from_secs(config.retry_interval_secs),
        }
    }

    /// One health probe. Transport errors count as an unhealthy link.
    pub async fn probe(&self) -> bool {
        match self.channel.connect().await {
            Ok(up) => up,
            Err(e) => {
                debug!(error = %e, "connection probe failed");
                false
            }
        }
    }

    /// Ensure the link is up, probing at most `max_attempts` times with
    /// `retry_interval` between probes.
    ///
    /// # Errors
    ///
    /// Returns [`DoorlockError::Connection`] once every probe has failed.
    pub async fn ensure_connected(&self) -> Result<()> {
        for attempt in 1..=self.max_attempts {
            if self.probe().await {
                if attempt > 1 {
                    info!(attempt, serial = self.channel.serial(), "device reconnected");
                }
                return Ok(());
            }
            warn!(
                attempt,
                max_attempts = self.max_attempts,
                serial = self.channel.serial(),
                "device not connected"
            );
            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_interval).await;
            }
        }
        error!(
            attempts = self.max_attempts,
            serial = self.channel.serial(),
            "device reconnection failed"
        );
        Err(DoorlockError::Connection {
            attempts: self.max_attempts,
        })
    }

    /// Ensure the link, then run `op`.
    ///
    /// When `op` fails the link is checked once more before the error is
    /// returned, so the next caller finds a working channel. `op` itself is
    /// never re-run here.
    ///
    /// # Errors
    ///
    /// Returns [`DoorlockError::Connection`] if the link is down before `op`
    /// or cannot be restored after it failed; otherwise the error of `op`.
    pub async fn guarded<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_connected().await?;
        match op().await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(error = %err, "device operation failed, checking connection");
                self.ensure_connected().await?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::testing::ScriptedChannel;
    use tokio::time::Instant;

    fn monitor(channel: &Arc<ScriptedChannel>) -> ConnectionMonitor {
        let channel: Arc<dyn RemoteChannel> = channel.clone();
        ConnectionMonitor::new(channel, &ConnectionConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_link_probes_once() {
        let channel = Arc::new(ScriptedChannel::new("dev"));
        let started = Instant::now();
        monitor(&channel).ensure_connected().await.unwrap();
        assert_eq!(channel.count("connect"), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_n_failed_probes() {
        for failures in [1_u32, 7, 19] {
            let channel = Arc::new(ScriptedChannel::new("dev"));
            channel.fail_connects(failures as usize);
            let started = Instant::now();

            monitor(&channel).ensure_connected().await.unwrap();

            assert_eq!(channel.count("connect"), failures as usize + 1);
            assert_eq!(started.elapsed(), Duration::from_secs(5) * failures);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_twenty_probes() {
        let channel = Arc::new(ScriptedChannel::new("dev"));
        channel.fail_connects(usize::MAX);
        let started = Instant::now();

        let err = monitor(&channel).ensure_connected().await.unwrap_err();

        assert!(matches!(err, DoorlockError::Connection { attempts: 20 }));
        assert_eq!(channel.count("connect"), 20);
        assert_eq!(started.elapsed(), Duration::from_secs(5 * 19));
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_rechecks_once_after_failure_and_reraises() {
        let channel = Arc::new(ScriptedChannel::new("dev"));
        let m = monitor(&channel);
        let result: Result<()> = m
            .guarded(|| async {
                Err(DoorlockError::Command {
                    command: "input tap 1 1".to_owned(),
                    detail: "closed".to_owned(),
                })
            })
            .await;

        assert!(matches!(result, Err(DoorlockError::Command { .. })));
        assert_eq!(channel.count("connect"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_reports_connection_error_when_recovery_fails() {
        let channel = Arc::new(ScriptedChannel::new("dev"));
        let m = monitor(&channel);
        let flaky = Arc::clone(&channel);
        let result: Result<()> = m
            .guarded(|| async move {
                flaky.fail_connects(usize::MAX);
                Err(DoorlockError::Capture("empty".to_owned()))
            })
            .await;

        assert!(matches!(result, Err(DoorlockError::Connection { .. })));
        assert_eq!(channel.count("connect"), 21);
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_does_not_run_op_without_link() {
        let channel = Arc::new(ScriptedChannel::new("dev"));
        channel.fail_connects(usize::MAX);
        let m = monitor(&channel);
        let mut ran = false;
        let result = m
            .guarded(|| {
                ran = true;
                async { Ok(()) }
            })
            .await;
        assert!(result.is_err());
        assert!(!ran);
    }
}
