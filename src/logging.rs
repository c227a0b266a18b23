//! Log output: stdout plus a daily rolling `doorlock.log`.

use crate::config::LoggingConfig;
use crate::error::{DoorlockError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter from `RUST_LOG`, falling back to `level`.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Daily-rotated appender in `dir` keeping at most `max_files` files.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created or opened.
pub fn file_appender(dir: &Path, max_files: usize) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(dir)?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("doorlock")
        .filename_suffix("log")
        .max_log_files(max_files.max(1))
        .build(dir)
        .map_err(|e| DoorlockError::Io(std::io::Error::other(e)))
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened or a global subscriber
/// is already installed.
pub fn init(config: &LoggingConfig) -> Result<WorkerGuard> {
    let dir = config
        .directory
        .clone()
        .unwrap_or_else(crate::paths::logs_dir);
    let (writer, guard) = tracing_appender::non_blocking(file_appender(&dir, config.max_files)?);

    tracing_subscriber::registry()
        .with(env_filter(&config.level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .try_init()
        .map_err(|e| DoorlockError::Config(format!("logging already initialized: {e}")))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::io::Write;

    #[test]
    fn appender_writes_prefixed_file() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let mut appender = file_appender(&logs, 3).unwrap();
        writeln!(appender, "hello").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(&logs)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("doorlock."), "{names:?}");
        assert!(names[0].ends_with(".log"), "{names:?}");
    }
}
