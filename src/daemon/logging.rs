//! Structured daemon logging
//!
//! Events are emitted through the `log` facade as `"<message> | <json>"`.
//! The backend is the Unified Logging System on macOS. Elsewhere a
//! `tracing-subscriber` fmt subscriber appends plain lines to a log file.

use anyhow::Result;
use log::{error, info, warn, LevelFilter};
use serde_json::json;
#[cfg(not(target_os = "macos"))]
use std::fs::{self, OpenOptions};
#[cfg(not(target_os = "macos"))]
use std::io;
use std::path::{Path, PathBuf};
#[cfg(not(target_os = "macos"))]
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{APP_NAME, LOG_DIR_ENV, LOG_FILE_NAME};

/// Daemon logger handed to the enforcement loop
#[derive(Debug, Clone)]
pub struct DaemonLogger {
    /// Minimum level emitted
    level: LogLevel,
}

/// Log levels for daemon operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
}

impl DaemonLogger {
    /// Install the process-wide backend and create the logger
    pub fn new(subsystem: &str, category: &str, level: LogLevel) -> Result<Self> {
        if !subsystem.contains('.') {
            anyhow::bail!("Subsystem must be in reverse DNS format (e.g., 'com.example.app')");
        }

        install_backend(subsystem, category)?;
        log::set_max_level(LevelFilter::Debug);

        Ok(Self { level })
    }

    /// Logger that relies on whatever backend is already installed
    pub fn detached(level: LogLevel) -> Self {
        Self { level }
    }

    pub fn log_startup(&self, config_path: &Path, pid: u32, locker: &str) {
        let message = json!({
            "event": "daemon_startup",
            "pid": pid,
            "config_path": config_path.display().to_string(),
            "locker": locker,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, "Daemon started", &message);
    }

    pub fn log_shutdown(&self, reason: &str) {
        let message = json!({
            "event": "daemon_shutdown",
            "reason": reason,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, "Daemon shutting down", &message);
    }

    /// Entering or leaving the enforcement window
    pub fn log_transition(&self, active: bool, managed_paths: usize, next_check: Duration) {
        let (event, text) = if active {
            ("window_opened", "Enforcement window opened")
        } else {
            ("window_closed", "Enforcement window closed")
        };
        let message = json!({
            "event": event,
            "managed_paths": managed_paths,
            "next_check_secs": next_check.as_secs(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, text, &message);
    }

    pub fn log_lock(&self, path: &Path, reason: &str) {
        let message = json!({
            "event": "path_locked",
            "path": path.display().to_string(),
            "reason": reason,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, &format!("Locked: {}", path.display()), &message);
    }

    pub fn log_unlock(&self, path: &Path) {
        let message = json!({
            "event": "path_unlocked",
            "path": path.display().to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, &format!("Unlocked: {}", path.display()), &message);
    }

    /// A watched managed path changed while enforcement was active
    pub fn log_manual_change(&self, managed_path: &str, event_path: &Path) {
        let message = json!({
            "event": "manual_change",
            "managed_path": managed_path,
            "event_path": event_path.display().to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(
            LogLevel::Warn,
            &format!("Change detected on locked path {}, re-applying lock", managed_path),
            &message,
        );
    }

    pub fn log_config_reload(&self, managed_paths: usize, schedule: &str) {
        let message = json!({
            "event": "config_reloaded",
            "managed_paths": managed_paths,
            "schedule": schedule,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, "Configuration reloaded", &message);
    }

    pub fn log_warning(&self, warning: &str, context: Option<&str>) {
        let message = json!({
            "event": "warning",
            "message": warning,
            "context": context,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Warn, warning, &message);
    }

    pub fn log_error(&self, error_message: &str, context: Option<&str>) {
        let message = json!({
            "event": "error",
            "message": error_message,
            "context": context,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Error, error_message, &message);
    }

    /// Flush the installed backend
    pub fn flush(&self) {
        log::logger().flush();
    }

    fn log_structured(&self, level: LogLevel, message: &str, data: &serde_json::Value) {
        if !self.should_log(level) {
            return;
        }

        let full_message = format!("{} | {}", message, data);

        match level {
            LogLevel::Error => error!("{}", full_message),
            LogLevel::Warn => warn!("{}", full_message),
            LogLevel::Info => info!("{}", full_message),
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level <= self.level
    }
}

#[cfg(target_os = "macos")]
fn install_backend(subsystem: &str, _category: &str) -> Result<()> {
    let logger = oslog::OsLogger::new(subsystem);
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))
}

#[cfg(not(target_os = "macos"))]
fn install_backend(_subsystem: &str, _category: &str) -> Result<()> {
    use tracing_subscriber::util::SubscriberInitExt;

    // `try_init` also routes the `log` facade into the subscriber
    file_subscriber(default_writer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))
}

/// Directory holding the daemon log file
pub fn log_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }
    dirs::data_local_dir().map(|dir| dir.join(APP_NAME))
}

/// Plain-text subscriber writing one line per event
#[cfg(not(target_os = "macos"))]
fn file_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish()
}

/// Append to the default log file, or stderr when it cannot be opened
#[cfg(not(target_os = "macos"))]
fn default_writer() -> tracing_subscriber::fmt::writer::BoxMakeWriter {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;

    match log_dir().map(|dir| open_log_file(&dir)) {
        Some(Ok(file)) => BoxMakeWriter::new(Arc::new(file)),
        Some(Err(e)) => {
            eprintln!("Warning: failed to open log file, logging to stderr: {}", e);
            BoxMakeWriter::new(io::stderr)
        }
        None => BoxMakeWriter::new(io::stderr),
    }
}

#[cfg(not(target_os = "macos"))]
fn open_log_file(dir: &Path) -> io::Result<fs::File> {
    fs::create_dir_all(dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filtering() {
        let logger = DaemonLogger::detached(LogLevel::Warn);
        assert!(logger.should_log(LogLevel::Error));
        assert!(logger.should_log(LogLevel::Warn));
        assert!(!logger.should_log(LogLevel::Info));

        let logger = DaemonLogger::detached(LogLevel::Error);
        assert!(!logger.should_log(LogLevel::Warn));
    }

    #[test]
    fn test_invalid_subsystem_rejected() {
        assert!(DaemonLogger::new("hourlock", "daemon", LogLevel::Info).is_err());
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_log_file_is_appended() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs");

        writeln!(open_log_file(&nested).unwrap(), "first").unwrap();
        writeln!(open_log_file(&nested).unwrap(), "second").unwrap();

        let text = fs::read_to_string(nested.join(LOG_FILE_NAME)).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }

    #[cfg(not(target_os = "macos"))]
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<std::sync::Mutex<Vec<u8>>>);

    #[cfg(not(target_os = "macos"))]
    impl io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[cfg(not(target_os = "macos"))]
    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedBuf {
        type Writer = SharedBuf;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_file_subscriber_writes_plain_lines() {
        let buf = SharedBuf::default();

        tracing::subscriber::with_default(file_subscriber(buf.clone()), || {
            tracing::info!("Locked: /etc/hosts");
            tracing::trace!("noise");
        });

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("INFO"));
        assert!(text.contains("Locked: /etc/hosts"));
        assert!(!text.contains('\u{1b}'), "no ANSI escapes in the log file");
    }
}
