//! Global constants for hourlock
//!
//! Centralized location for application-wide constants

use std::time::Duration;

/// Application name, used for directories, notifications and process discovery
pub const APP_NAME: &str = "hourlock";

/// Subsystem identifier for the macOS Unified Logging System
pub const APP_SUBSYSTEM: &str = "io.github.hourlock";

/// Default daemon category for ULS logging
pub const DAEMON_CATEGORY: &str = "daemon";

/// Config file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Sidecar file that serializes read-modify-write cycles on the config
pub const CONFIG_LOCK_FILE_NAME: &str = ".config.lock";

/// Log file name used by the non-ULS logging backend
pub const LOG_FILE_NAME: &str = "hourlock.log";

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "HOURLOCK_CONFIG_DIR";

/// Environment variable overriding the log directory
pub const LOG_DIR_ENV: &str = "HOURLOCK_LOG_DIR";

/// Subcommand names used to launch and discover the daemon
pub const DAEMON_SUBCOMMAND: &str = "daemon";
pub const DAEMON_RUN_SUBCOMMAND: &str = "run";

/// Sweep interval while inside an enforcement window
pub const ACTIVE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Returned by the schedule evaluator when no next window can be computed
pub const SCHEDULE_FALLBACK_DELAY: Duration = Duration::from_secs(60 * 60);

/// Days scanned forward when looking for the next simple-range window
pub const SCHEDULE_LOOKAHEAD_DAYS: u32 = 8;

/// Mode applied by the permission fallback when locking
pub const FALLBACK_LOCKED_MODE: u32 = 0o444;

/// Mode applied by the permission fallback when unlocking
pub const FALLBACK_UNLOCKED_MODE: u32 = 0o644;

/// Default temporary exclusion duration in minutes
pub const DEFAULT_TEMP_EXCLUSION_MINUTES: u32 = 5;

/// Directory names skipped when expanding managed directories
pub const VCS_METADATA_DIRS: &[&str] = &[".git", ".jj"];

/// Notification title for manual change alerts
pub const NOTIFICATION_TITLE: &str = "hourlock alert";
