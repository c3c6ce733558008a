//! Implementation of the CLI subcommands
//!
//! Every config mutation goes through `ConfigStore::update` and is followed
//! by a reload signal to any running daemon.

use anyhow::{bail, Context, Result};
use chrono::Local;
use nix::sys::signal::Signal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ScheduleOptions;
use hourlock::daemon::config::{Config, ConfigStore, FileConfigStore};
use hourlock::daemon::{find_daemon_pids, notify_daemon_reload, signal_daemon};
use hourlock::fileutil::expand_managed;
use hourlock::lock::{platform_locker, Locker};
use hourlock::schedule::{normalize_time_range, parse_days, Schedule, TimeRange};

const DEFAULT_HOURS: &str = "08:00-17:00";
const DEFAULT_DAYS: &str = "1-5";

/// Config store and locker shared by one command invocation
struct Session {
    store: FileConfigStore,
    locker: Arc<dyn Locker>,
}

impl Session {
    fn open() -> Result<Self> {
        let locker = platform_locker();
        let store = FileConfigStore::default_location()?.with_locker(locker.clone());
        Ok(Self { store, locker })
    }

    fn load(&self) -> Result<Config> {
        Ok(self.store.load()?)
    }
}

pub fn init(options: &ScheduleOptions, force: bool) -> Result<()> {
    let ctx = Session::open()?;
    let config_path = ctx.store.config_path();

    let mut preserved = Vec::new();
    if ctx.store.exists() {
        if !force {
            bail!(
                "Config already exists at {}. Use --force to overwrite",
                config_path.display()
            );
        }
        match ctx.store.load() {
            Ok(existing) => {
                println!("Preserving {} existing managed path(s)", existing.managed_paths.len());
                preserved = existing.managed_paths;
            }
            Err(e) => eprintln!("Warning: existing config unreadable, starting fresh: {}", e),
        }
    }

    let schedule = build_schedule(options, None)?;
    let mut config = Config::new(
        schedule,
        options
            .temp_minutes
            .unwrap_or(hourlock::constants::DEFAULT_TEMP_EXCLUSION_MINUTES),
    );
    for path in &preserved {
        config.add_path(path);
    }
    // The config protects itself during enforcement windows
    config.add_path(&config_path.to_string_lossy());
    config.validate()?;

    std::fs::create_dir_all(ctx.store.config_dir()).with_context(|| {
        format!("Failed to create {}", ctx.store.config_dir().display())
    })?;
    ctx.store.save(&config)?;

    println!("Config created at {}", config_path.display());
    println!("  Schedule: {}", config.schedule.describe());
    println!("  Temporary unlock: {} minute(s)", config.temp_exclusion_default_minutes);
    println!("Add paths with: hourlock add <path>");

    notify_daemon_reload();
    Ok(())
}

pub fn add(path: &str) -> Result<()> {
    let ctx = Session::open()?;
    let resolved = resolve_existing(path)?;
    let key = resolved.to_string_lossy().into_owned();

    let mut added = false;
    let config = ctx.store.update(&mut |config: &mut Config| {
        added = config.add_path(&key);
        added
    })?;

    if !added {
        println!("Path is already managed: {}", key);
        return Ok(());
    }

    let kind = if resolved.is_dir() { "directory" } else { "file" };
    println!("Added {} to managed paths: {}", kind, key);

    if config.schedule.is_within_window(&Local::now()) {
        println!("Inside enforcement window, locking now...");
        let failures = apply(&*ctx.locker, &resolved, true);
        if failures == 0 {
            println!("Locked");
        }
    } else {
        println!("Outside enforcement window. Locks apply when the window opens.");
    }

    notify_daemon_reload();
    Ok(())
}

pub fn remove(path: &str) -> Result<()> {
    let ctx = Session::open()?;
    let resolved = resolve_lenient(path)?;
    let key = resolved.to_string_lossy().into_owned();

    let mut removed = false;
    ctx.store.update(&mut |config: &mut Config| {
        removed = config.remove_path(&key);
        removed
    })?;

    if !removed {
        bail!("Path is not managed: {}", key);
    }

    if resolved.exists() {
        apply(&*ctx.locker, &resolved, false);
    }
    println!("Removed from managed paths: {}", key);

    notify_daemon_reload();
    Ok(())
}

pub fn list() -> Result<()> {
    let ctx = Session::open()?;
    let config = ctx.load()?;

    if config.managed_paths.is_empty() {
        println!("No managed paths. Add one with: hourlock add <path>");
        return Ok(());
    }

    let now = Local::now();
    println!("Managed paths:");
    for path in &config.managed_paths {
        let expiry = config
            .exclusions
            .iter()
            .find(|(p, expiry)| *p == path.as_str() && *expiry > now)
            .map(|(_, expiry)| expiry);
        match expiry {
            Some(expiry) => println!(
                "  {} (temporarily unlocked until {})",
                path,
                expiry.with_timezone(&Local).format("%H:%M")
            ),
            None => println!("  {}", path),
        }
    }
    Ok(())
}

pub fn status() -> Result<()> {
    let ctx = Session::open()?;
    let config = ctx.load()?;
    let now = Local::now();

    println!("Config: {}", ctx.store.config_path().display());
    println!("Schedule: {}", config.schedule.describe());
    if let Err(e) = config.schedule.validate() {
        println!("  Warning: schedule is invalid, enforcement is off ({})", e);
    }

    if config.schedule.is_within_window(&now) {
        println!("Enforcement window: open");
    } else {
        let next = config.schedule.time_until_next_window(&now);
        println!("Enforcement window: closed (opens in {})", format_duration(next));
    }

    let pids = find_daemon_pids();
    if pids.is_empty() {
        println!("Daemon: not running");
    } else {
        let pids: Vec<String> = pids.iter().map(u32::to_string).collect();
        println!("Daemon: running (pid {})", pids.join(", "));
    }

    println!("Managed paths: {}", config.managed_paths.len());
    println!("Locker: {}", ctx.locker.name());

    let active: Vec<_> = config
        .exclusions
        .iter()
        .filter(|(_, expiry)| *expiry > now)
        .collect();
    if !active.is_empty() {
        println!("Temporary unlocks:");
        for (path, expiry) in active {
            let remaining = (expiry.with_timezone(&Local) - now)
                .to_std()
                .unwrap_or_default();
            println!("  {} ({} remaining)", path, format_duration(remaining));
        }
    }
    Ok(())
}

pub fn temp_unlock(path: &str, minutes: Option<u32>) -> Result<()> {
    let ctx = Session::open()?;
    let resolved = resolve_lenient(path)?;
    let key = resolved.to_string_lossy().into_owned();

    let now = Local::now();
    let mut managed = false;
    let mut expiry = None;
    ctx.store.update(&mut |config: &mut Config| {
        managed = config.is_managed(&key);
        if !managed {
            return false;
        }
        let minutes = minutes.unwrap_or(config.temp_exclusion_default_minutes);
        expiry = Some(config.exclusions.add(&key, minutes, now));
        true
    })?;

    let Some(expiry) = expiry.filter(|_| managed) else {
        bail!("Path is not managed: {}", key);
    };

    if resolved.exists() {
        apply(&*ctx.locker, &resolved, false);
    }
    println!(
        "Temporarily unlocked {} until {}",
        key,
        expiry.format("%H:%M")
    );

    notify_daemon_reload();
    Ok(())
}

pub fn schedule(options: &ScheduleOptions) -> Result<()> {
    let ctx = Session::open()?;

    if options.is_empty() {
        let config = ctx.load()?;
        println!("Schedule: {}", config.schedule.describe());
        println!("Temporary unlock: {} minute(s)", config.temp_exclusion_default_minutes);
        return Ok(());
    }

    let current = ctx.load()?;
    let schedule = build_schedule(options, Some(&current.schedule))?;

    let config = ctx.store.update(&mut |config: &mut Config| {
        config.schedule = schedule.clone();
        if let Some(minutes) = options.temp_minutes {
            config.temp_exclusion_default_minutes = minutes;
        }
        true
    })?;

    println!("Schedule updated: {}", config.schedule.describe());
    notify_daemon_reload();
    Ok(())
}

pub fn daemon_stop() -> Result<()> {
    match signal_daemon(Signal::SIGTERM)? {
        0 => println!("Daemon is not running"),
        n => println!("Sent stop request to {} daemon process(es)", n),
    }
    Ok(())
}

pub fn daemon_reload() -> Result<()> {
    match signal_daemon(Signal::SIGHUP)? {
        0 => println!("Daemon is not running"),
        n => println!("Sent reload request to {} daemon process(es)", n),
    }
    Ok(())
}

pub fn unlock_all() -> Result<()> {
    let ctx = Session::open()?;
    let config = ctx.load()?;

    let mut failures = 0;
    for path in &config.managed_paths {
        let path = Path::new(path.as_str());
        if path.exists() {
            failures += apply(&*ctx.locker, path, false);
        }
    }

    println!("Unlocked {} managed path(s)", config.managed_paths.len());
    if !find_daemon_pids().is_empty() && config.schedule.is_within_window(&Local::now()) {
        println!("Note: the daemon is running inside the window and will re-apply locks.");
    }
    if failures > 0 {
        bail!("{} path(s) could not be unlocked", failures);
    }
    Ok(())
}

/// Lock or unlock every entry of a managed path; returns the failure count
fn apply(locker: &dyn Locker, path: &Path, lock: bool) -> usize {
    let mut failures = 0;
    for entry in expand_managed(path) {
        let result = if lock {
            locker.lock(&entry)
        } else {
            locker.unlock(&entry)
        };
        if let Err(e) = result {
            eprintln!("Warning: {}", e);
            failures += 1;
        }
    }
    failures
}

/// Build a schedule from flags, filling unspecified parts from `current`
fn build_schedule(options: &ScheduleOptions, current: Option<&Schedule>) -> Result<Schedule> {
    if let Some(expression) = &options.cron {
        let schedule = Schedule::cron(expression);
        schedule.validate()?;
        return Ok(schedule);
    }

    let existing: Option<&TimeRange> = match current {
        Some(Schedule::Range(range)) => Some(range),
        _ => None,
    };

    let (start_time, end_time) = match (&options.hours, existing) {
        (Some(hours), _) => normalize_time_range(hours)?,
        (None, Some(range)) => (range.start_time.clone(), range.end_time.clone()),
        (None, None) => normalize_time_range(DEFAULT_HOURS)?,
    };
    let days = match (&options.days, existing) {
        (Some(days), _) => parse_days(days)?,
        (None, Some(range)) => range.days.clone(),
        (None, None) => parse_days(DEFAULT_DAYS)?,
    };

    let schedule = Schedule::range(&start_time, &end_time, days);
    schedule.validate()?;
    Ok(schedule)
}

/// Absolute path with symlinks resolved; the target must exist
fn resolve_existing(path: &str) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| {
        format!("Path does not exist or is a broken symlink: {}", path)
    })
}

/// Like `resolve_existing`, but falls back to the absolute literal path
fn resolve_lenient(path: &str) -> Result<PathBuf> {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return Ok(resolved);
    }
    let path = Path::new(path);
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}

fn format_duration(duration: std::time::Duration) -> String {
    let minutes = duration.as_secs() / 60;
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{}m", m),
        (h, m) => format!("{}h {}m", h, m),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_schedule_defaults() {
        let schedule = build_schedule(&ScheduleOptions::default(), None).unwrap();
        assert_eq!(schedule, Schedule::range("08:00", "17:00", vec![1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_build_schedule_keeps_current_days() {
        let current = Schedule::range("08:00", "17:00", vec![6, 7]);
        let options = ScheduleOptions {
            hours: Some("9-12".to_string()),
            ..ScheduleOptions::default()
        };

        let schedule = build_schedule(&options, Some(&current)).unwrap();
        assert_eq!(schedule, Schedule::range("09:00", "12:00", vec![6, 7]));
    }

    #[test]
    fn test_build_schedule_rejects_inverted_range() {
        let options = ScheduleOptions {
            hours: Some("17:00-08:00".to_string()),
            ..ScheduleOptions::default()
        };
        assert!(build_schedule(&options, None).is_err());
    }

    #[test]
    fn test_build_schedule_cron() {
        let options = ScheduleOptions {
            cron: Some("0 9 * * Mon-Fri".to_string()),
            ..ScheduleOptions::default()
        };
        assert_eq!(
            build_schedule(&options, None).unwrap(),
            Schedule::cron("0 9 * * Mon-Fri")
        );

        let options = ScheduleOptions {
            cron: Some("not cron".to_string()),
            ..ScheduleOptions::default()
        };
        assert!(build_schedule(&options, None).is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(std::time::Duration::from_secs(59)), "0m");
        assert_eq!(format_duration(std::time::Duration::from_secs(125 * 60)), "2h 5m");
    }

    #[test]
    fn test_resolve_lenient_relative() {
        let resolved = resolve_lenient("does-not-exist-hourlock").unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("does-not-exist-hourlock"));
    }
}
