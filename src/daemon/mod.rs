//! Enforcement daemon
//!
//! A single task owns the daemon state and multiplexes over:
//! - a retriggerable timer driving window transitions and periodic sweeps
//! - filesystem events from the path watcher
//! - reload / terminate requests from signals or a [`DaemonHandle`]
//!
//! Producers never touch the state; they only send [`DaemonMessage`]s.

pub mod config;
pub mod logging;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::constants::{
    ACTIVE_SWEEP_INTERVAL, APP_NAME, APP_SUBSYSTEM, DAEMON_CATEGORY, DAEMON_RUN_SUBCOMMAND,
    DAEMON_SUBCOMMAND, NOTIFICATION_TITLE,
};
use crate::daemon::config::{Config, ConfigError, ConfigStore, FileConfigStore};
use crate::daemon::logging::{DaemonLogger, LogLevel};
use crate::fileutil::expand_managed;
use crate::lock::{platform_locker, LockError, Locker};
use crate::notifier::{manual_change_message, DesktopNotifier, Notifier};
use crate::watcher::{NotifyWatcher, Watch, WatchEvent};

/// Shortest delay the timer is re-armed with while outside a window
const MIN_RECHECK_DELAY: Duration = Duration::from_secs(1);

/// Input to the daemon loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonMessage {
    Watch(WatchEvent),
    Reload,
    Terminate(&'static str),
}

/// Cloneable sender side of the daemon's queue
#[derive(Debug, Clone)]
pub struct DaemonHandle {
    tx: mpsc::UnboundedSender<DaemonMessage>,
}

impl DaemonHandle {
    /// Create a handle and the receiver the daemon consumes
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DaemonMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// False once the daemon has stopped
    pub fn send(&self, message: DaemonMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    pub fn reload(&self) -> bool {
        self.send(DaemonMessage::Reload)
    }

    pub fn shutdown(&self) -> bool {
        self.send(DaemonMessage::Terminate("shutdown requested"))
    }

    /// Callback for the path watcher
    pub fn watch_sink(&self) -> impl Fn(WatchEvent) + Send + 'static {
        let tx = self.tx.clone();
        move |event| {
            let _ = tx.send(DaemonMessage::Watch(event));
        }
    }
}

/// Whether enforcement is in effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Inactive,
    Active,
}

/// Everything the daemon talks to
pub struct Collaborators {
    pub store: Arc<dyn ConfigStore>,
    pub locker: Arc<dyn Locker>,
    pub watcher: Box<dyn Watch>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub logger: DaemonLogger,
}

/// The enforcement loop and the state it owns
pub struct Daemon {
    config: Config,
    state: DaemonState,
    /// Managed paths the current subscriptions were built from
    watch_set: Vec<String>,
    store: Arc<dyn ConfigStore>,
    locker: Arc<dyn Locker>,
    watcher: Box<dyn Watch>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    logger: DaemonLogger,
    inbox: mpsc::UnboundedReceiver<DaemonMessage>,
}

impl Daemon {
    /// Load the initial config; failing to do so is fatal
    pub fn new(
        parts: Collaborators,
        inbox: mpsc::UnboundedReceiver<DaemonMessage>,
    ) -> Result<Self, ConfigError> {
        let config = parts.store.load()?;

        Ok(Self {
            config,
            state: DaemonState::Inactive,
            watch_set: Vec::new(),
            store: parts.store,
            locker: parts.locker,
            watcher: parts.watcher,
            notifier: parts.notifier,
            clock: parts.clock,
            logger: parts.logger,
            inbox,
        })
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// Run until a terminate message arrives or every sender is gone.
    /// The filesystem is left unlocked on return.
    pub async fn run(mut self) {
        let timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                () = &mut timer => {
                    let next = blocking(|| self.tick());
                    timer.as_mut().reset(tokio::time::Instant::now() + next);
                }
                message = self.inbox.recv() => match message {
                    Some(DaemonMessage::Watch(WatchEvent::Changed(paths))) => {
                        blocking(|| {
                            for path in &paths {
                                self.handle_event(path);
                            }
                        });
                    }
                    Some(DaemonMessage::Watch(WatchEvent::Error(e))) => {
                        self.logger.log_error(&format!("Watcher error: {}", e), None);
                    }
                    Some(DaemonMessage::Reload) => {
                        if let Some(next) = blocking(|| self.reload()) {
                            timer.as_mut().reset(tokio::time::Instant::now() + next);
                        }
                    }
                    Some(DaemonMessage::Terminate(reason)) => {
                        blocking(|| self.shutdown(reason));
                        return;
                    }
                    None => {
                        blocking(|| self.shutdown("message channel closed"));
                        return;
                    }
                },
            }
        }
    }

    /// One timer fire: refresh config, drive transitions, return the next delay
    fn tick(&mut self) -> Duration {
        self.refresh_config();

        let now = self.clock.now();
        let within = self.config.schedule.is_within_window(&now);

        match (self.state, within) {
            (DaemonState::Inactive, true) => {
                self.state = DaemonState::Active;
                self.logger.log_transition(
                    true,
                    self.config.managed_paths.len(),
                    ACTIVE_SWEEP_INTERVAL,
                );
                self.establish_watches();
                self.sweep();
                ACTIVE_SWEEP_INTERVAL
            }
            (DaemonState::Active, false) => {
                self.state = DaemonState::Inactive;
                self.teardown_watches();
                self.unlock_all();
                let next = self.recheck_delay();
                self.logger
                    .log_transition(false, self.config.managed_paths.len(), next);
                next
            }
            (DaemonState::Active, true) => {
                if self.watch_set != self.config.managed_paths {
                    self.establish_watches();
                }
                self.sweep();
                ACTIVE_SWEEP_INTERVAL
            }
            (DaemonState::Inactive, false) => self.recheck_delay(),
        }
    }

    fn recheck_delay(&self) -> Duration {
        self.config
            .schedule
            .time_until_next_window(&self.clock.now())
            .max(MIN_RECHECK_DELAY)
    }

    /// Reload the config and drop expired exclusions, persisting the cleanup
    fn refresh_config(&mut self) {
        match self.store.load() {
            Ok(config) => self.config = config,
            Err(e) => self.logger.log_warning(
                &format!("Failed to reload config, keeping previous: {}", e),
                None,
            ),
        }

        let now = self.clock.now();
        if !self.config.exclusions.clean_expired(now) {
            return;
        }
        match self
            .store
            .update(&mut |config: &mut Config| config.exclusions.clean_expired(now))
        {
            Ok(updated) => self.config = updated,
            Err(e) => self
                .logger
                .log_warning(&format!("Failed to persist expired exclusions: {}", e), None),
        }
    }

    /// Explicit reload request. Returns a new timer delay when inactive.
    fn reload(&mut self) -> Option<Duration> {
        match self.store.load() {
            Ok(config) => {
                if let Err(e) = config.schedule.validate() {
                    self.logger.log_warning(
                        &format!("Schedule is invalid, enforcement stays off: {}", e),
                        None,
                    );
                }
                self.logger
                    .log_config_reload(config.managed_paths.len(), &config.schedule.describe());
                self.config = config;
            }
            Err(e) => {
                self.logger.log_error(
                    &format!("Failed to reload config, keeping previous: {}", e),
                    Some("reload"),
                );
                return None;
            }
        }

        match self.state {
            DaemonState::Active => {
                self.establish_watches();
                None
            }
            DaemonState::Inactive => Some(
                self.config
                    .schedule
                    .time_until_next_window(&self.clock.now()),
            ),
        }
    }

    /// Unlock everything and stop watching
    fn shutdown(&mut self, reason: &str) {
        self.logger.log_shutdown(reason);

        // Pick up paths added since the last tick
        if let Ok(config) = self.store.load() {
            self.config = config;
        }

        self.unlock_all();
        self.teardown_watches();
        self.state = DaemonState::Inactive;
        self.logger.flush();
    }

    /// Relock the managed paths an event belongs to
    fn handle_event(&mut self, event_path: &Path) {
        if self.state != DaemonState::Active || self.is_config_event(event_path) {
            return;
        }

        // The CLI edits the config before touching the files, so an unlock
        // event can arrive ahead of the reload signal
        match self.store.load() {
            Ok(config) => self.config = config,
            Err(e) => log::debug!("Matching event against previous config: {}", e),
        }

        let now = self.clock.now();
        let owners: Vec<String> = self
            .config
            .managed_paths
            .iter()
            .filter(|managed| owns(Path::new(managed.as_str()), event_path))
            .filter(|managed| !self.config.exclusions.is_excluded(managed, now))
            .cloned()
            .collect();

        for managed in owners {
            // Our own lock operations echo back as attribute events
            if self.fully_locked(Path::new(&managed)) {
                log::debug!("Event on {} ignored, already locked", event_path.display());
                continue;
            }

            self.logger.log_manual_change(&managed, event_path);
            if let Err(e) = self
                .notifier
                .notify(NOTIFICATION_TITLE, &manual_change_message(&managed))
            {
                self.logger
                    .log_warning(&format!("Failed to send notification: {}", e), None);
            }
            if let Err(e) = self.enforce(&managed, "manual_change") {
                self.logger.log_error(&e.to_string(), Some("event"));
            }
        }
    }

    fn is_config_event(&self, event_path: &Path) -> bool {
        let config_dir = self.store.config_dir();
        event_path == self.store.config_path() || event_path.starts_with(&config_dir)
    }

    fn fully_locked(&self, managed: &Path) -> bool {
        managed.exists()
            && expand_managed(managed)
                .iter()
                .all(|entry| matches!(self.locker.is_locked(entry), Ok(true)))
    }

    /// Verify and (re)apply the lock on every non-excluded managed path
    fn sweep(&mut self) {
        let now = self.clock.now();
        for managed in self.config.managed_paths.clone() {
            if self.config.exclusions.is_excluded(&managed, now) {
                continue;
            }
            if let Err(e) = self.enforce(&managed, "sweep") {
                self.logger.log_error(&e.to_string(), Some("sweep"));
                break;
            }
        }
    }

    /// Lock every entry of one managed path.
    /// Only `Unsupported` is returned; other failures are logged per entry.
    fn enforce(&self, managed: &str, reason: &str) -> Result<(), LockError> {
        let root = Path::new(managed);
        if !root.exists() {
            self.logger
                .log_warning(&format!("Path no longer exists: {}", managed), None);
            return Ok(());
        }

        for entry in expand_managed(root) {
            match self.locker.is_locked(&entry) {
                Ok(true) => continue,
                Ok(false) => {
                    if reason == "sweep" {
                        self.logger.log_warning(
                            &format!("Lock removed from {}, re-applying", entry.display()),
                            None,
                        );
                    }
                }
                Err(e @ LockError::Unsupported(_)) => return Err(e),
                Err(e) => log::debug!("Lock state of {} unknown: {}", entry.display(), e),
            }

            match self.locker.lock(&entry) {
                Ok(()) => self.logger.log_lock(&entry, reason),
                Err(e @ LockError::Unsupported(_)) => return Err(e),
                Err(e) => self.logger.log_error(
                    &format!("Failed to lock {}: {}", entry.display(), e),
                    Some(reason),
                ),
            }
        }
        Ok(())
    }

    /// Single bounded unlock pass over every managed path
    fn unlock_all(&self) {
        for managed in &self.config.managed_paths {
            let root = Path::new(managed.as_str());
            if !root.exists() {
                continue;
            }
            for entry in expand_managed(root) {
                match self.locker.unlock(&entry) {
                    Ok(()) => self.logger.log_unlock(&entry),
                    Err(e @ LockError::Unsupported(_)) => {
                        self.logger.log_error(&e.to_string(), Some("unlock"));
                        return;
                    }
                    Err(e) => self.logger.log_error(
                        &format!("Failed to unlock {}: {}", entry.display(), e),
                        Some("unlock"),
                    ),
                }
            }
        }
    }

    /// Subscribe to every managed path and its parent directory
    fn establish_watches(&mut self) {
        self.watcher.unwatch_all();

        for managed in &self.config.managed_paths {
            let path = Path::new(managed.as_str());
            if path.exists() {
                if let Err(e) = self.watcher.watch(path, path.is_dir()) {
                    self.logger.log_warning(&e.to_string(), Some("watch"));
                }
            } else {
                self.logger
                    .log_warning(&format!("Not watching missing path {}", managed), None);
            }
            if let Some(parent) = path.parent().filter(|p| p.exists()) {
                if let Err(e) = self.watcher.watch(parent, false) {
                    self.logger.log_warning(&e.to_string(), Some("watch"));
                }
            }
        }

        self.watch_set = self.config.managed_paths.clone();
    }

    fn teardown_watches(&mut self) {
        self.watcher.unwatch_all();
        self.watch_set.clear();
    }
}

/// Run lock-primitive work (child processes) off the async worker when the
/// runtime allows it. Current-thread runtimes run it inline.
fn blocking<T>(work: impl FnOnce() -> T) -> T {
    use tokio::runtime::{Handle, RuntimeFlavor};

    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

/// The managed path is the event path itself or one of its ancestors
fn owns(managed: &Path, event_path: &Path) -> bool {
    event_path.starts_with(managed)
}

/// Forward SIGTERM / SIGINT as termination and SIGHUP as reload
pub fn forward_signals(handle: DaemonHandle) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to register SIGHUP")?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    handle.send(DaemonMessage::Terminate("received SIGTERM"));
                    break;
                }
                _ = sigint.recv() => {
                    handle.send(DaemonMessage::Terminate("received SIGINT"));
                    break;
                }
                _ = sighup.recv() => {
                    if !handle.reload() {
                        break;
                    }
                }
            }
        }
    }))
}

/// Run the enforcement daemon in the foreground until terminated
pub async fn run_daemon() -> Result<()> {
    if is_daemon_running() {
        anyhow::bail!("Daemon already running, please stop it first.");
    }

    let logger = DaemonLogger::new(APP_SUBSYSTEM, DAEMON_CATEGORY, LogLevel::Info)?;
    let locker = platform_locker();
    let store = Arc::new(
        FileConfigStore::default_location()
            .context("Failed to resolve config directory")?
            .with_locker(locker.clone()),
    );
    let config_path = store.config_path();

    let (handle, inbox) = DaemonHandle::channel();
    let watcher =
        NotifyWatcher::new(handle.watch_sink()).context("Failed to create filesystem watcher")?;

    let daemon = Daemon::new(
        Collaborators {
            store,
            locker: locker.clone(),
            watcher: Box::new(watcher),
            notifier: Arc::new(DesktopNotifier),
            clock: Arc::new(SystemClock),
            logger: logger.clone(),
        },
        inbox,
    )
    .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    let signals = forward_signals(handle.clone())?;
    logger.log_startup(&config_path, std::process::id(), locker.name());

    daemon.run().await;
    signals.abort();
    Ok(())
}

/// Check if a daemon process is already running
pub fn is_daemon_running() -> bool {
    !find_daemon_pids().is_empty()
}

/// PIDs of running `hourlock daemon run` processes, excluding this one and sudo wrappers
pub fn find_daemon_pids() -> Vec<u32> {
    use sysinfo::{ProcessesToUpdate, System};

    let mut system = System::new_all();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let current_pid = std::process::id();

    system
        .processes()
        .iter()
        .filter_map(|(pid, process)| {
            let pid_u32 = pid.as_u32();
            if pid_u32 == current_pid {
                return None;
            }

            let cmd = process.cmd();
            let is_ours = cmd
                .first()
                .map(|arg0| Path::new(arg0).file_name() == Some(std::ffi::OsStr::new(APP_NAME)))
                .unwrap_or(false);
            let has_daemon = cmd.iter().any(|arg| arg == DAEMON_SUBCOMMAND);
            let has_run = cmd.iter().any(|arg| arg == DAEMON_RUN_SUBCOMMAND);
            let is_sudo = process.name() == "sudo";

            (is_ours && has_daemon && has_run && !is_sudo).then_some(pid_u32)
        })
        .collect()
}

/// Send `signal` to every running daemon; returns how many were signalled
pub fn signal_daemon(signal: nix::sys::signal::Signal) -> Result<usize> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let pids = find_daemon_pids();
    for pid in &pids {
        let raw = i32::try_from(*pid).context("PID out of range")?;
        kill(Pid::from_raw(raw), signal)
            .with_context(|| format!("Failed to send {} to daemon (pid {})", signal, pid))?;
    }
    Ok(pids.len())
}

/// Ask a running daemon to reload, ignoring the case where none runs
pub fn notify_daemon_reload() {
    match signal_daemon(nix::sys::signal::Signal::SIGHUP) {
        Ok(0) => {}
        Ok(_) => log::info!("Signalled daemon to reload"),
        Err(e) => eprintln!("Warning: failed to signal daemon: {:#}", e),
    }
}

/// Path the daemon treats as config, for display
pub fn default_config_path() -> Result<PathBuf> {
    Ok(FileConfigStore::default_location()?.config_path())
}
