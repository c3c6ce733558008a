//! Configuration management shared by the daemon and the CLI
//!
//! Handles TOML configuration parsing, validation, and atomic updates.
//! Every read-modify-write goes through an exclusive advisory lock on a
//! sidecar file so concurrent CLI invocations and the daemon never interleave.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::constants::{
    APP_NAME, CONFIG_DIR_ENV, CONFIG_FILE_NAME, CONFIG_LOCK_FILE_NAME,
    DEFAULT_TEMP_EXCLUSION_MINUTES,
};
use crate::exclusions::ExclusionSet;
use crate::lock::Locker;
use crate::schedule::{Schedule, ScheduleError};

/// Persisted configuration
///
/// Field order matters for TOML output: plain values precede tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Absolute paths under enforcement, unique, in insertion order
    #[serde(default)]
    pub managed_paths: Vec<String>,
    /// Default duration of a temporary exclusion
    #[serde(default = "default_temp_minutes")]
    pub temp_exclusion_default_minutes: u32,
    /// When enforcement is active
    pub schedule: Schedule,
    /// Temporary exemptions, path -> RFC 3339 expiry
    #[serde(default)]
    pub exclusions: ExclusionSet,
}

fn default_temp_minutes() -> u32 {
    DEFAULT_TEMP_EXCLUSION_MINUTES
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found at {}. Run 'hourlock init' first", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Managed path must be absolute: {0}")]
    RelativePath(String),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("Could not determine the config directory")]
    NoConfigDir,
}

impl Config {
    pub fn new(schedule: Schedule, temp_exclusion_default_minutes: u32) -> Self {
        Self {
            managed_paths: Vec::new(),
            temp_exclusion_default_minutes,
            schedule,
            exclusions: ExclusionSet::new(),
        }
    }

    /// Insert a managed path; false when it was already present
    pub fn add_path(&mut self, path: &str) -> bool {
        if self.managed_paths.iter().any(|p| p == path) {
            return false;
        }
        self.managed_paths.push(path.to_string());
        true
    }

    /// Remove a managed path together with any exclusion for it
    pub fn remove_path(&mut self, path: &str) -> bool {
        let before = self.managed_paths.len();
        self.managed_paths.retain(|p| p != path);
        self.exclusions.remove(path);
        self.managed_paths.len() != before
    }

    pub fn is_managed(&self, path: &str) -> bool {
        self.managed_paths.iter().any(|p| p == path)
    }

    /// Strict validation applied before the CLI writes a config
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_paths()?;
        self.schedule.validate()?;
        Ok(())
    }

    /// Every managed path must be absolute. Checked on every load; the
    /// schedule is not, since an invalid one only keeps enforcement off.
    pub fn validate_paths(&self) -> Result<(), ConfigError> {
        match self
            .managed_paths
            .iter()
            .find(|p| !Path::new(p.as_str()).is_absolute())
        {
            Some(relative) => Err(ConfigError::RelativePath(relative.clone())),
            None => Ok(()),
        }
    }
}

/// Load/save collaborator consumed by the daemon
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Config, ConfigError>;

    /// Atomic, exclusive write
    fn save(&self, config: &Config) -> Result<(), ConfigError>;

    /// Load, apply `apply`, and save when it reports a change, all under one
    /// exclusive critical section. Returns the resulting config.
    fn update(&self, apply: &mut dyn FnMut(&mut Config) -> bool) -> Result<Config, ConfigError>;

    /// Location of the config file; filesystem events on it are ignored
    fn config_path(&self) -> PathBuf;

    /// Directory holding the config; filesystem events beneath it are ignored
    fn config_dir(&self) -> PathBuf;
}

/// TOML file store under the user's config directory
#[derive(Clone)]
pub struct FileConfigStore {
    dir: PathBuf,
    locker: Option<Arc<dyn Locker>>,
}

impl std::fmt::Debug for FileConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConfigStore")
            .field("dir", &self.dir)
            .field("locker", &self.locker.as_ref().map(|l| l.name()))
            .finish()
    }
}

impl FileConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locker: None,
        }
    }

    /// Store at `$HOURLOCK_CONFIG_DIR`, or `<config dir>/hourlock`
    pub fn default_location() -> Result<Self, ConfigError> {
        Ok(Self::new(default_config_dir()?))
    }

    /// Use `locker` to lift and restore immutability on the config file
    /// itself when it is a managed path.
    pub fn with_locker(mut self, locker: Arc<dyn Locker>) -> Self {
        self.locker = Some(locker);
        self
    }

    pub fn exists(&self) -> bool {
        self.config_path().exists()
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(CONFIG_LOCK_FILE_NAME)
    }

    /// Acquire the exclusive critical section; released when the file drops
    fn acquire(&self) -> Result<File, ConfigError> {
        fs::create_dir_all(&self.dir).map_err(|source| ConfigError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
        file.lock_exclusive()
            .map_err(|source| ConfigError::Io { path, source })?;
        Ok(file)
    }

    fn read(&self) -> Result<Config, ConfigError> {
        let path = self.config_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path));
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        let config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate_paths()?;
        Ok(config)
    }

    fn write(&self, config: &Config) -> Result<(), ConfigError> {
        let path = self.config_path();
        let content = toml::to_string_pretty(config)?;

        let relock = self.lift_lock(&path);
        let result = write_atomic(&self.dir, &path, content.as_bytes());
        if relock {
            if let Some(locker) = &self.locker {
                if let Err(e) = locker.lock(&path) {
                    log::error!("Failed to re-lock config {} after writing: {}", path.display(), e);
                }
            }
        }
        result
    }

    /// Unlock the config file if it is currently locked; true when it must be re-locked
    fn lift_lock(&self, path: &Path) -> bool {
        let Some(locker) = &self.locker else {
            return false;
        };
        if !path.exists() || !matches!(locker.is_locked(path), Ok(true)) {
            return false;
        }
        match locker.unlock(path) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to unlock config {} for writing: {}", path.display(), e);
                false
            }
        }
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Config, ConfigError> {
        self.read()
    }

    fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let _guard = self.acquire()?;
        self.write(config)
    }

    fn update(&self, apply: &mut dyn FnMut(&mut Config) -> bool) -> Result<Config, ConfigError> {
        let _guard = self.acquire()?;
        let mut config = self.read()?;
        if apply(&mut config) {
            self.write(&config)?;
        }
        Ok(config)
    }

    fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    fn config_dir(&self) -> PathBuf {
        self.dir.clone()
    }
}

/// Resolve the config directory, honouring `HOURLOCK_CONFIG_DIR`
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::config_dir()
        .map(|d| d.join(APP_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

/// Write to a temporary file in `dir` and rename it over `target`
fn write_atomic(dir: &Path, target: &Path, content: &[u8]) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: target.to_path_buf(),
        source,
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(content).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600)).map_err(io_err)?;
    tmp.persist(target).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use tempfile::tempdir;

    fn sample() -> Config {
        let mut config = Config::new(Schedule::range("08:00", "17:00", vec![1, 2, 3, 4, 5]), 5);
        config.add_path("/home/u/.zshrc");
        config.add_path("/home/u/.config/nvim");
        let now = Local.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        config.exclusions.add("/home/u/.zshrc", 10, now);
        config
    }

    #[test]
    fn test_add_path_deduplicates() {
        let mut config = sample();
        assert!(!config.add_path("/home/u/.zshrc"));
        assert_eq!(config.managed_paths.len(), 2);
    }

    #[test]
    fn test_remove_path_drops_exclusion() {
        let mut config = sample();
        assert!(config.remove_path("/home/u/.zshrc"));
        assert!(!config.is_managed("/home/u/.zshrc"));
        assert!(config.exclusions.is_empty());
        assert!(!config.remove_path("/home/u/.zshrc"));
    }

    #[test]
    fn test_validate_rejects_relative_paths() {
        let mut config = sample();
        assert!(config.validate().is_ok());
        config.add_path("relative/file");
        assert!(matches!(config.validate(), Err(ConfigError::RelativePath(_))));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::new(dir.path());
        let config = sample();

        store.save(&config).unwrap();
        assert_eq!(store.load().unwrap(), config);

        let cron = Config::new(Schedule::cron("0 9 * * Mon-Fri"), 15);
        store.save(&cron).unwrap();
        assert_eq!(store.load().unwrap(), cron);
    }

    #[test]
    fn test_saved_file_is_private() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::new(dir.path());
        store.save(&sample()).unwrap();

        let mode = fs::metadata(store.config_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_missing_config_reports_not_found() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("absent"));
        assert!(matches!(store.load(), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_update_saves_only_on_change() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::new(dir.path());
        store.save(&sample()).unwrap();

        let updated = store.update(&mut |cfg| cfg.add_path("/etc/hosts")).unwrap();
        assert!(updated.is_managed("/etc/hosts"));
        assert!(store.load().unwrap().is_managed("/etc/hosts"));

        let modified_before = fs::metadata(store.config_path()).unwrap().modified().unwrap();
        store.update(&mut |cfg| cfg.add_path("/etc/hosts")).unwrap();
        let modified_after = fs::metadata(store.config_path()).unwrap().modified().unwrap();
        assert_eq!(modified_before, modified_after);
    }

    #[test]
    fn test_load_rejects_relative_paths() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::new(dir.path());
        fs::write(
            store.config_path(),
            r#"
managed_paths = ["/etc/hosts", ".zshrc"]

[schedule]
cron = "0 9 * * *"
"#,
        )
        .unwrap();

        assert!(matches!(store.load(), Err(ConfigError::RelativePath(p)) if p == ".zshrc"));
        assert!(store.update(&mut |_| false).is_err());
    }

    #[test]
    fn test_load_accepts_invalid_schedule() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::new(dir.path());
        fs::write(
            store.config_path(),
            r#"
managed_paths = ["/etc/hosts"]

[schedule]
start_time = "17:00"
end_time = "08:00"
days = [1, 2, 3]
"#,
        )
        .unwrap();

        let config = store.load().unwrap();
        assert!(config.validate().is_err());
        assert!(!config.schedule.is_within_window(&Local::now()));
    }

    #[test]
    fn test_parse_minimal_file() {
        let parsed: Config = toml::from_str(
            r#"
managed_paths = ["/etc/hosts"]

[schedule]
cron = "0 9 * * *"
"#,
        )
        .unwrap();

        assert_eq!(parsed.temp_exclusion_default_minutes, DEFAULT_TEMP_EXCLUSION_MINUTES);
        assert!(parsed.exclusions.is_empty());
        assert_eq!(parsed.schedule, Schedule::cron("0 9 * * *"));
    }
}
