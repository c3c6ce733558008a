//! CLI contract tests
//!
//! Every test points `HOURLOCK_CONFIG_DIR` at a temporary directory and uses a
//! schedule that never opens, so no command locks anything on disk.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Valid cron expression whose only trigger lies in the past
const NEVER: &str = "0 0 0 1 1 * 2000";

struct Env {
    tmp: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            tmp: tempfile::tempdir().unwrap(),
        }
    }

    fn config_dir(&self) -> PathBuf {
        self.tmp.path().join("cfg")
    }

    fn cmd(&self) -> Command {
        let mut cmd = assert_cmd::cargo_bin_cmd!("hourlock");
        cmd.env("HOURLOCK_CONFIG_DIR", self.config_dir());
        cmd
    }

    fn init(&self) {
        self.cmd().args(["init", "--cron", NEVER]).assert().success();
    }

    fn file(&self, name: &str) -> PathBuf {
        let path = self.tmp.path().join(name);
        fs::write(&path, "contents").unwrap();
        fs::canonicalize(path).unwrap()
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[test]
fn test_help_lists_commands() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("hourlock");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("temp-unlock"))
        .stdout(predicate::str::contains("schedule"))
        .stdout(predicate::str::contains("daemon"))
        .stdout(predicate::str::contains("unlock-all"));
}

#[test]
fn test_version_prints_semantic_version() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("hourlock");
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::is_match(r"hourlock \d+\.\d+\.\d+").unwrap());
}

#[test]
fn test_commands_require_init() {
    let env = Env::new();

    env.cmd()
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("hourlock init"));
}

#[test]
fn test_init_writes_config() {
    let env = Env::new();
    env.init();

    let content = fs::read_to_string(env.config_dir().join("config.toml")).unwrap();
    assert!(content.contains("managed_paths"));
    assert!(content.contains(NEVER));

    // The config file manages itself
    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_init_refuses_overwrite_without_force() {
    let env = Env::new();
    env.init();

    env.cmd()
        .args(["init", "--cron", NEVER])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn test_init_force_preserves_paths() {
    let env = Env::new();
    env.init();
    let file = env.file("settings.json");
    env.cmd().arg("add").arg(&file).assert().success();

    env.cmd()
        .args(["init", "--force", "--cron", NEVER])
        .assert()
        .success()
        .stdout(predicate::str::contains("Preserving 2 existing managed path(s)"));

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(display(&file)));
}

#[test]
fn test_add_list_rm() {
    let env = Env::new();
    env.init();
    let file = env.file(".zshrc");

    env.cmd()
        .arg("add")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Added file"))
        .stdout(predicate::str::contains("Outside enforcement window"));

    env.cmd()
        .arg("add")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("already managed"));

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(display(&file)));

    env.cmd()
        .arg("rm")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(display(&file)).not());

    // Removal leaves the file writable
    fs::write(&file, "edited").unwrap();
}

#[test]
fn test_add_directory() {
    let env = Env::new();
    env.init();
    let dir = env.tmp.path().join("nvim");
    fs::create_dir_all(&dir).unwrap();

    env.cmd()
        .arg("add")
        .arg(&dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Added directory"));
}

#[test]
fn test_add_missing_path_fails() {
    let env = Env::new();
    env.init();

    env.cmd()
        .arg("add")
        .arg(env.tmp.path().join("missing"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_rm_unmanaged_path_fails() {
    let env = Env::new();
    env.init();
    let file = env.file("other");

    env.cmd()
        .arg("rm")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not managed"));
}

#[test]
fn test_temp_unlock() {
    let env = Env::new();
    env.init();
    let file = env.file("init.lua");

    env.cmd()
        .arg("temp-unlock")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not managed"));

    env.cmd().arg("add").arg(&file).assert().success();
    env.cmd()
        .args(["temp-unlock", "--minutes", "30"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Temporarily unlocked"));

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("temporarily unlocked until"));

    let content = fs::read_to_string(env.config_dir().join("config.toml")).unwrap();
    assert!(content.contains("[exclusions]"));
}

#[test]
fn test_schedule_validation() {
    let env = Env::new();
    env.init();

    env.cmd()
        .args(["schedule", "--hours", "17:00-08:00"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be later"));

    env.cmd()
        .args(["schedule", "--cron", "every tuesday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid cron expression"));

    env.cmd()
        .args(["schedule", "--days", "0-3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid day"));

    env.cmd()
        .args(["schedule", "--cron", "0 9 * * *", "--hours", "8-17"])
        .assert()
        .failure();
}

#[test]
fn test_schedule_update() {
    let env = Env::new();
    env.init();

    env.cmd()
        .args(["schedule", "--hours", "0900-1230", "--days", "6,7", "--temp-minutes", "15"])
        .assert()
        .success()
        .stdout(predicate::str::contains("09:00 - 12:30 (Days: Sat, Sun)"));

    env.cmd()
        .arg("schedule")
        .assert()
        .success()
        .stdout(predicate::str::contains("15 minute(s)"));
}

#[test]
fn test_status_reports_closed_window() {
    let env = Env::new();
    env.init();

    env.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Schedule: cron"))
        .stdout(predicate::str::contains("Enforcement window: closed"))
        .stdout(predicate::str::contains("Managed paths: 1"));
}

#[test]
fn test_unlock_all() {
    let env = Env::new();
    env.init();
    let file = env.file("hosts");
    env.cmd().arg("add").arg(&file).assert().success();

    env.cmd()
        .arg("unlock-all")
        .assert()
        .success()
        .stdout(predicate::str::contains("Unlocked 2 managed path(s)"));
}
