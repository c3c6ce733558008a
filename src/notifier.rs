//! Best-effort desktop notifications

use anyhow::{bail, Context, Result};
use std::process::{Command, Stdio};

use crate::constants::APP_NAME;

/// Delivers a user-visible alert
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str) -> Result<()>;
}

/// Shells out to the platform notification tool
#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<()> {
        if cfg!(target_os = "macos") {
            notify_macos(title, message)
        } else if cfg!(target_os = "linux") {
            notify_linux(title, message)
        } else {
            bail!("Notifications are not supported on {}", std::env::consts::OS)
        }
    }
}

fn notify_macos(title: &str, message: &str) -> Result<()> {
    let script = format!(
        "display notification \"{}\" with title \"{}\"",
        applescript_escape(message),
        applescript_escape(title)
    );

    run_quiet(Command::new("osascript").args(["-e", &script]))
        .context("Failed to send macOS notification")
}

fn notify_linux(title: &str, message: &str) -> Result<()> {
    let notify_send = run_quiet(
        Command::new("notify-send").args([title, message, "-u", "critical", "-t", "5000"]),
    );
    if notify_send.is_ok() {
        return Ok(());
    }

    let gdbus = run_quiet(Command::new("gdbus").args([
        "call",
        "--session",
        "--dest=org.freedesktop.Notifications",
        "--object-path=/org/freedesktop/Notifications",
        "--method=org.freedesktop.Notifications.Notify",
        APP_NAME,
        "0",
        "dialog-warning",
        title,
        message,
        "[]",
        "{}",
        "5000",
    ]));
    if gdbus.is_ok() {
        return Ok(());
    }

    // Nobody to show it to
    if std::env::var_os("DISPLAY").is_none() && std::env::var_os("WAYLAND_DISPLAY").is_none() {
        log::debug!("No graphical session, dropping notification: {}", title);
        return Ok(());
    }

    notify_send.context("Failed to send desktop notification")
}

fn run_quiet(cmd: &mut Command) -> Result<()> {
    let status = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("Failed to spawn notification tool")?;
    if !status.success() {
        bail!("Notification tool exited with {}", status);
    }
    Ok(())
}

fn applescript_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Text of the alert raised when an enforced path was modified
pub fn manual_change_message(path: &str) -> String {
    let name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    format!(
        "Detected manual change to locked path: {}\n{} will re-apply the lock.",
        name, APP_NAME
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applescript_escape() {
        assert_eq!(applescript_escape(r#"say "hi" \ bye"#), r#"say \"hi\" \\ bye"#);
    }

    #[test]
    fn test_manual_change_message_uses_file_name() {
        let msg = manual_change_message("/home/u/.config/nvim");
        assert!(msg.starts_with("Detected manual change to locked path: nvim\n"));
    }
}
