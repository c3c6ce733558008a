//! Linux immutable attribute

use std::path::Path;

use super::{run_tool, LockError, Locker, Primitive};

const CHATTR: Primitive = Primitive {
    name: "chattr",
    program: "chattr",
    set_args: &["+i"],
    clear_args: &["-i"],
};

/// Locks through the ext2-family `i` attribute
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxLocker;

impl Locker for LinuxLocker {
    fn name(&self) -> &'static str {
        CHATTR.name
    }

    fn lock(&self, path: &Path) -> Result<(), LockError> {
        CHATTR.lock(path)
    }

    fn unlock(&self, path: &Path) -> Result<(), LockError> {
        CHATTR.unlock(path)
    }

    fn is_locked(&self, path: &Path) -> Result<bool, LockError> {
        CHATTR.is_locked(path, query_immutable)
    }
}

fn query_immutable(path: &Path) -> Result<bool, String> {
    let stdout = run_tool("lsattr", &["-d"], path)?;
    parse_lsattr(&stdout).ok_or_else(|| format!("unexpected lsattr output: {}", stdout.trim()))
}

/// `lsattr -d` prints `<flags> <path>`; the immutable flag is `i`
fn parse_lsattr(stdout: &str) -> Option<bool> {
    let flags = stdout.split_whitespace().next()?;
    Some(flags.contains('i'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsattr() {
        assert_eq!(
            parse_lsattr("----i---------e------- /home/u/.bashrc\n"),
            Some(true)
        );
        assert_eq!(
            parse_lsattr("--------------e------- /home/u/.bashrc\n"),
            Some(false)
        );
        assert_eq!(parse_lsattr(""), None);
    }
}
