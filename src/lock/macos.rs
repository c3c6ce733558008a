//! macOS system-immutable flag

use std::path::Path;

use super::{run_tool, LockError, Locker, Primitive};

const CHFLAGS: Primitive = Primitive {
    name: "chflags",
    program: "chflags",
    set_args: &["schg"],
    clear_args: &["noschg"],
};

/// Locks through the BSD `schg` flag; clearing it needs root
#[derive(Debug, Clone, Copy, Default)]
pub struct MacLocker;

impl Locker for MacLocker {
    fn name(&self) -> &'static str {
        CHFLAGS.name
    }

    fn lock(&self, path: &Path) -> Result<(), LockError> {
        CHFLAGS.lock(path)
    }

    fn unlock(&self, path: &Path) -> Result<(), LockError> {
        CHFLAGS.unlock(path)
    }

    fn is_locked(&self, path: &Path) -> Result<bool, LockError> {
        CHFLAGS.is_locked(path, query_schg)
    }
}

fn query_schg(path: &Path) -> Result<bool, String> {
    let stdout = run_tool("stat", &["-f", "%Sf"], path)?;
    Ok(parse_flags(&stdout))
}

/// `stat -f %Sf` prints a comma-separated flag list, or `-` when empty
fn parse_flags(stdout: &str) -> bool {
    stdout.trim().split(',').any(|flag| flag.trim() == "schg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        assert!(parse_flags("schg\n"));
        assert!(parse_flags("uchg,schg\n"));
        assert!(!parse_flags("-\n"));
        assert!(!parse_flags("uchg\n"));
    }
}
