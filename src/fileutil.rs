//! Path enumeration for managed directories

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::constants::VCS_METADATA_DIRS;

/// Regular files beneath `dir`, skipping version-control metadata directories.
///
/// Unreadable entries are skipped. Symlinks are not followed.
pub fn collect_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_vcs_metadata(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// Entries a managed path stands for: the files beneath a directory, or the path itself
pub fn expand_managed(path: &Path) -> Vec<PathBuf> {
    if path.is_dir() {
        collect_files(path)
    } else {
        vec![path.to_path_buf()]
    }
}

fn is_vcs_metadata(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| VCS_METADATA_DIRS.contains(&name))
}
