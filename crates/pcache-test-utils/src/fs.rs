//! Filesystem inspection helpers.

use std::path::{Path, PathBuf};

use filetime::FileTime;
use walkdir::WalkDir;

/// All regular files under `root`, recursively.
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Number of regular files under `root`, recursively.
pub fn file_count(root: &Path) -> usize {
    files_under(root).len()
}

/// Sum of the sizes of all regular files under `root`.
pub fn total_size(root: &Path) -> u64 {
    files_under(root)
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

/// Files under `root` ordered oldest-modified first (ties broken by path).
pub fn files_by_mtime(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<(FileTime, PathBuf)> = files_under(root)
        .into_iter()
        .map(|p| {
            let meta = std::fs::metadata(&p).unwrap();
            (FileTime::from_last_modification_time(&meta), p)
        })
        .collect();
    files.sort();
    files.into_iter().map(|(_, p)| p).collect()
}

/// Set both access and modification time of `path` to `unix_secs`.
pub fn set_file_time(path: &Path, unix_secs: i64) {
    let t = FileTime::from_unix_time(unix_secs, 0);
    filetime::set_file_times(path, t, t).unwrap();
}
