#![forbid(unsafe_code)]

//! Disk footprint accounting.
//!
//! The footprint is the sum of the sizes of every regular file under the
//! root that [`FileLayout::classify`] recognizes. Recency is the file's last
//! modification time; vending params for a cache touches both of its files.
//!
//! Eviction works per cache: files sharing a stem (data file and journal)
//! are ranked by the newest of their times and leave together.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use filetime::FileTime;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::layout::FileLayout;

/// One backend file found on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedFile {
    pub path: PathBuf,
    pub len: u64,
    pub modified: FileTime,
}

/// List every backend file directly under the layout root.
///
/// Entries that vanish or cannot be stat'ed mid-walk are skipped.
#[must_use]
pub fn scan(layout: &FileLayout) -> Vec<TrackedFile> {
    let root = layout.root();
    if !root.is_dir() {
        trace!(root = %root.display(), "cache root missing, footprint is empty");
        return Vec::new();
    }

    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| layout.classify(entry.path()).is_some())
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            Some(TrackedFile {
                path: entry.into_path(),
                len: meta.len(),
                modified: FileTime::from_last_modification_time(&meta),
            })
        })
        .collect()
}

/// Total size of `files` in bytes.
#[must_use]
pub fn total_size(files: &[TrackedFile]) -> u64 {
    files.iter().map(|f| f.len).sum()
}

/// Files to delete so that the remaining total is at most `target`.
///
/// Files are grouped by stem and whole groups are taken, least recently
/// used first; ties break on the stem. Files in `skip` still count toward
/// the total but are never selected. Returns an empty list when the total
/// already fits or nothing selectable is left. A single cache larger than
/// `target` is still selected.
#[must_use]
pub fn eviction_candidates(
    files: &[TrackedFile],
    target: u64,
    skip: &HashSet<PathBuf>,
) -> Vec<TrackedFile> {
    let mut remaining = total_size(files);
    if remaining <= target {
        return Vec::new();
    }

    let mut groups: BTreeMap<PathBuf, Vec<&TrackedFile>> = BTreeMap::new();
    for file in files.iter().filter(|f| !skip.contains(&f.path)) {
        groups.entry(file.path.with_extension("")).or_default().push(file);
    }

    let mut ordered: Vec<(FileTime, PathBuf, Vec<&TrackedFile>)> = groups
        .into_iter()
        .map(|(stem, mut members)| {
            members.sort_by(|a, b| a.path.cmp(&b.path));
            let newest = members
                .iter()
                .map(|f| f.modified)
                .max()
                .unwrap_or_else(FileTime::zero);
            (newest, stem, members)
        })
        .collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut selected = Vec::new();
    for (_, _, members) in ordered {
        if remaining <= target {
            break;
        }
        for file in members {
            remaining = remaining.saturating_sub(file.len);
            selected.push(file.clone());
        }
    }
    selected
}

/// Mark `path` as just used.
pub fn touch(path: &Path) {
    let now = FileTime::now();
    if let Err(e) = filetime::set_file_times(path, now, now) {
        debug!(path = %path.display(), error = %e, "touch failed");
    }
}

/// Remove `path`, treating an already-missing file as removed.
///
/// Returns `Ok(true)` if this call deleted it.
pub(crate) fn remove(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
