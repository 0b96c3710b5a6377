//! Warm recovery scan
//!
//! Finds the snapshot a restarted process may reopen instead of building an
//! empty shard.
//!
//! ## Algorithm
//! 1. List the immediate subdirectories of `{root}/{shard}` (one per snapshot)
//! 2. Sort them newest-modified first
//! 3. Inside the newest one, find the most recently modified entry
//! 4. The snapshot is recoverable if that entry was touched within the window

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::Result;

/// One snapshot directory found under a shard root
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    /// Directory name (the snapshot's database name)
    pub name: String,
    pub path: PathBuf,
    /// Modification time of the directory itself
    pub modified: SystemTime,
}

/// Result of scanning a shard root
#[derive(Debug, Default)]
pub struct SnapshotScan {
    /// Newest snapshot, if it is recent enough to reopen
    pub recoverable: Option<SnapshotDir>,
    /// Every other snapshot directory (candidates for reclaiming)
    pub stale: Vec<SnapshotDir>,
}

/// List snapshot directories, newest first
///
/// A missing shard root yields an empty list.
pub fn list_snapshots(shard_dir: &Path) -> Result<Vec<SnapshotDir>> {
    if !shard_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut snapshots = Vec::new();
    for entry in fs::read_dir(shard_dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_dir() {
            continue;
        }
        snapshots.push(SnapshotDir {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path(),
            modified: metadata.modified()?,
        });
    }

    snapshots.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(snapshots)
}

/// Modification time of the most recently touched entry inside `dir`
pub fn newest_entry_modified(dir: &Path) -> Result<Option<SystemTime>> {
    let mut newest: Option<SystemTime> = None;
    for entry in fs::read_dir(dir)? {
        let modified = entry?.metadata()?.modified()?;
        newest = Some(match newest {
            Some(current) if current >= modified => current,
            _ => modified,
        });
    }
    Ok(newest)
}

/// Scan a shard root and decide whether its newest snapshot can be reopened
pub fn scan(shard_dir: &Path, window: Duration, now: SystemTime) -> Result<SnapshotScan> {
    let mut snapshots = list_snapshots(shard_dir)?.into_iter();

    let Some(newest) = snapshots.next() else {
        return Ok(SnapshotScan::default());
    };
    let mut stale: Vec<SnapshotDir> = snapshots.collect();

    let recent = match newest_entry_modified(&newest.path)? {
        Some(modified) => modified
            .checked_add(window)
            .map_or(true, |deadline| deadline > now),
        None => false,
    };

    if recent {
        Ok(SnapshotScan {
            recoverable: Some(newest),
            stale,
        })
    } else {
        stale.insert(0, newest);
        Ok(SnapshotScan {
            recoverable: None,
            stale,
        })
    }
}
