//! Async Reclaimer
//!
//! Moves a directory out of the way synchronously, then deletes it on a
//! detached background thread.
//!
//! ## Guarantees
//! - After `reclaim` returns `Ok`, the original path no longer exists
//! - Deletion failures are logged, never retried, never returned

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crate::error::Result;

/// Name of the trash directory under the engine root
pub const TRASH_DIR: &str = ".trash";

/// Renames directories into a trash location and deletes them in the background
pub struct Reclaimer {
    trash_dir: PathBuf,
    /// Disambiguates trash names created within the same millisecond
    sequence: AtomicU64,
}

impl Reclaimer {
    pub fn new(trash_dir: impl Into<PathBuf>) -> Self {
        Self {
            trash_dir: trash_dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn trash_dir(&self) -> &Path {
        &self.trash_dir
    }

    /// Move `dir` into the trash and delete it asynchronously
    ///
    /// Returns `Ok(None)` when `dir` does not exist. The returned handle may
    /// be dropped; the deletion thread is detached.
    pub fn reclaim(&self, dir: &Path) -> Result<Option<JoinHandle<()>>> {
        if !dir.exists() {
            return Ok(None);
        }

        fs::create_dir_all(&self.trash_dir)?;
        let target = self.trash_target(dir);
        fs::rename(dir, &target)?;
        tracing::debug!("Moved {} to {}", dir.display(), target.display());

        Ok(Some(spawn_delete(vec![target])?))
    }

    /// Delete anything left in the trash by a previous process
    pub fn sweep(&self) -> Result<Option<JoinHandle<()>>> {
        if !self.trash_dir.is_dir() {
            return Ok(None);
        }

        let leftovers = fs::read_dir(&self.trash_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        if leftovers.is_empty() {
            return Ok(None);
        }

        tracing::info!("Sweeping {} leftover trash entries", leftovers.len());
        Ok(Some(spawn_delete(leftovers)?))
    }

    fn trash_target(&self, dir: &Path) -> PathBuf {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dir".to_string());
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.trash_dir.join(format!(
            "{}-{}-{}",
            name,
            crate::health::now_millis(),
            seq
        ))
    }
}

fn spawn_delete(paths: Vec<PathBuf>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("spillway-reclaim".to_string())
        .spawn(move || {
            for path in paths {
                tracing::info!("Deleting: {}", path.display());
                let result = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                match result {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => tracing::error!("Failed to delete {}: {}", path.display(), e),
                }
            }
        })?;
    Ok(handle)
}
