//! Pool Lifecycle Manager
//!
//! Lazily builds, recovers and disposes the per-shard pools.
//!
//! ## Concurrency Model: single build permit, fail-open
//!
//! - Lookups of an existing pool take a short read lock on the shard slot
//! - Building a pool is slow (directory creation, file open, DDL), so it is
//!   never done under a lock other callers wait on. A single process-wide
//!   `building` flag is claimed with compare-and-swap:
//!   - winner: builds the pool, installs it, releases the flag
//!   - losers: get `None` immediately and treat the shard as absent
//! - At most one shard build runs at a time, system-wide

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::config::Config;
use crate::error::Result;
use crate::health::ShardHealth;

use super::reclaimer::{Reclaimer, TRASH_DIR};
use super::recovery::{self, SnapshotScan};
use super::schema::Schema;
use super::ShardPool;

/// Owns the pool slot of every shard
pub struct PoolManager {
    config: Config,
    schema: Arc<Schema>,
    health: Arc<ShardHealth>,
    reclaimer: Reclaimer,
    slots: Vec<RwLock<Option<Arc<ShardPool>>>>,
    /// Single-slot, non-blocking build permit
    building: AtomicBool,
}

/// Releases the build permit when dropped
struct BuildPermit<'a>(&'a AtomicBool);

impl Drop for BuildPermit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PoolManager {
    pub fn new(config: Config, schema: Arc<Schema>, health: Arc<ShardHealth>) -> Self {
        let reclaimer = Reclaimer::new(config.root_dir.join(TRASH_DIR));
        let slots = (0..config.number_of_dbs).map(|_| RwLock::new(None)).collect();
        Self {
            config,
            schema,
            health,
            reclaimer,
            slots,
            building: AtomicBool::new(false),
        }
    }

    /// Number of shards
    pub fn shards(&self) -> usize {
        self.slots.len()
    }

    /// Root directory of a shard (parent of its snapshots)
    pub fn shard_dir(&self, shard: usize) -> PathBuf {
        self.config.root_dir.join(shard.to_string())
    }

    pub fn reclaimer(&self) -> &Reclaimer {
        &self.reclaimer
    }

    /// Current pool of a shard, without building one
    pub fn current(&self, shard: usize) -> Option<Arc<ShardPool>> {
        self.slots.get(shard)?.read().as_ref().map(Arc::clone)
    }

    /// Get the pool of a shard, building it if this caller wins the permit
    ///
    /// Never blocks on another builder. With `startup` set, the newest
    /// on-disk snapshot is reopened when recent enough.
    pub fn get(&self, shard: usize, startup: bool) -> Option<Arc<ShardPool>> {
        if let Some(pool) = self.current(shard) {
            return Some(pool);
        }
        if shard >= self.slots.len() {
            return None;
        }

        if self
            .building
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Shard {} unavailable: another build is in progress", shard);
            return None;
        }
        let _permit = BuildPermit(&self.building);

        // Another builder may have installed it between our lookup and the permit
        if let Some(pool) = self.current(shard) {
            return Some(pool);
        }

        tracing::info!("Initializing cache shard {}", shard);
        let built = if startup {
            self.recover_latest(shard)
        } else {
            self.create(shard)
        };
        self.health.reset(shard);

        match built {
            Ok(pool) => {
                let pool = Arc::new(pool);
                *self.slots[shard].write() = Some(Arc::clone(&pool));
                Some(pool)
            }
            Err(e) => {
                tracing::error!("Failed to build cache shard {}: {}", shard, e);
                None
            }
        }
    }

    /// Close a shard's pool; with `trash`, also move its directory away and
    /// delete it in the background
    pub fn dispose(&self, shard: usize, trash: bool) -> Result<()> {
        let Some(slot) = self.slots.get(shard) else {
            return Ok(());
        };

        let pool = slot.write().take();
        if let Some(pool) = pool {
            pool.close();
        }
        self.health.reset(shard);

        if trash {
            tracing::info!("Trashing cache shard {}", shard);
            self.reclaimer.reclaim(&self.shard_dir(shard))?;
        }
        Ok(())
    }

    /// Fresh, empty shard
    fn create(&self, shard: usize) -> Result<ShardPool> {
        tracing::info!("Building new cache shard {}", shard);
        let pool = ShardPool::create(&self.config, shard)?;
        self.create_tables(&pool)?;
        Ok(pool)
    }

    /// Reopen the newest snapshot if recent, otherwise build a fresh shard
    fn recover_latest(&self, shard: usize) -> Result<ShardPool> {
        let scan = recovery::scan(
            &self.shard_dir(shard),
            self.config.recover_on_restart(),
            SystemTime::now(),
        );
        self.recover_from(shard, scan)
    }

    /// Reopen the recoverable snapshot of `scan`, reclaiming the rest;
    /// a failed scan falls back to a fresh shard
    fn recover_from(&self, shard: usize, scan: Result<SnapshotScan>) -> Result<ShardPool> {
        let scan = match scan {
            Ok(scan) => scan,
            Err(e) => {
                tracing::warn!(
                    "Could not scan {} for recovery: {}",
                    self.shard_dir(shard).display(),
                    e
                );
                return self.create(shard);
            }
        };

        let mut recovered = None;
        if let Some(snapshot) = &scan.recoverable {
            tracing::info!("Recovering cache shard {}: {}", shard, snapshot.name);
            match self.reopen(shard, &snapshot.name) {
                Ok(pool) => recovered = Some(pool),
                Err(e) => tracing::warn!("Failed to recover cache shard {}: {}", shard, e),
            }
        }

        for snapshot in &scan.stale {
            self.reclaim_quietly(&snapshot.path);
        }

        match recovered {
            Some(pool) => Ok(pool),
            None => {
                if let Some(snapshot) = &scan.recoverable {
                    self.reclaim_quietly(&snapshot.path);
                }
                self.create(shard)
            }
        }
    }

    fn reopen(&self, shard: usize, database: &str) -> Result<ShardPool> {
        let pool = ShardPool::open(&self.config, shard, database)?;
        self.create_tables(&pool)?;
        Ok(pool)
    }

    fn create_tables(&self, pool: &ShardPool) -> Result<()> {
        if let Some(conn) = pool.connection()? {
            self.schema.create_tables(&conn)?;
        }
        Ok(())
    }

    fn reclaim_quietly(&self, dir: &Path) {
        if let Err(e) = self.reclaimer.reclaim(dir) {
            tracing::error!("Failed to reclaim {}: {}", dir.display(), e);
        }
    }
}
