//! Engine Module
//!
//! The storage engine façade that coordinates all components.
//!
//! ## Responsibilities
//! - Route every `(group, key)` to a shard and table
//! - Borrow connections from the shard pools (building shards lazily)
//! - Keep known-unencodable entries out of the backend
//! - Count failures per shard and rebuild shards that keep failing
//! - Group-wide and full flushes
//!
//! ## Error Policy
//! Nothing thrown by the backend crosses the public cache operations:
//! reads degrade to `None`, writes to a no-op, and every failure is counted
//! against the shard it happened on (warning logs are rate limited).

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{BincodeCodec, PayloadCodec};
use crate::config::Config;
use crate::error::{Result, SpillError};
use crate::exclusion::ExclusionSet;
use crate::health::ShardHealth;
use crate::routing::{Fingerprint, ShardRouter};
use crate::storage::{PoolManager, Schema, ShardConnection};

/// The sharded storage engine
///
/// ## Concurrency Model
///
/// - No global lock: operations on different shards never contend
/// - Shard pools are built one at a time; a caller that finds a build in
///   progress treats the shard as absent (miss / no-op) instead of waiting
/// - Per-shard error counters and the exclusion set are internally
///   synchronized and shared by all callers
/// - Group and full flushes are sequences of independent per-table
///   statements; readers may observe a partially flushed group
///
/// Share one engine between all regions with `Arc<StorageEngine>`.
pub struct StorageEngine<C: PayloadCodec = BincodeCodec> {
    /// Engine configuration
    config: Config,

    /// Identity → (shard, table)
    router: ShardRouter,

    /// Pre-rendered SQL for every table
    schema: Arc<Schema>,

    /// Lazily built shard pools
    pools: PoolManager,

    /// Per-shard error counters and log rate limit
    health: Arc<ShardHealth>,

    /// Identities that failed to encode
    exclusions: ExclusionSet,

    /// Payload serialization
    codec: C,

    /// Consecutive failed truncating full flushes
    failed_flushes: AtomicU32,

    initialized: AtomicBool,
}

impl StorageEngine<BincodeCodec> {
    /// Create an engine using the default bincode payload codec
    ///
    /// Shards are not built until [`StorageEngine::init`] or first use.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_codec(config, BincodeCodec)
    }
}

impl<C: PayloadCodec> StorageEngine<C> {
    /// Create an engine with a custom payload codec
    pub fn with_codec(config: Config, codec: C) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.root_dir)?;

        let router = ShardRouter::new(config.number_of_dbs, config.tables_per_db);
        let schema = Arc::new(Schema::new(config.tables_per_db));
        let health = Arc::new(ShardHealth::new(
            config.number_of_dbs,
            config.error_log_interval_ms,
            config.recover_after_errors,
        ));
        let pools = PoolManager::new(config.clone(), Arc::clone(&schema), Arc::clone(&health));
        let exclusions = ExclusionSet::new(config.exclusion_capacity);

        Ok(Self {
            config,
            router,
            schema,
            pools,
            health,
            exclusions,
            codec,
            failed_flushes: AtomicU32::new(0),
            initialized: AtomicBool::new(false),
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Build every shard, reopening recent snapshots from a previous run
    pub fn init(&self) -> Result<()> {
        if let Err(e) = self.pools.reclaimer().sweep() {
            tracing::warn!("Could not sweep trash: {}", e);
        }

        for shard in 0..self.pools.shards() {
            if self.pools.get(shard, true).is_none() {
                tracing::warn!(
                    "Shard {} not built during init; it will be built on first use",
                    shard
                );
            }
        }

        self.initialized.store(true, Ordering::Release);
        tracing::info!(
            "Storage engine initialized: {} shards x {} tables at {}",
            self.config.number_of_dbs,
            self.config.tables_per_db,
            self.config.root_dir.display()
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Close every shard pool, keeping on-disk data for warm recovery
    pub fn shutdown(&self) {
        self.initialized.store(false, Ordering::Release);
        self.dispose(false);
    }

    /// Dispose every shard; with `trash`, their data is deleted
    pub fn dispose(&self, trash: bool) {
        for shard in 0..self.pools.shards() {
            self.dispose_shard(shard, trash);
        }
    }

    /// Dispose one shard; it is rebuilt (empty, if trashed) on next access
    pub fn dispose_shard(&self, shard: usize, trash: bool) {
        if let Err(e) = self.pools.dispose(shard, trash) {
            tracing::error!("Failed to dispose cache shard {}: {}", shard, e);
        }
    }

    // =========================================================================
    // Entry Operations
    // =========================================================================

    /// Store a value, replacing any previous value for `(group, key)`
    ///
    /// Values that can never be encoded are excluded from future caching.
    pub fn put<V: Serialize + ?Sized>(&self, group: &str, key: &str, value: &V) {
        let fingerprint = Fingerprint::new(group, key);

        if let Err(e) = self.do_upsert(&fingerprint, value) {
            if e.is_unsupported_payload() {
                self.exclusions.insert(fingerprint.id());
            }
            self.handle_error(&e, &fingerprint);
        }
    }

    /// Load a value; `None` when absent, excluded, or on any failure
    pub fn get<V: DeserializeOwned>(&self, group: &str, key: &str) -> Option<V> {
        let fingerprint = Fingerprint::new(group, key);

        match self.do_select(&fingerprint) {
            Ok(value) => value,
            Err(e) => {
                self.handle_error(&e, &fingerprint);
                None
            }
        }
    }

    /// Delete one entry and forget any exclusion for it
    pub fn remove(&self, group: &str, key: &str) {
        let fingerprint = Fingerprint::new(group, key);

        if key.is_empty() {
            tracing::warn!("Empty key passed in, clearing group {} by mistake?", group);
        }

        if let Err(e) = self.do_delete(&fingerprint) {
            self.handle_error(&e, &fingerprint);
        }
    }

    /// Delete every entry of a group across all shards and tables
    ///
    /// This scans every table of every shard and can be expensive.
    pub fn remove_group(&self, group: &str) {
        let fingerprint = Fingerprint::group(group);
        tracing::info!(
            "Flushing cache group: {} Note: this can be an expensive operation",
            fingerprint
        );

        for shard in 0..self.pools.shards() {
            match self.delete_group_in_shard(shard, group) {
                Ok(deleted) => tracing::debug!(
                    "Deleted {} rows of group {} from shard {}",
                    deleted,
                    group,
                    shard
                ),
                Err(e) => self.handle_shard_error(shard, &e, &fingerprint),
            }
        }
    }

    /// Flush everything
    ///
    /// Truncates every table, or rebuilds every shard when configured to,
    /// or once truncation has failed `remove_all_failure_threshold` times in
    /// a row. A destructive flush also clears the exclusion set.
    pub fn remove_all(&self) {
        tracing::info!("Start full cache flush");
        let start = Instant::now();
        let threshold = self.config.effective_remove_all_threshold();

        let destructive = self.config.rebuild_on_remove_all
            || self.failed_flushes.load(Ordering::Acquire) >= threshold;

        if destructive {
            self.rebuild_all();
        } else {
            match self.truncate_tables() {
                Ok(()) => self.failed_flushes.store(0, Ordering::Release),
                Err(e) => {
                    let failed = self.failed_flushes.fetch_add(1, Ordering::AcqRel) + 1;
                    tracing::warn!("Full flush by truncation failed ({} in a row): {}", failed, e);
                    if failed >= threshold {
                        self.rebuild_all();
                    }
                }
            }
        }

        tracing::info!("End full cache flush: {}ms", start.elapsed().as_millis());
    }

    /// Every distinct non-blank group currently stored (best effort)
    pub fn groups(&self) -> HashSet<String> {
        let mut groups = HashSet::new();
        for shard in 0..self.pools.shards() {
            if let Err(e) = self.collect_groups(shard, &mut groups) {
                self.handle_shard_error(shard, &e, &"group listing");
            }
        }
        groups
    }

    /// Every key stored under a group (best effort)
    pub fn keys(&self, group: &str) -> HashSet<String> {
        let fingerprint = Fingerprint::group(group);
        let mut keys = HashSet::new();
        for shard in 0..self.pools.shards() {
            if let Err(e) = self.collect_keys(shard, group, &mut keys) {
                self.handle_shard_error(shard, &e, &fingerprint);
            }
        }
        keys
    }

    /// Number of rows stored under a group (best effort)
    pub fn group_count(&self, group: &str) -> u64 {
        let fingerprint = Fingerprint::group(group);
        let mut total = 0;
        for shard in 0..self.pools.shards() {
            match self.count_group_in_shard(shard, group) {
                Ok(count) => total += count,
                Err(e) => self.handle_shard_error(shard, &e, &fingerprint),
            }
        }
        total
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &'static str {
        "Spillway sharded store"
    }

    pub fn key(&self) -> &'static str {
        "SpillwayStore"
    }

    /// Shards are private to this process
    pub fn is_distributed(&self) -> bool {
        false
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root_dir(&self) -> &Path {
        &self.config.root_dir
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// Errors counted against a shard since its last (re)build
    pub fn error_count(&self, shard: usize) -> u64 {
        self.health.count(shard)
    }

    /// Whether `(group, key)` is currently excluded from caching
    pub fn is_excluded(&self, group: &str, key: &str) -> bool {
        self.exclusions.contains(Fingerprint::new(group, key).id())
    }

    /// Pool manager (for inspection and tests)
    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    // =========================================================================
    // Backend Operations
    // =========================================================================

    /// Borrow a connection for a shard, building the shard if needed
    fn connection(&self, shard: usize) -> Result<Option<ShardConnection>> {
        match self.pools.get(shard, false) {
            Some(pool) => pool.connection(),
            None => Ok(None),
        }
    }

    fn do_upsert<V: Serialize + ?Sized>(
        &self,
        fingerprint: &Fingerprint<'_>,
        value: &V,
    ) -> Result<()> {
        if self.exclusions.contains(fingerprint.id()) {
            return Ok(());
        }

        let route = self.router.route(fingerprint.id());
        let payload = self.codec.encode(value)?;

        let Some(conn) = self.connection(route.database)? else {
            return Ok(());
        };

        let table = self.schema.table(route.table);
        let mut stmt = conn.prepare_cached(&table.upsert)?;
        stmt.execute(params![
            fingerprint.id().value(),
            fingerprint.group_name(),
            fingerprint.key(),
            payload
        ])?;
        Ok(())
    }

    fn do_select<V: DeserializeOwned>(&self, fingerprint: &Fingerprint<'_>) -> Result<Option<V>> {
        if self.exclusions.contains(fingerprint.id()) {
            return Ok(None);
        }

        let route = self.router.route(fingerprint.id());
        let Some(conn) = self.connection(route.database)? else {
            return Ok(None);
        };

        let table = self.schema.table(route.table);
        let mut stmt = conn.prepare_cached(&table.select)?;
        let payload: Option<Vec<u8>> = stmt
            .query_row(params![fingerprint.id().value()], |row| row.get(0))
            .optional()?;

        match payload {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn do_delete(&self, fingerprint: &Fingerprint<'_>) -> Result<()> {
        self.exclusions.remove(fingerprint.id());

        let route = self.router.route(fingerprint.id());
        let Some(conn) = self.connection(route.database)? else {
            return Ok(());
        };

        let table = self.schema.table(route.table);
        let mut stmt = conn.prepare_cached(&table.delete)?;
        stmt.execute(params![fingerprint.id().value()])?;
        Ok(())
    }

    fn delete_group_in_shard(&self, shard: usize, group: &str) -> Result<usize> {
        let Some(conn) = self.connection(shard)? else {
            tracing::debug!("Shard {} unavailable for group flush", shard);
            return Ok(0);
        };

        let mut deleted = 0;
        for table in self.schema.tables() {
            let mut stmt = conn.prepare_cached(&table.delete_group)?;
            deleted += stmt.execute(params![group])?;
        }
        Ok(deleted)
    }

    fn collect_groups(&self, shard: usize, groups: &mut HashSet<String>) -> Result<()> {
        let Some(conn) = self.connection(shard)? else {
            return Ok(());
        };

        for table in self.schema.tables() {
            let mut stmt = conn.prepare_cached(&table.distinct_groups)?;
            let rows = stmt.query_map([], |row| row.get::<_, Option<String>>(0))?;
            for group in rows {
                if let Some(group) = group? {
                    if !group.trim().is_empty() {
                        groups.insert(group);
                    }
                }
            }
        }
        Ok(())
    }

    fn collect_keys(&self, shard: usize, group: &str, keys: &mut HashSet<String>) -> Result<()> {
        let Some(conn) = self.connection(shard)? else {
            return Ok(());
        };

        for table in self.schema.tables() {
            let mut stmt = conn.prepare_cached(&table.keys_for_group)?;
            let rows = stmt.query_map(params![group], |row| row.get::<_, String>(0))?;
            for key in rows {
                keys.insert(key?);
            }
        }
        Ok(())
    }

    fn count_group_in_shard(&self, shard: usize, group: &str) -> Result<u64> {
        let Some(conn) = self.connection(shard)? else {
            return Ok(0);
        };

        let mut total = 0u64;
        for table in self.schema.tables() {
            let mut stmt = conn.prepare_cached(&table.count_group)?;
            let count: i64 = stmt.query_row(params![group], |row| row.get(0))?;
            total += count.max(0) as u64;
        }
        Ok(total)
    }

    /// Empty every table of every built shard, one transaction per shard
    fn truncate_tables(&self) -> Result<()> {
        for shard in 0..self.pools.shards() {
            let Some(mut conn) = self.connection(shard)? else {
                continue;
            };

            let tx = conn.transaction()?;
            for table in self.schema.tables() {
                tx.execute(&table.truncate, [])?;
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// Destructive full flush: trash every shard and forget exclusions
    fn rebuild_all(&self) {
        tracing::warn!("Rebuilding every cache shard");
        self.dispose(true);
        self.exclusions.clear();
        self.failed_flushes.store(0, Ordering::Release);
    }

    // =========================================================================
    // Error Handling
    // =========================================================================

    fn handle_error(&self, err: &SpillError, fingerprint: &Fingerprint<'_>) {
        let shard = self.router.route(fingerprint.id()).database;
        self.handle_shard_error(shard, err, fingerprint);
    }

    /// Count an error against `shard`; rebuild the shard past the threshold
    fn handle_shard_error(&self, shard: usize, err: &SpillError, context: &dyn fmt::Display) {
        tracing::debug!("{} on {}", err, context);

        let verdict = self.health.record(shard);
        if verdict.should_log {
            tracing::warn!("Error #{} {} on {}", verdict.previous, err, context);
        }

        if verdict.should_rebuild {
            tracing::error!(
                "Errors exceeded {}, rebuilding cache shard {}",
                self.config.recover_after_errors,
                shard
            );
            self.dispose_shard(shard, true);
        }
    }
}
