//! Shard connection pool using r2d2.
//!
//! One pool per shard, bound to one snapshot directory:
//! `{root}/{shard}/{database}/cache.db`.
//!
//! ## Leak Detection
//! With a threshold configured, every borrow is registered with a deadline.
//! A background thread per pool reports borrows still open past their
//! deadline, once each, while they are still checked out.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::config::{parse_connection_params, Config};
use crate::error::Result;

/// File name of the database inside a snapshot directory
pub const DATABASE_FILE: &str = "cache.db";

/// Snapshot directory name format (creation time, millisecond precision)
const SNAPSHOT_NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%3f";

/// Bounded pool of connections to one shard database
///
/// ## Lifecycle
/// - `create` / `open`: directory is created, pool is built and running
/// - `close`: marks the pool not running and drops the r2d2 pool; connections
///   still checked out are closed when returned
pub struct ShardPool {
    shard: usize,
    database: String,
    folder: PathBuf,
    inner: RwLock<Option<Pool<SqliteConnectionManager>>>,
    running: AtomicBool,
    leak_watch: Option<Arc<LeakWatch>>,
}

impl ShardPool {
    /// Build a pool against a brand-new, timestamp-named snapshot
    pub fn create(config: &Config, shard: usize) -> Result<Self> {
        let database = chrono::Local::now().format(SNAPSHOT_NAME_FORMAT).to_string();
        Self::open(config, shard, &database)
    }

    /// Build a pool against a named snapshot (created if missing)
    pub fn open(config: &Config, shard: usize, database: &str) -> Result<Self> {
        let folder = config.root_dir.join(shard.to_string()).join(database);
        std::fs::create_dir_all(&folder)?;

        let db_file = folder.join(DATABASE_FILE);
        tracing::info!("Shard {} on-disk cache: {}", shard, db_file.display());

        let pragmas = parse_connection_params(&config.connection_params)?;
        let manager = SqliteConnectionManager::file(&db_file).with_init(move |conn| {
            for (name, value) in &pragmas {
                conn.execute_batch(&format!("PRAGMA {} = {};", name, value))?;
            }
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .min_idle(Some(1))
            .connection_timeout(config.connection_timeout())
            .build(manager)?;

        let leak_watch = match config.leak_detection_threshold() {
            Some(threshold) => Some(LeakWatch::start(shard, threshold)?),
            None => None,
        };

        Ok(Self {
            shard,
            database: database.to_string(),
            folder,
            inner: RwLock::new(Some(pool)),
            running: AtomicBool::new(true),
            leak_watch,
        })
    }

    /// Whether the pool still hands out connections
    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Borrow a connection
    ///
    /// Returns:
    /// - `Ok(Some(conn))`: connection borrowed
    /// - `Ok(None)`: pool has been closed
    /// - `Err(_)`: acquire timed out or the connection could not be opened
    pub fn connection(&self) -> Result<Option<ShardConnection>> {
        if !self.running() {
            return Ok(None);
        }

        // Clone the handle out so a slow acquire never blocks close()
        let pool = match self.inner.read().as_ref() {
            Some(pool) => pool.clone(),
            None => return Ok(None),
        };

        let conn = pool.get()?;
        let acquired_at = Instant::now();
        let lease = self
            .leak_watch
            .as_ref()
            .map(|watch| watch.register(acquired_at));

        Ok(Some(ShardConnection {
            conn,
            shard: self.shard,
            acquired_at,
            lease,
        }))
    }

    /// Stop handing out connections and release the pool
    pub fn close(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(watch) = &self.leak_watch {
            watch.stop();
        }
        if self.inner.write().take().is_some() {
            tracing::debug!("Closed pool for shard {} ({})", self.shard, self.database);
        }
    }

    pub fn shard(&self) -> usize {
        self.shard
    }

    /// Snapshot directory name
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Snapshot directory
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Path of the SQLite database file
    pub fn db_file(&self) -> PathBuf {
        self.folder.join(DATABASE_FILE)
    }

    /// Borrows reported as possible leaks so far (0 with detection disabled)
    pub fn leaks_reported(&self) -> u64 {
        self.leak_watch
            .as_ref()
            .map(|watch| watch.reported.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

impl Drop for ShardPool {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Leak Detection
// =============================================================================

/// One open borrow
struct Borrow {
    acquired_at: Instant,
    /// `None` when the threshold is too large to represent
    deadline: Option<Instant>,
    reported: bool,
}

/// Registry of open borrows, checked by a background thread
struct LeakWatch {
    shard: usize,
    threshold: Duration,
    next_id: AtomicU64,
    borrows: Mutex<HashMap<u64, Borrow>>,
    reported: AtomicU64,
    stopped: AtomicBool,
}

impl LeakWatch {
    fn start(shard: usize, threshold: Duration) -> Result<Arc<Self>> {
        let watch = Arc::new(Self {
            shard,
            threshold,
            next_id: AtomicU64::new(0),
            borrows: Mutex::new(HashMap::new()),
            reported: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        });

        let interval = (threshold / 2).clamp(Duration::from_millis(5), Duration::from_secs(1));
        let checker = Arc::clone(&watch);
        thread::Builder::new()
            .name(format!("spillway-leak-{}", shard))
            .spawn(move || {
                while !checker.stopped.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    checker.check(Instant::now());
                }
            })?;

        Ok(watch)
    }

    fn register(self: &Arc<Self>, acquired_at: Instant) -> Lease {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.borrows.lock().insert(
            id,
            Borrow {
                acquired_at,
                deadline: acquired_at.checked_add(self.threshold),
                reported: false,
            },
        );
        Lease {
            watch: Arc::clone(self),
            id,
        }
    }

    /// Report every unreported borrow past its deadline
    fn check(&self, now: Instant) {
        let mut borrows = self.borrows.lock();
        for borrow in borrows.values_mut() {
            let overdue = borrow.deadline.is_some_and(|deadline| now >= deadline);
            if borrow.reported || !overdue {
                continue;
            }
            borrow.reported = true;
            self.reported.fetch_add(1, Ordering::AcqRel);
            tracing::warn!(
                "Possible connection leak on shard {}: held for {:?} (threshold {:?})",
                self.shard,
                now.duration_since(borrow.acquired_at),
                self.threshold
            );
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

/// Registration of one borrow; deregisters on drop
struct Lease {
    watch: Arc<LeakWatch>,
    id: u64,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let removed = self.watch.borrows.lock().remove(&self.id);
        if let Some(borrow) = removed.filter(|b| b.reported) {
            tracing::warn!(
                "Connection reported as leaked on shard {} returned after {:?}",
                self.watch.shard,
                borrow.acquired_at.elapsed()
            );
        }
    }
}

// =============================================================================
// Pooled Connection
// =============================================================================

/// A pooled connection, returned to its pool on drop
pub struct ShardConnection {
    conn: PooledConnection<SqliteConnectionManager>,
    shard: usize,
    acquired_at: Instant,
    /// Present when leak detection is enabled
    lease: Option<Lease>,
}

impl ShardConnection {
    pub fn shard(&self) -> usize {
        self.shard
    }

    /// Time since the connection was borrowed
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Whether this borrow is tracked by leak detection
    pub fn is_tracked(&self) -> bool {
        self.lease.is_some()
    }
}

impl Deref for ShardConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for ShardConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
