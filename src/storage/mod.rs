//! Storage Module
//!
//! On-disk shards backed by pooled SQLite databases.
//!
//! ## Responsibilities
//! - Pool connections per shard (bounded, with acquire timeout)
//! - Build shards lazily, one at a time, failing open under contention
//! - Reopen a recent snapshot after a restart (warm recovery)
//! - Move discarded shards aside and delete them in the background
//!
//! ## On-disk Layout
//! ```text
//! {root}/
//!   ├── 0/                              shard 0
//!   │   └── 2026-10-16_09-30-12-481/    snapshot (one per build)
//!   │       └── cache.db                cache_table_0 .. cache_table_{N-1}
//!   ├── 1/                              shard 1
//!   └── .trash/                         reclaimed directories, deleted async
//! ```

mod lifecycle;
mod pool;
mod reclaimer;
pub mod recovery;
mod schema;

pub use lifecycle::PoolManager;
pub use pool::{ShardConnection, ShardPool, DATABASE_FILE};
pub use reclaimer::{Reclaimer, TRASH_DIR};
pub use schema::{Schema, TableStatements, TABLE_PREFIX};
