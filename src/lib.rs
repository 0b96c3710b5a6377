//! # Spillway
//!
//! The persistent overflow tier of an in-memory cache grid:
//! - Entries keyed by `(group, key)`, routed to one of several SQLite shards
//! - Bounded connection pool per shard, built lazily, one build at a time
//! - Self-healing: a shard that keeps failing is thrown away and rebuilt
//! - Warm recovery: a restart reopens recent on-disk snapshots
//! - Bulk invalidation per group or for everything
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              RegionStore (one per cache region)             │
//! │      load / loadAll / store / storeAll / delete / ...       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  group = region name
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    StorageEngine                            │
//! │    Fingerprint → ShardRouter → (shard, table)               │
//! │    ExclusionSet · ShardHealth (errors, rebuild, log limit)  │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     PoolManager                             │
//! │      single build permit · warm recovery · Reclaimer        │
//! └──────┬──────────────────────┬──────────────────────┬────────┘
//!        ▼                      ▼                      ▼
//!   ┌──────────┐          ┌──────────┐           ┌──────────┐
//!   │ShardPool0│          │ShardPool1│    ...    │ShardPoolN│
//!   │ cache.db │          │ cache.db │           │ cache.db │
//!   └──────────┘          └──────────┘           └──────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod routing;
pub mod exclusion;
pub mod health;
pub mod storage;
pub mod engine;
pub mod region;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use codec::{BincodeCodec, CodecError, PayloadCodec};
pub use config::Config;
pub use engine::StorageEngine;
pub use error::{Result, SpillError};
pub use region::{MapStore, RegionStore, RegionStoreFactory};
pub use routing::{Fingerprint, Identity, Route, ShardRouter};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Spillway
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
