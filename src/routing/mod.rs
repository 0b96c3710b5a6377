//! Routing Module
//!
//! Turns a `(group, key)` pair into a stable identity and a physical
//! location (shard + table).
//!
//! ## Responsibilities
//! - Derive a deterministic, case-insensitive identity per entry
//! - Map that identity to a shard index and a table index
//!
//! ## Pipeline
//! ```text
//! (group, key) ──► Fingerprint ──► Identity ──► ShardRouter ──► Route { database, table }
//!                  lower-case,      i64,          |hash| mod N
//!                  base-31 hash     decimal str
//! ```

mod fingerprint;
mod router;

pub use fingerprint::{Fingerprint, Identity};
pub use router::{Route, ShardRouter};
