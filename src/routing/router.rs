//! Shard Router
//!
//! Pure modulo routing from identity to shard and table.

use super::Identity;

/// Physical location of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    /// Shard (database) index
    pub database: usize,
    /// Table index within the shard
    pub table: usize,
}

/// Maps identities onto `databases x tables_per_database` slots
///
/// Both indices come from the same hash, so the table index is not
/// independent of the shard index when the two counts share factors.
#[derive(Debug, Clone, Copy)]
pub struct ShardRouter {
    databases: usize,
    tables_per_database: usize,
}

impl ShardRouter {
    /// Counts are clamped to at least 1 so routing stays total
    pub fn new(databases: usize, tables_per_database: usize) -> Self {
        Self {
            databases: databases.max(1),
            tables_per_database: tables_per_database.max(1),
        }
    }

    /// Route an identity
    pub fn route(&self, id: Identity) -> Route {
        let hash = id.routing_hash() as usize;
        Route {
            database: hash % self.databases,
            table: hash % self.tables_per_database,
        }
    }

    pub fn databases(&self) -> usize {
        self.databases
    }

    pub fn tables_per_database(&self) -> usize {
        self.tables_per_database
    }
}
