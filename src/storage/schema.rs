//! Table schema and SQL statements
//!
//! Every shard holds `tables_per_db` identical tables named
//! `cache_table_<n>`, each with a secondary index on `cache_group`.
//! Statements are rendered once per table and reused through the
//! connection's prepared-statement cache.

use rusqlite::Connection;

use crate::error::Result;

/// Prefix of every cache table
pub const TABLE_PREFIX: &str = "cache_table_";

/// Pre-rendered statements for one table
#[derive(Debug, Clone)]
pub struct TableStatements {
    pub name: String,
    pub create: String,
    pub upsert: String,
    pub select: String,
    pub delete: String,
    pub delete_group: String,
    pub truncate: String,
    pub distinct_groups: String,
    pub keys_for_group: String,
    pub count_group: String,
}

impl TableStatements {
    fn new(index: usize) -> Self {
        let name = format!("{}{}", TABLE_PREFIX, index);
        Self {
            create: format!(
                "CREATE TABLE IF NOT EXISTS {name} (
                    cache_id    INTEGER PRIMARY KEY,
                    cache_group TEXT NOT NULL,
                    cache_key   TEXT NOT NULL,
                    cache_data  BLOB
                );
                CREATE INDEX IF NOT EXISTS idx_{name}_group ON {name}(cache_group);"
            ),
            upsert: format!(
                "INSERT INTO {name} (cache_id, cache_group, cache_key, cache_data)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (cache_id) DO UPDATE SET
                     cache_group = excluded.cache_group,
                     cache_key = excluded.cache_key,
                     cache_data = excluded.cache_data"
            ),
            select: format!("SELECT cache_data FROM {name} WHERE cache_id = ?1"),
            delete: format!("DELETE FROM {name} WHERE cache_id = ?1"),
            delete_group: format!("DELETE FROM {name} WHERE cache_group = ?1"),
            truncate: format!("DELETE FROM {name}"),
            distinct_groups: format!("SELECT DISTINCT cache_group FROM {name}"),
            keys_for_group: format!("SELECT cache_key FROM {name} WHERE cache_group = ?1"),
            count_group: format!("SELECT COUNT(*) FROM {name} WHERE cache_group = ?1"),
            name,
        }
    }
}

/// Statements for all tables of a shard
#[derive(Debug, Clone)]
pub struct Schema {
    tables: Vec<TableStatements>,
}

impl Schema {
    pub fn new(tables_per_db: usize) -> Self {
        Self {
            tables: (0..tables_per_db).map(TableStatements::new).collect(),
        }
    }

    /// Statements for table `index`
    ///
    /// Panics if `index` is out of range; indices come from the router,
    /// which is built with the same table count.
    pub fn table(&self, index: usize) -> &TableStatements {
        &self.tables[index]
    }

    pub fn tables(&self) -> &[TableStatements] {
        &self.tables
    }

    /// Create all tables and indexes if missing (idempotent)
    pub fn create_tables(&self, conn: &Connection) -> Result<()> {
        for table in &self.tables {
            conn.execute_batch(&table.create)?;
        }
        tracing::debug!("Ensured {} cache tables", self.tables.len());
        Ok(())
    }
}
