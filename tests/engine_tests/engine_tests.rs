//! Integration tests for StorageEngine
//!
//! These tests verify:
//! - Basic put/get/remove semantics and upserts
//! - Group isolation, group listing and group flushes
//! - Full flushes, both truncating and destructive
//! - Exclusion of unencodable payloads
//! - Self-healing of shards that keep failing
//! - Warm recovery across restarts
//! - Concurrent access from many threads

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use serde::ser::{Error as _, Serializer};
use serde::{Deserialize, Serialize};
use spillway::{Config, Fingerprint, StorageEngine};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_for(dir: &Path) -> Config {
    Config::builder()
        .root_dir(dir)
        .number_of_dbs(2)
        .tables_per_db(9)
        .max_pool_size(4)
        .build()
}

fn setup_engine() -> (TempDir, StorageEngine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(config_for(temp_dir.path()));
    (temp_dir, engine)
}

fn open_engine(config: Config) -> StorageEngine {
    let engine = StorageEngine::new(config).unwrap();
    engine.init().unwrap();
    engine
}

/// First key `{prefix}-{n}` in `group` that routes to `shard`
fn key_on_shard(engine: &StorageEngine, group: &str, shard: usize, prefix: &str) -> String {
    (0..10_000)
        .map(|n| format!("{}-{}", prefix, n))
        .find(|key| engine.router().route(Fingerprint::new(group, key).id()).database == shard)
        .unwrap()
}

fn database_name(engine: &StorageEngine, shard: usize) -> String {
    engine.pools().current(shard).unwrap().database().to_string()
}

/// Backdate every snapshot of every shard under `root`
fn age_snapshots(root: &Path, age: Duration) {
    let modified = SystemTime::now() - age;
    for shard in fs::read_dir(root).unwrap() {
        let shard = shard.unwrap().path();
        if !shard.is_dir() || shard.ends_with(".trash") {
            continue;
        }
        for snapshot in fs::read_dir(&shard).unwrap() {
            let snapshot = snapshot.unwrap().path();
            for entry in fs::read_dir(&snapshot).unwrap() {
                let path = entry.unwrap().path();
                File::options()
                    .write(true)
                    .open(&path)
                    .unwrap()
                    .set_modified(modified)
                    .unwrap();
            }
            File::open(&snapshot).unwrap().set_modified(modified).unwrap();
        }
    }
}

/// A value the payload codec refuses to encode
struct Opaque;

impl Serialize for Opaque {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom("opaque handles cannot be serialized"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u64,
    customer: String,
    lines: Vec<(String, u32)>,
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_put_get() {
    let (_temp, engine) = setup_engine();

    engine.put("users", "alice", "payload-A");

    assert_eq!(engine.get::<String>("users", "alice"), Some("payload-A".to_string()));
}

#[test]
fn test_get_missing() {
    let (_temp, engine) = setup_engine();

    assert_eq!(engine.get::<String>("users", "nobody"), None);
}

#[test]
fn test_put_overwrites() {
    let (_temp, engine) = setup_engine();

    engine.put("users", "alice", "payload-A");
    engine.put("users", "alice", "payload-B");

    assert_eq!(engine.get::<String>("users", "alice"), Some("payload-B".to_string()));
    assert_eq!(engine.group_count("users"), 1);
}

#[test]
fn test_keys_case_insensitive() {
    let (_temp, engine) = setup_engine();

    engine.put("Users", "Alice", "payload-A");

    assert_eq!(engine.get::<String>("users", "ALICE"), Some("payload-A".to_string()));
}

#[test]
fn test_structured_values() {
    let (_temp, engine) = setup_engine();
    let order = Order {
        id: 42,
        customer: "acme".to_string(),
        lines: vec![("widget".to_string(), 3), ("gadget".to_string(), 1)],
    };

    engine.put("orders", "42", &order);

    assert_eq!(engine.get::<Order>("orders", "42"), Some(order));
}

#[test]
fn test_remove() {
    let (_temp, engine) = setup_engine();
    engine.put("users", "alice", "payload-A");

    engine.remove("users", "alice");

    assert_eq!(engine.get::<String>("users", "alice"), None);
    assert_eq!(engine.group_count("users"), 0);
}

#[test]
fn test_remove_missing_is_noop() {
    let (_temp, engine) = setup_engine();

    engine.remove("users", "ghost");
    engine.remove("users", "");

    assert_eq!(engine.error_count(0), 0);
    assert_eq!(engine.error_count(1), 0);
}

#[test]
fn test_same_key_different_groups() {
    let (_temp, engine) = setup_engine();

    engine.put("a", "k", "from-a");
    engine.put("b", "k", "from-b");

    assert_eq!(engine.get::<String>("a", "k"), Some("from-a".to_string()));
    assert_eq!(engine.get::<String>("b", "k"), Some("from-b".to_string()));
}

#[test]
fn test_decode_mismatch_is_miss() {
    let (_temp, engine) = setup_engine();
    engine.put("users", "alice", &7u8);

    assert_eq!(engine.get::<String>("users", "alice"), None);
}

// =============================================================================
// Group Tests
// =============================================================================

#[test]
fn test_orders_group_across_shards() {
    let (_temp, engine) = setup_engine();

    for n in 0..100 {
        engine.put("orders", &format!("order-{}", n), &n);
    }
    engine.put("invoices", "inv-1", "kept");

    let keys = engine.keys("orders");
    assert_eq!(keys.len(), 100);
    assert!(keys.contains("order-0"));
    assert!(keys.contains("order-99"));
    assert_eq!(engine.group_count("orders"), 100);

    let shards: HashSet<usize> = (0..100)
        .map(|n| {
            let key = format!("order-{}", n);
            engine.router().route(Fingerprint::new("orders", &key).id()).database
        })
        .collect();
    assert_eq!(shards.len(), 2);

    engine.remove_group("orders");

    assert_eq!(engine.group_count("orders"), 0);
    assert!(engine.keys("orders").is_empty());
    assert_eq!(engine.get::<i32>("orders", "order-5"), None);
    assert_eq!(engine.get::<String>("invoices", "inv-1"), Some("kept".to_string()));
}

#[test]
fn test_groups_lists_non_blank() {
    let (_temp, engine) = setup_engine();

    engine.put("users", "a", &1);
    engine.put("orders", "b", &2);
    engine.put("orders", "c", &3);
    engine.put("  ", "d", &4);

    let groups = engine.groups();

    assert_eq!(
        groups,
        HashSet::from(["users".to_string(), "orders".to_string()])
    );
}

#[test]
fn test_keys_of_missing_group() {
    let (_temp, engine) = setup_engine();
    engine.put("users", "a", &1);

    assert!(engine.keys("nobody").is_empty());
    assert_eq!(engine.group_count("nobody"), 0);
}

// =============================================================================
// Full Flush Tests
// =============================================================================

#[test]
fn test_remove_all_truncates() {
    let (_temp, engine) = setup_engine();
    for n in 0..20 {
        engine.put("g", &format!("k{}", n), &n);
    }
    let before = (database_name(&engine, 0), database_name(&engine, 1));

    engine.remove_all();

    assert!(engine.groups().is_empty());
    assert_eq!(engine.get::<i32>("g", "k3"), None);
    assert_eq!((database_name(&engine, 0), database_name(&engine, 1)), before);

    engine.put("g", "again", "x");
    assert_eq!(engine.get::<String>("g", "again"), Some("x".to_string()));
}

#[test]
fn test_remove_all_truncate_keeps_exclusions() {
    let (_temp, engine) = setup_engine();
    engine.put("g", "opaque", &Opaque);

    engine.remove_all();

    assert!(engine.is_excluded("g", "opaque"));
}

#[test]
fn test_remove_all_rebuild() {
    let temp = TempDir::new().unwrap();
    let mut config = config_for(temp.path());
    config.rebuild_on_remove_all = true;
    let engine = open_engine(config);

    engine.put("g", "k", "v");
    engine.put("g", "opaque", &Opaque);
    let old = database_name(&engine, 0);
    assert!(engine.is_excluded("g", "opaque"));

    thread::sleep(Duration::from_millis(5));
    engine.remove_all();

    assert!(!engine.is_excluded("g", "opaque"));
    assert_eq!(engine.get::<String>("g", "k"), None);
    assert_ne!(database_name(&engine, 0), old);
}

#[test]
fn test_failed_truncate_escalates_to_rebuild() {
    let (_temp, engine) = setup_engine();
    let key = key_on_shard(&engine, "g", 1, "k");
    engine.put("g", &key, "v");

    // break shard 0 so truncation fails
    {
        let pool = engine.pools().current(0).unwrap();
        let conn = pool.connection().unwrap().unwrap();
        conn.execute_batch("DROP TABLE cache_table_0").unwrap();
    }
    thread::sleep(Duration::from_millis(5));

    engine.remove_all();

    // every shard was rebuilt within the same call
    assert_eq!(engine.get::<String>("g", &key), None);
    engine.put("g", &key, "fresh");
    assert_eq!(engine.get::<String>("g", &key), Some("fresh".to_string()));

    engine.remove_all();
    assert_eq!(engine.get::<String>("g", &key), None);
}

#[test]
fn test_truncate_failures_below_threshold_keep_data() {
    let temp = TempDir::new().unwrap();
    let mut config = config_for(temp.path());
    config.remove_all_failure_threshold = 2;
    let engine = open_engine(config);

    let key = key_on_shard(&engine, "g", 1, "k");
    engine.put("g", &key, "v");
    {
        let pool = engine.pools().current(0).unwrap();
        let conn = pool.connection().unwrap().unwrap();
        conn.execute_batch("DROP TABLE cache_table_0").unwrap();
    }
    let shard1 = database_name(&engine, 1);

    // shard 0 fails first, so shard 1 is never reached
    engine.remove_all();
    assert_eq!(engine.get::<String>("g", &key), Some("v".to_string()));
    assert_eq!(database_name(&engine, 1), shard1);

    thread::sleep(Duration::from_millis(5));
    engine.remove_all();
    assert_eq!(engine.get::<String>("g", &key), None);
}

// =============================================================================
// Exclusion Tests
// =============================================================================

#[test]
fn test_unencodable_value_excluded() {
    let (_temp, engine) = setup_engine();

    engine.put("g", "opaque", &Opaque);

    assert!(engine.is_excluded("g", "opaque"));
    assert!(engine.keys("g").is_empty());
}

#[test]
fn test_exclusion_is_sticky() {
    let (_temp, engine) = setup_engine();
    engine.put("g", "k", "before");
    engine.put("g", "k", &Opaque);

    engine.put("g", "k", "after");

    assert_eq!(engine.get::<String>("g", "k"), None);
    assert!(engine.is_excluded("g", "k"));
}

#[test]
fn test_remove_clears_exclusion() {
    let (_temp, engine) = setup_engine();
    engine.put("g", "k", &Opaque);

    engine.remove("g", "k");
    engine.put("g", "k", "cached");

    assert!(!engine.is_excluded("g", "k"));
    assert_eq!(engine.get::<String>("g", "k"), Some("cached".to_string()));
}

#[test]
fn test_remove_clears_exclusion_when_delete_fails() {
    let (_temp, engine) = setup_engine();
    engine.put("g", "k", &Opaque);
    let route = engine.router().route(Fingerprint::new("g", "k").id());
    {
        let pool = engine.pools().current(route.database).unwrap();
        let conn = pool.connection().unwrap().unwrap();
        conn.execute_batch(&format!("DROP TABLE cache_table_{}", route.table))
            .unwrap();
    }
    let errors = engine.error_count(route.database);

    engine.remove("g", "k");

    assert!(!engine.is_excluded("g", "k"));
    assert_eq!(engine.error_count(route.database), errors + 1);
}

// =============================================================================
// Self-Healing Tests
// =============================================================================

#[test]
fn test_errors_counted_per_shard() {
    let (_temp, engine) = setup_engine();
    let key = key_on_shard(&engine, "g", 0, "bad");
    engine.put("g", &key, &7u8);

    for _ in 0..3 {
        assert_eq!(engine.get::<String>("g", &key), None);
    }

    assert_eq!(engine.error_count(0), 3);
    assert_eq!(engine.error_count(1), 0);
}

#[test]
fn test_failing_shard_rebuilt() {
    let temp = TempDir::new().unwrap();
    let mut config = config_for(temp.path());
    config.recover_after_errors = 3;
    let engine = open_engine(config);

    let bad = key_on_shard(&engine, "g", 0, "bad");
    let good = key_on_shard(&engine, "g", 0, "good");
    let elsewhere = key_on_shard(&engine, "g", 1, "other");
    engine.put("g", &bad, &7u8);
    engine.put("g", &good, "kept-until-rebuild");
    engine.put("g", &elsewhere, "survives");

    for _ in 0..3 {
        engine.get::<String>("g", &bad);
    }
    assert_eq!(engine.error_count(0), 3);
    assert!(engine.pools().current(0).is_some());

    // crossing the threshold trashes the shard
    engine.get::<String>("g", &bad);
    assert_eq!(engine.error_count(0), 0);
    assert!(engine.pools().current(0).is_none());

    assert_eq!(engine.get::<String>("g", &good), None);
    assert!(engine.pools().current(0).is_some());
    assert_eq!(engine.get::<String>("g", &elsewhere), Some("survives".to_string()));
}

#[test]
fn test_rebuild_disabled_with_zero_threshold() {
    let temp = TempDir::new().unwrap();
    let mut config = config_for(temp.path());
    config.recover_after_errors = 0;
    let engine = open_engine(config);
    let key = key_on_shard(&engine, "g", 0, "bad");
    engine.put("g", &key, &7u8);

    for _ in 0..10 {
        engine.get::<String>("g", &key);
    }

    assert_eq!(engine.error_count(0), 10);
    assert!(engine.pools().current(0).is_some());
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_init_builds_all_shards() {
    let (temp, engine) = setup_engine();

    assert!(engine.is_initialized());
    assert!(engine.pools().current(0).is_some());
    assert!(engine.pools().current(1).is_some());
    assert!(temp.path().join("0").is_dir());
    assert!(temp.path().join("1").is_dir());
}

#[test]
fn test_lazy_build_without_init() {
    let temp = TempDir::new().unwrap();
    let engine = StorageEngine::new(config_for(temp.path())).unwrap();

    assert!(!engine.is_initialized());
    engine.put("g", "k", "v");

    assert_eq!(engine.get::<String>("g", "k"), Some("v".to_string()));
}

#[test]
fn test_invalid_config_rejected() {
    let temp = TempDir::new().unwrap();
    let mut config = config_for(temp.path());
    config.number_of_dbs = 0;

    assert!(StorageEngine::new(config).is_err());
}

#[test]
fn test_dispose_shard_with_trash_empties_it() {
    let (temp, engine) = setup_engine();
    let on0 = key_on_shard(&engine, "g", 0, "k");
    let on1 = key_on_shard(&engine, "g", 1, "k");
    engine.put("g", &on0, "zero");
    engine.put("g", &on1, "one");

    engine.dispose_shard(0, true);

    assert!(!temp.path().join("0").exists());
    assert_eq!(engine.get::<String>("g", &on0), None);
    assert_eq!(engine.get::<String>("g", &on1), Some("one".to_string()));
}

#[test]
fn test_shutdown_keeps_data_on_disk() {
    let (temp, engine) = setup_engine();
    engine.put("g", "k", "v");

    engine.shutdown();

    assert!(!engine.is_initialized());
    assert!(engine.pools().current(0).is_none());
    assert!(engine.pools().current(1).is_none());
    assert!(temp.path().join("0").is_dir());
}

#[test]
fn test_descriptors() {
    let (temp, engine) = setup_engine();

    assert!(!engine.is_distributed());
    assert!(!engine.name().is_empty());
    assert!(!engine.key().is_empty());
    assert_eq!(engine.root_dir(), temp.path());
}

// =============================================================================
// Warm Recovery Tests
// =============================================================================

#[test]
fn test_restart_recovers_recent_data() {
    let temp = TempDir::new().unwrap();
    {
        let engine = open_engine(config_for(temp.path()));
        engine.put("users", "alice", "payload-A");
        engine.shutdown();
    }

    let engine = open_engine(config_for(temp.path()));

    assert_eq!(engine.get::<String>("users", "alice"), Some("payload-A".to_string()));
}

#[test]
fn test_restart_discards_stale_data() {
    let temp = TempDir::new().unwrap();
    {
        let engine = open_engine(config_for(temp.path()));
        engine.put("users", "alice", "payload-A");
        engine.shutdown();
    }
    age_snapshots(temp.path(), Duration::from_secs(2 * 60 * 60));

    let engine = open_engine(config_for(temp.path()));

    assert_eq!(engine.get::<String>("users", "alice"), None);
    assert!(engine.groups().is_empty());
}

#[test]
fn test_restart_with_recovery_disabled() {
    let temp = TempDir::new().unwrap();
    let mut config = config_for(temp.path());
    config.recover_on_restart_ms = 0;
    {
        let engine = open_engine(config.clone());
        engine.put("users", "alice", "payload-A");
        engine.shutdown();
    }

    let engine = open_engine(config);

    assert_eq!(engine.get::<String>("users", "alice"), None);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_and_readers() {
    let (_temp, engine) = setup_engine();
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for n in 0..50 {
                    let key = format!("t{}-{}", t, n);
                    engine.put("load", &key, &(t * 1000 + n));
                    assert_eq!(engine.get::<i32>("load", &key), Some(t * 1000 + n));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.group_count("load"), 400);
    assert_eq!(engine.error_count(0), 0);
    assert_eq!(engine.error_count(1), 0);
}
