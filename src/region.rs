//! Region stores
//!
//! The inbound contract used by the cache overlay. Each [`RegionStore`] is
//! bound to one region name, passed as the `group` of every engine call.
//! All regions share one engine through [`RegionStoreFactory`].

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{BincodeCodec, PayloadCodec};
use crate::config::Config;
use crate::engine::StorageEngine;
use crate::error::Result;

/// Persistence contract of one cache region
///
/// Every operation is best effort and synchronous: loads miss on failure,
/// stores and deletes silently do nothing.
pub trait MapStore<V> {
    /// Load one value
    fn load(&self, key: &str) -> Option<V>;

    /// Load the given keys; absent keys are omitted
    fn load_all<I, K>(&self, keys: I) -> HashMap<String, V>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>;

    /// Every key stored for this region
    fn load_all_keys(&self) -> HashSet<String>;

    /// Store one value
    fn store(&self, key: &str, value: &V);

    /// Store many values
    fn store_all<'a, I>(&self, entries: I)
    where
        I: IntoIterator<Item = (&'a String, &'a V)>,
        V: 'a;

    /// Delete one value
    fn delete(&self, key: &str);

    /// Delete many values
    fn delete_all<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>;
}

/// A region-scoped view of a shared engine
pub struct RegionStore<V, C: PayloadCodec = BincodeCodec> {
    region: String,
    engine: Arc<StorageEngine<C>>,
    _values: PhantomData<fn() -> V>,
}

impl<V, C: PayloadCodec> RegionStore<V, C> {
    pub fn new(region: impl Into<String>, engine: Arc<StorageEngine<C>>) -> Self {
        Self {
            region: region.into(),
            engine,
            _values: PhantomData,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn engine(&self) -> &Arc<StorageEngine<C>> {
        &self.engine
    }
}

impl<V, C> MapStore<V> for RegionStore<V, C>
where
    V: Serialize + DeserializeOwned,
    C: PayloadCodec,
{
    fn load(&self, key: &str) -> Option<V> {
        self.engine.get(&self.region, key)
    }

    fn load_all<I, K>(&self, keys: I) -> HashMap<String, V>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        keys.into_iter()
            .filter_map(|key| {
                let key = key.as_ref();
                self.load(key).map(|value| (key.to_string(), value))
            })
            .collect()
    }

    fn load_all_keys(&self) -> HashSet<String> {
        self.engine.keys(&self.region)
    }

    fn store(&self, key: &str, value: &V) {
        self.engine.put(&self.region, key, value);
    }

    fn store_all<'a, I>(&self, entries: I)
    where
        I: IntoIterator<Item = (&'a String, &'a V)>,
        V: 'a,
    {
        for (key, value) in entries {
            self.store(key, value);
        }
    }

    fn delete(&self, key: &str) {
        self.engine.remove(&self.region, key);
    }

    fn delete_all<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for key in keys {
            self.delete(key.as_ref());
        }
    }
}

/// Hands out region stores backed by one shared, initialized engine
pub struct RegionStoreFactory<C: PayloadCodec = BincodeCodec> {
    engine: Arc<StorageEngine<C>>,
}

impl RegionStoreFactory<BincodeCodec> {
    /// Build and initialize an engine, then wrap it
    pub fn open(config: Config) -> Result<Self> {
        tracing::info!("Building region store engine: {}", config.root_dir.display());
        let engine = StorageEngine::new(config)?;
        engine.init()?;
        Ok(Self::from_engine(Arc::new(engine)))
    }
}

impl<C: PayloadCodec> RegionStoreFactory<C> {
    /// Wrap an engine that the caller has already initialized
    pub fn from_engine(engine: Arc<StorageEngine<C>>) -> Self {
        Self { engine }
    }

    /// A store for `region`
    pub fn new_store<V>(&self, region: impl Into<String>) -> RegionStore<V, C> {
        RegionStore::new(region, Arc::clone(&self.engine))
    }

    pub fn engine(&self) -> &Arc<StorageEngine<C>> {
        &self.engine
    }
}
