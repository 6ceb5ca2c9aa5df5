// Copyright 2026 refcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{collections::HashSet, fmt::Debug, marker::PhantomData, sync::Arc};

use refcache_common::{
    code::{DefaultHasher, HashBuilder, Key, Value},
    event::EventListener,
};
use serde::{Deserialize, Serialize};

use crate::{
    expunge::{ExpungingMap, ExpungingMapConfig},
    generic::{GenericCache, ReferenceCache, StrongCache},
    object::ObjectCache,
    reference::Strength,
    table::StrongTable,
};

const DEFAULT_SHARDS: usize = 8;

fn default_shards() -> usize {
    DEFAULT_SHARDS
}

/// Object cache configuration, usually loaded from a configuration file.
///
/// ```
/// use refcache_memory::{CacheConfig, Strength};
///
/// let config: CacheConfig = serde_json::from_str(r#"{ "retention": "soft" }"#).unwrap();
/// assert_eq!(config.retention, Strength::Soft);
/// assert_eq!(config.shards, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How the cache retains its values. `"all"` is accepted as a synonym of `"strong"`.
    #[serde(default)]
    pub retention: Strength,
    /// Shard count of the key table.
    #[serde(default = "default_shards")]
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retention: Strength::default(),
            shards: DEFAULT_SHARDS,
        }
    }
}

/// Object cache builder.
pub struct CacheBuilder<K, V, S = DefaultHasher>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    retention: Strength,
    shards: usize,
    hash_builder: S,
    event_listener: Option<Arc<dyn EventListener<Key = K>>>,
    _marker: PhantomData<fn() -> V>,
}

impl<K, V> Default for CacheBuilder<K, V, DefaultHasher>
where
    K: Key,
    V: Value,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheBuilder<K, V, DefaultHasher>
where
    K: Key,
    V: Value,
{
    /// Create an object cache builder with the default configuration: strong retention over 8 shards.
    pub fn new() -> Self {
        Self {
            retention: Strength::default(),
            shards: DEFAULT_SHARDS,
            hash_builder: DefaultHasher::default(),
            event_listener: None,
            _marker: PhantomData,
        }
    }
}

impl<K, V, S> CacheBuilder<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// Set how the cache retains its values.
    pub fn with_retention(mut self, retention: Strength) -> Self {
        self.retention = retention;
        self
    }

    /// Set the shard count of the key table. Keys will be distributed to different shards based on their hash.
    /// Operations on different shards can be parallelized.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Apply a loaded configuration.
    pub fn with_config(self, config: CacheConfig) -> Self {
        self.with_retention(config.retention).with_shards(config.shards)
    }

    /// Set the listener notified of keys leaving the cache.
    pub fn with_event_listener(mut self, event_listener: Arc<dyn EventListener<Key = K>>) -> Self {
        self.event_listener = Some(event_listener);
        self
    }

    /// Set the hash builder of the key table.
    pub fn with_hash_builder<OS>(self, hash_builder: OS) -> CacheBuilder<K, V, OS>
    where
        OS: HashBuilder,
    {
        CacheBuilder {
            retention: self.retention,
            shards: self.shards,
            hash_builder,
            event_listener: self.event_listener,
            _marker: PhantomData,
        }
    }

    /// Build the object cache.
    ///
    /// # Panics
    ///
    /// Panics if the shard count is zero.
    pub fn build(self) -> Cache<K, V, S> {
        tracing::debug!("[cache]: build {} cache with {} shards", self.retention, self.shards);
        match self.retention {
            Strength::Strong => Cache::Strong(Arc::new(GenericCache::new(StrongTable::new(
                self.shards,
                self.hash_builder,
                self.event_listener,
            )))),
            strength @ (Strength::Soft | Strength::Weak) => {
                let cache = Arc::new(GenericCache::new(ExpungingMap::with_config(ExpungingMapConfig {
                    strength,
                    shards: self.shards,
                    hash_builder: self.hash_builder,
                    event_listener: self.event_listener,
                })));
                if strength == Strength::Soft {
                    Cache::Soft(cache)
                } else {
                    Cache::Weak(cache)
                }
            }
        }
    }
}

/// Object cache with its retention chosen at runtime.
pub enum Cache<K, V, S = DefaultHasher>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// Cache holding every value until it is removed.
    Strong(Arc<StrongCache<K, V, S>>),
    /// Cache holding its values until memory pressure, unless they are owned elsewhere.
    Soft(Arc<ReferenceCache<K, V, S>>),
    /// Cache holding its values only as long as they are owned elsewhere.
    Weak(Arc<ReferenceCache<K, V, S>>),
}

impl<K, V, S> Debug for Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strong(_) => f.debug_tuple("Cache::StrongCache").finish(),
            Self::Soft(_) => f.debug_tuple("Cache::SoftCache").finish(),
            Self::Weak(_) => f.debug_tuple("Cache::WeakCache").finish(),
        }
    }
}

impl<K, V, S> Clone for Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn clone(&self) -> Self {
        match self {
            Self::Strong(cache) => Self::Strong(cache.clone()),
            Self::Soft(cache) => Self::Soft(cache.clone()),
            Self::Weak(cache) => Self::Weak(cache.clone()),
        }
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// How the cache retains its values.
    pub fn retention(&self) -> Strength {
        match self {
            Cache::Strong(_) => Strength::Strong,
            Cache::Soft(_) => Strength::Soft,
            Cache::Weak(_) => Strength::Weak,
        }
    }
}

impl<K, V, S> ObjectCache<K, V> for Cache<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn get(&self, key: &K) -> Option<Arc<V>> {
        match self {
            Cache::Strong(cache) => cache.get(key),
            Cache::Soft(cache) | Cache::Weak(cache) => cache.get(key),
        }
    }

    fn peek(&self, key: &K) -> Option<Arc<V>> {
        match self {
            Cache::Strong(cache) => cache.peek(key),
            Cache::Soft(cache) | Cache::Weak(cache) => cache.peek(key),
        }
    }

    fn write_lock(&self, key: &K) {
        match self {
            Cache::Strong(cache) => cache.write_lock(key),
            Cache::Soft(cache) | Cache::Weak(cache) => cache.write_lock(key),
        }
    }

    fn write_unlock(&self, key: &K) {
        match self {
            Cache::Strong(cache) => cache.write_unlock(key),
            Cache::Soft(cache) | Cache::Weak(cache) => cache.write_unlock(key),
        }
    }

    fn put(&self, key: &K, value: Arc<V>) {
        match self {
            Cache::Strong(cache) => cache.put(key, value),
            Cache::Soft(cache) | Cache::Weak(cache) => cache.put(key, value),
        }
    }

    fn remove(&self, key: &K) -> Option<Arc<V>> {
        match self {
            Cache::Strong(cache) => cache.remove(key),
            Cache::Soft(cache) | Cache::Weak(cache) => cache.remove(key),
        }
    }

    fn keys(&self) -> HashSet<K> {
        match self {
            Cache::Strong(cache) => cache.keys(),
            Cache::Soft(cache) | Cache::Weak(cache) => cache.keys(),
        }
    }

    fn contains_key(&self, key: &K) -> bool {
        match self {
            Cache::Strong(cache) => cache.contains_key(key),
            Cache::Soft(cache) | Cache::Weak(cache) => cache.contains_key(key),
        }
    }

    fn len(&self) -> usize {
        match self {
            Cache::Strong(cache) => cache.len(),
            Cache::Soft(cache) | Cache::Weak(cache) => cache.len(),
        }
    }

    fn clear(&self) {
        match self {
            Cache::Strong(cache) => cache.clear(),
            Cache::Soft(cache) | Cache::Weak(cache) => cache.clear(),
        }
    }

    fn reclaim(&self) -> usize {
        match self {
            Cache::Strong(cache) => cache.reclaim(),
            Cache::Soft(cache) | Cache::Weak(cache) => cache.reclaim(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, time::Duration};

    use parking_lot::Mutex;
    use refcache_common::event::Event;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(Event, u64)>>,
    }

    impl EventListener for Recorder {
        type Key = u64;

        fn on_leave(&self, reason: Event, key: &u64) {
            self.events.lock().push((reason, *key));
        }
    }

    #[test]
    fn test_config_parse() {
        let config: CacheConfig = serde_json::from_str(r#"{ "retention": "all", "shards": 16 }"#).unwrap();
        assert_eq!(
            config,
            CacheConfig {
                retention: Strength::Strong,
                shards: 16
            }
        );
        assert_eq!(serde_json::from_str::<CacheConfig>("{}").unwrap(), CacheConfig::default());
        assert!(serde_json::from_str::<CacheConfig>(r#"{ "retention": "phantom" }"#).is_err());
    }

    #[test_log::test]
    fn test_build_by_retention() {
        for (retention, name) in [
            (Strength::Strong, "Cache::StrongCache"),
            (Strength::Soft, "Cache::SoftCache"),
            (Strength::Weak, "Cache::WeakCache"),
        ] {
            let cache = CacheBuilder::<u64, u64>::new()
                .with_config(CacheConfig { retention, shards: 2 })
                .build();
            assert_eq!(cache.retention(), retention);
            assert_eq!(format!("{cache:?}"), name);
        }
    }

    #[test]
    #[should_panic(expected = "shards must be greater than zero")]
    fn test_zero_shards_panics() {
        CacheBuilder::<u64, u64>::new().with_shards(0).build();
    }

    #[test_log::test]
    fn test_two_producers_scenario() {
        for retention in [Strength::Strong, Strength::Soft, Strength::Weak] {
            let cache = CacheBuilder::<String, String>::new().with_retention(retention).build();
            let (a, b) = ("a".to_string(), "b".to_string());
            let (v1, v2) = (Arc::new("v1".to_string()), Arc::new("v2".to_string()));

            let guard = cache.lock(&a);
            guard.put(v1.clone());
            drop(guard);
            let guard = cache.lock(&b);
            guard.put(v2.clone());
            drop(guard);

            assert_eq!(cache.get(&a), Some(v1.clone()));
            assert_eq!(cache.keys(), HashSet::from([a.clone(), b.clone()]));
            assert_eq!(cache.remove(&a), Some(v1.clone()));
            assert_eq!(cache.keys(), HashSet::from([b.clone()]));
            assert!(cache.get(&a).is_none());
        }
    }

    #[test_log::test]
    fn test_event_listener() {
        let recorder = Arc::new(Recorder::default());
        let cache = CacheBuilder::<u64, u64>::new()
            .with_retention(Strength::Weak)
            .with_event_listener(recorder.clone())
            .build();

        let v1 = Arc::new(1);
        cache.put(&1, v1.clone());
        cache.put(&2, Arc::new(2));
        let v3 = Arc::new(3);
        cache.put(&3, v3.clone());

        assert_eq!(cache.remove(&1), Some(v1));
        // Touching key 2 expunges it.
        assert!(!cache.contains_key(&2));
        cache.clear();

        assert_eq!(
            recorder.events.lock().as_slice(),
            &[(Event::Remove, 1), (Event::Expunge, 2), (Event::Clear, 3)]
        );
        drop(v3);
    }

    #[test_log::test]
    fn test_get_registers_key() {
        for retention in [Strength::Strong, Strength::Soft, Strength::Weak] {
            let cache = CacheBuilder::<u64, u64>::new().with_retention(retention).build();

            assert!(!cache.keys().contains(&1));
            assert!(cache.get(&1).is_none());
            if retention == Strength::Weak {
                // Nothing keeps an idle weak entry without value alive.
                assert!(!cache.keys().contains(&1));
            } else {
                assert!(cache.keys().contains(&1));
                assert!(cache.peek(&1).is_none());
            }

            let value = Arc::new(2);
            cache.put(&2, value.clone());
            assert!(!cache.keys().contains(&3));
            assert_eq!(cache.get(&2), Some(value));
            assert!(cache.keys().contains(&2));
        }
    }

    #[test_log::test]
    fn test_waiter_released_after_remove_and_unlock() {
        for retention in [Strength::Strong, Strength::Soft, Strength::Weak] {
            let cache = CacheBuilder::<u64, u64>::new().with_retention(retention).build();
            let barrier = Arc::new(Barrier::new(2));
            let value = Arc::new(42);

            cache.write_lock(&1);
            let waiter = {
                let cache = cache.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.get(&1)
                })
            };
            barrier.wait();
            std::thread::sleep(Duration::from_millis(100));

            cache.put(&1, value.clone());
            assert_eq!(cache.remove(&1), Some(value.clone()));
            assert!(!cache.contains_key(&1));
            cache.write_unlock(&1);

            // The waiter observes what the producer left in the entry it waited on.
            assert_eq!(waiter.join().unwrap(), Some(value.clone()));

            // The key can be claimed again.
            cache.write_lock(&1);
            assert!(cache.peek(&1).is_none());
            cache.write_unlock(&1);
        }
    }
}
