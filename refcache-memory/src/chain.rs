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

use refcache_common::code::{Key, Value};

use crate::object::ObjectCache;

/// Two-level object cache: a fast first level in front of a second level that owns the producer locks.
///
/// A typical pairing is a small weak first level in front of a soft or strong second level.
///
/// - Reads try the first level, then the second one, copying second level hits into the first level.
/// - Writes and removals apply to both levels.
/// - The producer lock of a key lives on the second level only.
pub struct ChainedCache<K, V, A, B>
where
    K: Key,
    V: Value,
    A: ObjectCache<K, V>,
    B: ObjectCache<K, V>,
{
    first: A,
    second: B,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, A, B> Debug for ChainedCache<K, V, A, B>
where
    K: Key,
    V: Value,
    A: ObjectCache<K, V> + Debug,
    B: ObjectCache<K, V> + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedCache")
            .field("first", &self.first)
            .field("second", &self.second)
            .finish()
    }
}

impl<K, V, A, B> ChainedCache<K, V, A, B>
where
    K: Key,
    V: Value,
    A: ObjectCache<K, V>,
    B: ObjectCache<K, V>,
{
    /// Chain `first` in front of `second`.
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            _marker: PhantomData,
        }
    }

    /// The first level.
    pub fn first(&self) -> &A {
        &self.first
    }

    /// The second level.
    pub fn second(&self) -> &B {
        &self.second
    }
}

impl<K, V, A, B> ObjectCache<K, V> for ChainedCache<K, V, A, B>
where
    K: Key,
    V: Value,
    A: ObjectCache<K, V>,
    B: ObjectCache<K, V>,
{
    fn get(&self, key: &K) -> Option<Arc<V>> {
        if let Some(value) = self.first.get(key) {
            return Some(value);
        }
        let value = self.second.get(key)?;
        self.first.put(key, value.clone());
        Some(value)
    }

    fn peek(&self, key: &K) -> Option<Arc<V>> {
        self.first.peek(key).or_else(|| self.second.peek(key))
    }

    fn write_lock(&self, key: &K) {
        self.second.write_lock(key);
    }

    fn write_unlock(&self, key: &K) {
        self.second.write_unlock(key);
    }

    fn put(&self, key: &K, value: Arc<V>) {
        self.first.put(key, value.clone());
        self.second.put(key, value);
    }

    fn remove(&self, key: &K) -> Option<Arc<V>> {
        let first = self.first.remove(key);
        self.second.remove(key).or(first)
    }

    fn keys(&self) -> HashSet<K> {
        let mut keys = self.first.keys();
        keys.extend(self.second.keys());
        keys
    }

    fn contains_key(&self, key: &K) -> bool {
        self.first.contains_key(key) || self.second.contains_key(key)
    }

    fn len(&self) -> usize {
        self.keys().len()
    }

    fn clear(&self) {
        self.first.clear();
        self.second.clear();
    }

    fn reclaim(&self) -> usize {
        self.first.reclaim() + self.second.reclaim()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, time::Duration};

    use super::*;
    use crate::{
        cache::{Cache, CacheBuilder},
        reference::Strength,
    };

    fn chain() -> ChainedCache<u64, String, Cache<u64, String>, Cache<u64, String>> {
        ChainedCache::new(
            CacheBuilder::new().with_retention(Strength::Weak).build(),
            CacheBuilder::new().with_retention(Strength::Strong).build(),
        )
    }

    #[test_log::test]
    fn test_second_level_hit_is_promoted() {
        let cache = chain();
        cache.second().put(&1, Arc::new("v".to_string()));
        assert!(cache.first().peek(&1).is_none());

        let value = cache.get(&1).unwrap();
        assert_eq!(cache.first().peek(&1), Some(value.clone()));
        assert_eq!(cache.keys(), HashSet::from([1]));
    }

    #[test_log::test]
    fn test_writes_reach_both_levels() {
        let cache = chain();
        let value = Arc::new("v".to_string());

        cache.put(&1, value.clone());
        assert_eq!(cache.first().peek(&1), Some(value.clone()));
        assert_eq!(cache.second().peek(&1), Some(value.clone()));

        assert_eq!(cache.remove(&1), Some(value));
        assert!(cache.is_empty());
    }

    #[test_log::test]
    fn test_weak_first_level_follows_second() {
        let cache = chain();
        cache.put(&1, Arc::new("v".to_string()));
        // The strong second level keeps the shared value alive for the weak first level.
        assert!(cache.first().peek(&1).is_some());

        cache.second().remove(&1);
        assert!(cache.first().peek(&1).is_none());
        assert!(cache.get(&1).is_none());
    }

    #[test_log::test]
    fn test_lock_on_second_level() {
        let cache = Arc::new(chain());
        let barrier = Arc::new(Barrier::new(2));

        let producer = {
            let cache = cache.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                let guard = cache.lock(&1);
                barrier.wait();
                std::thread::sleep(Duration::from_millis(50));
                guard.put(Arc::new("v".to_string()));
            })
        };

        barrier.wait();
        assert_eq!(cache.get(&1).as_deref().map(String::as_str), Some("v"));
        producer.join().unwrap();
    }
}
