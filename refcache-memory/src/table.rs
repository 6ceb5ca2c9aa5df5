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

//! Key to [`CacheEntry`] tables backing the object caches.

use std::{hash::Hash, sync::Arc};

use equivalent::Equivalent;
use hashbrown::hash_table::{Entry as HashTableEntry, HashTable};
use itertools::Itertools;
use parking_lot::RwLock;
use refcache_common::{
    code::{DefaultHasher, HashBuilder, Key, Value},
    event::EventListener,
    scope::Scope,
    strict_assert,
};

use crate::{
    entry::{CacheEntry, EntrySlot},
    expunge::ExpungingMap,
    reference::Strength,
};

/// Key to cache entry table used by [`crate::generic::GenericCache`].
///
/// The table decides how long an entry lives: strong tables keep entries until they are removed, reference
/// tables let idle entries disappear once their values are reclaimed.
pub trait EntryTable<K, V>: Send + Sync + 'static
where
    K: Key,
    V: Value,
{
    /// Reference strength of the values held by the entries.
    fn strength(&self) -> Strength;

    /// Get the entry of `key`, creating an unlocked entry without value if absent.
    ///
    /// Concurrent callers for the same key always observe the same entry.
    fn get_or_create(&self, key: &K) -> Arc<CacheEntry<V>>;

    /// Get the entry of `key` without creating it.
    fn lookup<Q>(&self, key: &Q) -> Option<Arc<CacheEntry<V>>>
    where
        Q: Hash + Equivalent<K> + ?Sized;

    /// Detach the entry of `key` from the table, returning the stored key with it.
    ///
    /// The listener is not notified, the caller reports the removal once out of its own critical sections.
    fn remove<Q>(&self, key: &Q) -> Option<(K, Arc<CacheEntry<V>>)>
    where
        Q: Hash + Equivalent<K> + ?Sized;

    /// Snapshot of the keys of all entries.
    fn keys(&self) -> Vec<K>;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Detach every entry from the table, returning them. The listener is not notified.
    fn drain(&self) -> Vec<(K, Arc<CacheEntry<V>>)>;

    /// Release what can be released on memory pressure, returning how many entries were dropped.
    fn reclaim(&self) -> usize;

    /// Listener notified of keys leaving the table.
    fn event_listener(&self) -> Option<&Arc<dyn EventListener<Key = K>>>;
}

struct Bucket<K, V> {
    hash: u64,
    key: K,
    entry: Arc<CacheEntry<V>>,
}

/// Sharded table holding every entry until it is explicitly removed.
pub struct StrongTable<K, V, S = DefaultHasher>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    shards: Vec<RwLock<HashTable<Bucket<K, V>>>>,
    hash_builder: S,
    event_listener: Option<Arc<dyn EventListener<Key = K>>>,
}

impl<K, V, S> StrongTable<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    /// Create a strong table.
    pub fn new(shards: usize, hash_builder: S, event_listener: Option<Arc<dyn EventListener<Key = K>>>) -> Self {
        assert!(shards > 0, "shards must be greater than zero.");

        let shards = (0..shards).map(|_| RwLock::new(HashTable::new())).collect_vec();

        Self {
            shards,
            hash_builder,
            event_listener,
        }
    }

    fn shard(&self, hash: u64) -> usize {
        let index = hash as usize % self.shards.len();
        strict_assert!(index < self.shards.len());
        index
    }
}

impl<K, V, S> EntryTable<K, V> for StrongTable<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn strength(&self) -> Strength {
        Strength::Strong
    }

    fn get_or_create(&self, key: &K) -> Arc<CacheEntry<V>> {
        let hash = self.hash_builder.hash_one(key);
        let shard = self.shard(hash);

        if let Some(bucket) = self.shards[shard].read().find(hash, |b| b.key == *key) {
            return bucket.entry.clone();
        }

        self.shards[shard].write().with(|mut table| {
            match table.entry(hash, |b| b.key == *key, |b| b.hash) {
                HashTableEntry::Occupied(o) => o.get().entry.clone(),
                HashTableEntry::Vacant(v) => {
                    tracing::trace!("[table]: create entry {key:?}");
                    let entry = Arc::new(CacheEntry::new(Strength::Strong));
                    v.insert(Bucket {
                        hash,
                        key: key.clone(),
                        entry: entry.clone(),
                    });
                    entry
                }
            }
        })
    }

    fn lookup<Q>(&self, key: &Q) -> Option<Arc<CacheEntry<V>>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);
        self.shards[self.shard(hash)]
            .read()
            .find(hash, |b| key.equivalent(&b.key))
            .map(|b| b.entry.clone())
    }

    fn remove<Q>(&self, key: &Q) -> Option<(K, Arc<CacheEntry<V>>)>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);
        self.shards[self.shard(hash)].write().with(|mut table| {
            table
                .find_entry(hash, |b| key.equivalent(&b.key))
                .ok()
                .map(|o| o.remove().0)
                .map(|b| (b.key, b.entry))
        })
    }

    fn keys(&self) -> Vec<K> {
        self.shards
            .iter()
            .flat_map(|shard| shard.read().iter().map(|b| b.key.clone()).collect_vec())
            .collect()
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    fn drain(&self) -> Vec<(K, Arc<CacheEntry<V>>)> {
        let mut drained = vec![];
        for shard in self.shards.iter() {
            drained.extend(shard.write().drain().map(|b| (b.key, b.entry)));
        }
        drained
    }

    fn reclaim(&self) -> usize {
        0
    }

    fn event_listener(&self) -> Option<&Arc<dyn EventListener<Key = K>>> {
        self.event_listener.as_ref()
    }
}

/// Table of a soft or weak cache: entries are expunged once idle with their value reclaimed.
pub type ReferenceTable<K, V, S = DefaultHasher> = ExpungingMap<K, EntrySlot<V>, S>;

impl<K, V, S> EntryTable<K, V> for ReferenceTable<K, V, S>
where
    K: Key,
    V: Value,
    S: HashBuilder,
{
    fn strength(&self) -> Strength {
        ExpungingMap::strength(self)
    }

    fn get_or_create(&self, key: &K) -> Arc<CacheEntry<V>> {
        let strength = ExpungingMap::strength(self);
        self.get_or_insert_with(key, || {
            tracing::trace!("[table]: create entry {key:?}");
            Arc::new(CacheEntry::new(strength))
        })
    }

    fn lookup<Q>(&self, key: &Q) -> Option<Arc<CacheEntry<V>>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.get(key)
    }

    fn remove<Q>(&self, key: &Q) -> Option<(K, Arc<CacheEntry<V>>)>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.take(key).map(|(key, slot)| (key, slot.entry().clone()))
    }

    fn keys(&self) -> Vec<K> {
        ExpungingMap::keys(self)
    }

    fn len(&self) -> usize {
        ExpungingMap::len(self)
    }

    fn drain(&self) -> Vec<(K, Arc<CacheEntry<V>>)> {
        self.take_all()
            .into_iter()
            .map(|(key, slot)| (key, slot.entry().clone()))
            .collect()
    }

    fn reclaim(&self) -> usize {
        ExpungingMap::reclaim(self)
    }

    fn event_listener(&self) -> Option<&Arc<dyn EventListener<Key = K>>> {
        ExpungingMap::event_listener(self)
    }
}
