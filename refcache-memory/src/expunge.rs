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

//! A key to reference-slot table that makes reclaimed entries disappear.
//!
//! Slots are reclaimed behind the back of the table (a weak referent dropped by its last owner, a soft
//! referent released on memory pressure). The table never reports such an entry: an operation that touches a
//! key expunges the key first if its slot is cleared, and every enumerating operation sweeps the shards before
//! it observes them.

use std::{hash::Hash, sync::Arc};

use equivalent::Equivalent;
use hashbrown::hash_table::{Entry as HashTableEntry, HashTable};
use itertools::Itertools;
use parking_lot::RwLock;
use refcache_common::{
    code::{DefaultHasher, HashBuilder, Key, Value},
    event::{Event, EventListener},
    scope::Scope,
    strict_assert,
};

use crate::reference::{Reference, Slot, Strength};

/// A key to value map whose entries vanish once their referents are reclaimed.
pub type ReferenceMap<K, V, S = DefaultHasher> = ExpungingMap<K, Reference<V>, S>;

struct Bucket<K, R> {
    hash: u64,
    key: K,
    slot: Arc<R>,
}

struct Shard<K, R> {
    table: HashTable<Bucket<K, R>>,
}

impl<K, R> Default for Shard<K, R> {
    fn default() -> Self {
        Self {
            table: HashTable::new(),
        }
    }
}

impl<K, R> Shard<K, R>
where
    K: Key,
    R: Slot,
{
    /// Remove every pair whose slot is cleared.
    fn sweep(&mut self, garbages: &mut Vec<K>) {
        self.table.retain(|bucket| {
            if bucket.slot.is_cleared() {
                garbages.push(bucket.key.clone());
                false
            } else {
                true
            }
        });
    }

    /// Remove the pair for `key` only if it still holds the `observed` slot and the slot is still cleared.
    ///
    /// The key may have been removed and re-inserted between the observation and this call, the newer pair
    /// must survive.
    fn expunge_observed<Q>(&mut self, hash: u64, key: &Q, observed: &Arc<R>) -> Option<K>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        match self.table.find_entry(hash, |b| key.equivalent(&b.key)) {
            Ok(o) if Arc::ptr_eq(&o.get().slot, observed) && o.get().slot.is_cleared() => {
                let (bucket, _) = o.remove();
                Some(bucket.key)
            }
            _ => None,
        }
    }
}

/// Configuration of an [`ExpungingMap`].
pub struct ExpungingMapConfig<K, S>
where
    K: Key,
    S: HashBuilder,
{
    /// Reference strength of the slots created by the map.
    pub strength: Strength,
    /// Shard count. Operations on different shards never contend.
    pub shards: usize,
    /// Hash builder used to pick shards and buckets.
    pub hash_builder: S,
    /// Listener notified of keys leaving the map.
    pub event_listener: Option<Arc<dyn EventListener<Key = K>>>,
}

/// A sharded key to slot table that lazily expunges pairs whose slot has been cleared.
///
/// Semantically the map behaves like an ordinary concurrent map, except that entries may disappear between two
/// operations without any explicit removal.
pub struct ExpungingMap<K, R, S = DefaultHasher>
where
    K: Key,
    R: Slot,
    S: HashBuilder,
{
    shards: Vec<RwLock<Shard<K, R>>>,
    strength: Strength,
    hash_builder: S,
    event_listener: Option<Arc<dyn EventListener<Key = K>>>,
}

impl<K, V> ExpungingMap<K, Reference<V>, DefaultHasher>
where
    K: Key,
    V: Value,
{
    /// Create a reference map with the given slot strength and the default sharding.
    pub fn new(strength: Strength) -> Self {
        Self::with_config(ExpungingMapConfig {
            strength,
            shards: 8,
            hash_builder: DefaultHasher::default(),
            event_listener: None,
        })
    }
}

impl<K, R, S> ExpungingMap<K, R, S>
where
    K: Key,
    R: Slot,
    S: HashBuilder,
{
    /// Create an expunging map with the given configuration.
    pub fn with_config(config: ExpungingMapConfig<K, S>) -> Self {
        assert!(config.shards > 0, "shards must be greater than zero.");

        let shards = (0..config.shards).map(|_| RwLock::new(Shard::default())).collect_vec();

        Self {
            shards,
            strength: config.strength,
            hash_builder: config.hash_builder,
            event_listener: config.event_listener,
        }
    }

    /// Reference strength of the slots created by the map.
    pub fn strength(&self) -> Strength {
        self.strength
    }

    /// Store `target` for `key` in a fresh slot, returning the previous live referent if any.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "refcache::memory::expunge::put"))]
    pub fn put(&self, key: K, target: R::Target) -> Option<R::Target> {
        let hash = self.hash_builder.hash_one(&key);
        let slot = Arc::new(R::new(&target, self.strength));

        let old = self.shards[self.shard(hash)].write().with(|mut shard| {
            match shard.table.entry(hash, |b| b.key == key, |b| b.hash) {
                HashTableEntry::Occupied(mut o) => Some(std::mem::replace(&mut o.get_mut().slot, slot)),
                HashTableEntry::Vacant(v) => {
                    v.insert(Bucket { hash, key, slot });
                    None
                }
            }
        });

        // Read the old referent out of the lock critical section, a cleared one counts as absent.
        old.and_then(|slot| slot.get())
    }

    /// Get the live referent of `key`.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "refcache::memory::expunge::get"))]
    pub fn get<Q>(&self, key: &Q) -> Option<R::Target>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);

        let observed = {
            let shard = self.shards[self.shard(hash)].read();
            let bucket = shard.table.find(hash, |b| key.equivalent(&b.key))?;
            match bucket.slot.get() {
                Some(target) => return Some(target),
                None => bucket.slot.clone(),
            }
        };

        self.expunge_observed(hash, key, &observed);
        None
    }

    /// Whether `key` maps to a live referent.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);

        let observed = {
            let shard = self.shards[self.shard(hash)].read();
            let Some(bucket) = shard.table.find(hash, |b| key.equivalent(&b.key)) else {
                return false;
            };
            if !bucket.slot.is_cleared() {
                return true;
            }
            bucket.slot.clone()
        };

        self.expunge_observed(hash, key, &observed);
        false
    }

    /// Remove `key`, returning its live referent if any.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "refcache::memory::expunge::remove"))]
    pub fn remove<Q>(&self, key: &Q) -> Option<R::Target>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let (key, slot) = self.take(key)?;
        self.notify(Event::Remove, std::iter::once(key));
        slot.get()
    }

    /// Detach the pair of `key` without notifying the listener, returning the stored key and slot.
    pub(crate) fn take<Q>(&self, key: &Q) -> Option<(K, Arc<R>)>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);
        self.shards[self.shard(hash)].write().with(|mut shard| {
            shard
                .table
                .find_entry(hash, |b| key.equivalent(&b.key))
                .ok()
                .map(|o| o.remove().0)
                .map(|bucket| (bucket.key, bucket.slot))
        })
    }

    /// Get the live referent of `key`, or atomically insert the one created by `f`.
    ///
    /// A cleared slot counts as absent and is replaced. `f` is called at most once, within the lock critical
    /// section of the key's shard, so two callers can never create two different referents for the same key.
    #[cfg_attr(
        feature = "tracing",
        fastrace::trace(name = "refcache::memory::expunge::get_or_insert_with")
    )]
    pub fn get_or_insert_with<F>(&self, key: &K, f: F) -> R::Target
    where
        F: FnOnce() -> R::Target,
    {
        let hash = self.hash_builder.hash_one(key);
        let shard = self.shard(hash);

        if let Some(target) = self.shards[shard]
            .read()
            .table
            .find(hash, |b| b.key == *key)
            .and_then(|b| b.slot.get())
        {
            return target;
        }

        let mut expunged = None;
        let target = self.shards[shard].write().with(|mut shard| {
            match shard.table.entry(hash, |b| b.key == *key, |b| b.hash) {
                HashTableEntry::Occupied(mut o) => {
                    if let Some(target) = o.get().slot.get() {
                        return target;
                    }
                    let target = f();
                    o.get_mut().slot = Arc::new(R::new(&target, self.strength));
                    expunged = Some(key.clone());
                    target
                }
                HashTableEntry::Vacant(v) => {
                    let target = f();
                    v.insert(Bucket {
                        hash,
                        key: key.clone(),
                        slot: Arc::new(R::new(&target, self.strength)),
                    });
                    target
                }
            }
        });

        if let Some(key) = expunged {
            self.notify(Event::Expunge, std::iter::once(key));
        }
        target
    }

    /// Number of live pairs. Cleared pairs are expunged first.
    pub fn len(&self) -> usize {
        let mut garbages = vec![];
        let len = self
            .shards
            .iter()
            .map(|shard| {
                let mut shard = shard.write();
                shard.sweep(&mut garbages);
                shard.table.len()
            })
            .sum::<usize>();
        self.notify(Event::Expunge, garbages);
        len
    }

    /// Whether the map holds no live pair.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the keys of all live pairs.
    pub fn keys(&self) -> Vec<K> {
        self.collect(|bucket| Some(bucket.key.clone()))
    }

    /// Snapshot of all live referents.
    pub fn values(&self) -> Vec<R::Target> {
        self.collect(|bucket| bucket.slot.get())
    }

    /// Snapshot of all live pairs.
    pub fn entries(&self) -> Vec<(K, R::Target)> {
        self.collect(|bucket| bucket.slot.get().map(|target| (bucket.key.clone(), target)))
    }

    /// Remove every pair.
    pub fn clear(&self) {
        self.drain();
    }

    /// Remove every pair, returning the ones that were still live.
    pub fn drain(&self) -> Vec<(K, R::Target)> {
        let pairs = self.take_all();
        self.notify(Event::Clear, pairs.iter().map(|(key, _)| key.clone()));
        pairs
            .into_iter()
            .filter_map(|(key, slot)| slot.get().map(|target| (key, target)))
            .collect()
    }

    /// Detach every pair without notifying the listener.
    pub(crate) fn take_all(&self) -> Vec<(K, Arc<R>)> {
        let mut pairs = vec![];
        for shard in self.shards.iter() {
            pairs.extend(shard.write().table.drain().map(|bucket| (bucket.key, bucket.slot)));
        }
        pairs
    }

    /// Sweep every shard and expunge all cleared pairs, returning how many were expunged.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "refcache::memory::expunge::expunge"))]
    pub fn expunge(&self) -> usize {
        let mut garbages = vec![];
        for shard in self.shards.iter() {
            shard.write().sweep(&mut garbages);
        }
        let count = garbages.len();
        if count > 0 {
            tracing::debug!("[expunge]: {count} cleared entries expunged");
        }
        self.notify(Event::Expunge, garbages);
        count
    }

    /// Signal memory pressure: release the soft holds of all slots, then expunge what has been reclaimed.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "refcache::memory::expunge::reclaim"))]
    pub fn reclaim(&self) -> usize {
        for shard in self.shards.iter() {
            shard.read().table.iter().for_each(|bucket| bucket.slot.soften());
        }
        let count = self.expunge();
        tracing::debug!("[expunge]: reclaim finished, {count} entries reclaimed");
        count
    }

    fn collect<T, F>(&self, f: F) -> Vec<T>
    where
        F: Fn(&Bucket<K, R>) -> Option<T>,
    {
        let mut garbages = vec![];
        let mut res = vec![];
        for shard in self.shards.iter() {
            let mut shard = shard.write();
            shard.sweep(&mut garbages);
            // A referent may still vanish between the sweep and the read, skip it silently.
            res.extend(shard.table.iter().filter_map(&f));
        }
        self.notify(Event::Expunge, garbages);
        res
    }

    fn expunge_observed<Q>(&self, hash: u64, key: &Q, observed: &Arc<R>)
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let expunged = self.shards[self.shard(hash)]
            .write()
            .expunge_observed(hash, key, observed);
        if let Some(key) = expunged {
            tracing::trace!("[expunge]: expunge cleared entry {key:?}");
            self.notify(Event::Expunge, std::iter::once(key));
        }
    }

    /// Listener notified of keys leaving the map.
    pub fn event_listener(&self) -> Option<&Arc<dyn EventListener<Key = K>>> {
        self.event_listener.as_ref()
    }

    fn notify(&self, event: Event, keys: impl IntoIterator<Item = K>) {
        if let Some(listener) = self.event_listener.as_ref() {
            for key in keys {
                listener.on_leave(event, &key);
            }
        }
    }

    fn shard(&self, hash: u64) -> usize {
        let index = hash as usize % self.shards.len();
        strict_assert!(index < self.shards.len());
        index
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, hash::BuildHasher};

    use parking_lot::Mutex;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Mutex<Vec<(Event, u64)>>,
    }

    impl EventListener for Recorder {
        type Key = u64;

        fn on_leave(&self, reason: Event, key: &u64) {
            self.events.lock().push((reason, *key));
        }
    }

    fn map_for_test(strength: Strength, listener: Arc<Recorder>) -> ReferenceMap<u64, u64> {
        ExpungingMap::with_config(ExpungingMapConfig {
            strength,
            shards: 4,
            hash_builder: DefaultHasher::default(),
            event_listener: Some(listener),
        })
    }

    #[test_log::test]
    fn test_weak_map_expunges_on_touch() {
        let recorder = Arc::new(Recorder::default());
        let map = map_for_test(Strength::Weak, recorder.clone());

        let v1 = Arc::new(1);
        let v2 = Arc::new(2);
        assert!(map.put(1, v1.clone()).is_none());
        assert!(map.put(2, v2.clone()).is_none());
        assert_eq!(map.get(&1), Some(v1.clone()));
        assert_eq!(map.len(), 2);

        drop(v1);
        assert!(map.get(&1).is_none());
        assert!(!map.contains_key(&1));
        assert_eq!(map.len(), 1);
        assert_eq!(map.keys(), vec![2]);
        assert_eq!(recorder.events.lock().as_slice(), &[(Event::Expunge, 1)]);

        drop(v2);
        assert!(map.is_empty());
        assert!(map.values().is_empty());
    }

    #[test_log::test]
    fn test_soft_map_reclaims_on_pressure() {
        let recorder = Arc::new(Recorder::default());
        let map = map_for_test(Strength::Soft, recorder.clone());

        for i in 0..16 {
            map.put(i, Arc::new(i));
        }
        let pinned = map.get(&3).unwrap();
        assert_eq!(map.len(), 16);

        assert_eq!(map.reclaim(), 15);
        assert_eq!(map.keys(), vec![3]);
        assert_eq!(map.get(&3), Some(pinned));
        assert_eq!(recorder.events.lock().len(), 15);
    }

    #[test_log::test]
    fn test_explicit_remove_reports_remove() {
        let recorder = Arc::new(Recorder::default());
        let map = map_for_test(Strength::Weak, recorder.clone());

        let v1 = Arc::new(1);
        map.put(1, v1.clone());
        map.put(2, Arc::new(2));
        assert_eq!(map.remove(&1), Some(v1));
        // Key 2 lost its referent, but the caller still removed it explicitly.
        assert!(map.remove(&2).is_none());
        assert_eq!(
            recorder.events.lock().as_slice(),
            &[(Event::Remove, 1), (Event::Remove, 2)]
        );
    }

    #[test]
    fn test_put_returns_previous_live_value() {
        let map: ReferenceMap<u64, u64> = ExpungingMap::new(Strength::Weak);

        let v1 = Arc::new(1);
        map.put(1, v1.clone());
        let v2 = Arc::new(2);
        assert_eq!(map.put(1, v2.clone()), Some(v1));

        // The previous referent is gone, it is reported as absent rather than as a stale slot.
        drop(v2);
        let v3 = Arc::new(3);
        assert!(map.put(1, v3.clone()).is_none());
        assert_eq!(map.remove(&1), Some(v3));
        assert!(map.remove(&1).is_none());
    }

    #[test]
    fn test_expunge_keeps_newer_pair() {
        let map: ReferenceMap<u64, u64> = ExpungingMap::new(Strength::Weak);
        let hash = map.hash_builder.hash_one(7u64);

        let v1 = Arc::new(1);
        map.put(7, v1.clone());
        let observed = map.shards[map.shard(hash)]
            .read()
            .table
            .find(hash, |b| b.key == 7)
            .map(|b| b.slot.clone())
            .unwrap();
        drop(v1);
        assert!(observed.is_cleared());

        // A racing remove + put lands before the expunge of the observed slot.
        map.remove(&7);
        let v2 = Arc::new(2);
        map.put(7, v2.clone());

        map.expunge_observed(hash, &7u64, &observed);
        assert_eq!(map.get(&7), Some(v2));
    }

    #[test]
    fn test_get_or_insert_with_replaces_cleared_slot() {
        let map: ReferenceMap<u64, u64> = ExpungingMap::new(Strength::Weak);

        let v1 = map.get_or_insert_with(&1, || Arc::new(1));
        assert_eq!(map.get_or_insert_with(&1, || unreachable!()), v1);

        drop(v1);
        let v2 = map.get_or_insert_with(&1, || Arc::new(2));
        assert_eq!(*v2, 2);
        assert_eq!(map.entries(), vec![(1, v2)]);
    }

    /// Compare a weak map against a plain map while the workload keeps strong references to everything the
    /// plain map holds. The tiered map must never miss an entry or report a wrong value.
    #[test_log::test]
    fn test_side_by_side_with_strong_map() {
        for strength in [Strength::Weak, Strength::Soft] {
            let map: ReferenceMap<u64, u64> = ExpungingMap::new(strength);
            let mut reference: HashMap<u64, Arc<u64>> = HashMap::new();
            let mut rng = SmallRng::seed_from_u64(42);

            for step in 0..10000u64 {
                let key = rng.random_range(0..64);
                match rng.random_range(0..4) {
                    0 | 1 => {
                        let value = Arc::new(step);
                        map.put(key, value.clone());
                        reference.insert(key, value);
                    }
                    2 => match reference.remove(&key) {
                        Some(value) => assert_eq!(map.remove(&key), Some(value)),
                        None => {
                            // A soft slot may still hold a value nobody else references.
                            let removed = map.remove(&key);
                            if strength == Strength::Weak {
                                assert!(removed.is_none());
                            }
                        }
                    },
                    _ => {
                        // Drop the only strong reference, the entry may now vanish.
                        reference.remove(&key);
                        if strength == Strength::Soft && rng.random_bool(0.1) {
                            map.reclaim();
                        }
                    }
                }

                for (k, v) in reference.iter() {
                    assert!(map.contains_key(k));
                    assert_eq!(map.get(k).as_ref(), Some(v));
                }
            }

            map.reclaim();
            let mut keys = map.keys();
            keys.sort();
            let mut expected = reference.keys().copied().collect_vec();
            expected.sort();
            assert_eq!(keys, expected);
        }
    }

    #[test_log::test]
    fn test_concurrent_iteration_while_reclaiming() {
        let map: Arc<ReferenceMap<u64, u64>> = Arc::new(ExpungingMap::new(Strength::Weak));

        let writers = (0..4u64)
            .map(|t| {
                let map = map.clone();
                std::thread::spawn(move || {
                    let mut rng = SmallRng::seed_from_u64(t);
                    let mut held = vec![];
                    for i in 0..5000u64 {
                        let value = Arc::new(i);
                        map.put(rng.random_range(0..256), value.clone());
                        held.push(value);
                        if held.len() > 16 {
                            held.remove(rng.random_range(0..held.len()));
                        }
                    }
                })
            })
            .collect_vec();

        let reader = {
            let map = map.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    let len = map.len();
                    let keys = map.keys();
                    assert!(keys.len() <= 256);
                    assert!(len <= 256);
                    let _ = map.entries();
                }
            })
        };

        writers.into_iter().for_each(|h| h.join().unwrap());
        reader.join().unwrap();

        // Every external reference is gone now.
        assert_eq!(map.len(), 0);
        assert!(map.keys().is_empty());
    }
}
