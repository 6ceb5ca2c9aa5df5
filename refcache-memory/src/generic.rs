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

use std::{collections::HashSet, fmt::Debug, sync::Arc};

use hashbrown::HashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use refcache_common::{
    code::{DefaultHasher, Key, Value},
    event::Event,
};

use crate::{
    entry::CacheEntry,
    object::ObjectCache,
    reference::Strength,
    table::{EntryTable, ReferenceTable, StrongTable},
};

/// Object cache holding its entries until they are removed.
pub type StrongCache<K, V, S = DefaultHasher> = GenericCache<K, V, StrongTable<K, V, S>>;

/// Object cache whose entries go away once idle with their values reclaimed.
///
/// The [`Strength`] the table was built with decides whether values are held softly or weakly.
pub type ReferenceCache<K, V, S = DefaultHasher> = GenericCache<K, V, ReferenceTable<K, V, S>>;

/// Object cache over an [`EntryTable`].
pub struct GenericCache<K, V, T>
where
    K: Key,
    V: Value,
    T: EntryTable<K, V>,
{
    table: T,
    /// Entries removed from the table while locked, kept reachable by key for their holders to unlock.
    detached: Mutex<HashMap<K, Vec<Arc<CacheEntry<V>>>>>,
}

impl<K, V, T> Debug for GenericCache<K, V, T>
where
    K: Key,
    V: Value,
    T: EntryTable<K, V>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericCache")
            .field("strength", &self.table.strength())
            .field("detached", &self.detached.lock().len())
            .finish()
    }
}

impl<K, V, T> GenericCache<K, V, T>
where
    K: Key,
    V: Value,
    T: EntryTable<K, V>,
{
    /// Create an object cache over the given table.
    pub fn new(table: T) -> Self {
        Self {
            table,
            detached: Mutex::new(HashMap::new()),
        }
    }

    /// Reference strength of the cached values.
    pub fn strength(&self) -> Strength {
        self.table.strength()
    }

    fn detach(detached: &mut HashMap<K, Vec<Arc<CacheEntry<V>>>>, key: &K, entry: &Arc<CacheEntry<V>>) {
        if entry.is_locked() {
            tracing::debug!("[cache]: entry {key:?} removed while locked, keep it for its holder to unlock");
            let entries = detached.entry(key.clone()).or_default();
            entries.retain(|e| e.is_locked());
            entries.push(entry.clone());
        }
    }

    /// Report keys leaving the cache. Must be called with no lock of the cache held, the listener may call back.
    fn notify(&self, event: Event, keys: impl IntoIterator<Item = K>) {
        if let Some(listener) = self.table.event_listener() {
            for key in keys {
                listener.on_leave(event, &key);
            }
        }
    }
}

impl<K, V, T> ObjectCache<K, V> for GenericCache<K, V, T>
where
    K: Key,
    V: Value,
    T: EntryTable<K, V>,
{
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "refcache::memory::generic::get"))]
    fn get(&self, key: &K) -> Option<Arc<V>> {
        // A miss leaves a valueless entry behind for the next producer to claim. The handle pins the entry while
        // waiting.
        self.table.get_or_create(key).get_value()
    }

    fn peek(&self, key: &K) -> Option<Arc<V>> {
        self.table.lookup(key).and_then(|entry| entry.peek_value())
    }

    #[cfg_attr(feature = "tracing", fastrace::trace(name = "refcache::memory::generic::write_lock"))]
    fn write_lock(&self, key: &K) {
        self.table.get_or_create(key).write_lock();
    }

    fn write_unlock(&self, key: &K) {
        if let Some(entry) = self.table.lookup(key) {
            if entry.is_held_by_current_thread() {
                entry.write_unlock();
                return;
            }
        }

        let entry = {
            let mut detached = self.detached.lock();
            let entry = detached.get_mut(key).and_then(|entries| {
                let index = entries.iter().position(|e| e.is_held_by_current_thread())?;
                let entry = entries.swap_remove(index);
                entries.retain(|e| e.is_locked());
                Some(entry)
            });
            if detached.get(key).is_some_and(|entries| entries.is_empty()) {
                detached.remove(key);
            }
            entry
        };

        match entry {
            Some(entry) => entry.write_unlock(),
            None => panic!("write unlock on key {key:?} without a matching write lock"),
        }
    }

    #[cfg_attr(feature = "tracing", fastrace::trace(name = "refcache::memory::generic::put"))]
    fn put(&self, key: &K, value: Arc<V>) {
        self.table.get_or_create(key).set_value(value);
    }

    fn remove(&self, key: &K) -> Option<Arc<V>> {
        let (key, entry) = {
            // Hold the registry across the removal so a concurrent unlock of the key never misses the entry.
            let mut detached = self.detached.lock();
            let (key, entry) = self.table.remove(key)?;
            Self::detach(&mut detached, &key, &entry);
            (key, entry)
        };
        self.notify(Event::Remove, std::iter::once(key));
        entry.peek_value()
    }

    fn keys(&self) -> HashSet<K> {
        self.table.keys().into_iter().collect()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.table.lookup(key).is_some()
    }

    fn len(&self) -> usize {
        self.table.len()
    }

    fn clear(&self) {
        let keys = {
            let mut detached = self.detached.lock();
            self.table
                .drain()
                .into_iter()
                .map(|(key, entry)| {
                    Self::detach(&mut detached, &key, &entry);
                    key
                })
                .collect_vec()
        };
        self.notify(Event::Clear, keys);
    }

    fn reclaim(&self) -> usize {
        self.table.reclaim()
    }
}
