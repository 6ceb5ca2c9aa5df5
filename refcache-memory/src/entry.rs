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

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, ThreadId},
};

use parking_lot::{Condvar, Mutex, RwLock};
use refcache_common::code::Value;

use crate::reference::{Reference, Slot, Strength};

/// The per-key record of an object cache: a value slot guarded by an exclusive producer lock.
///
/// State machine: `Unlocked -> (write_lock) -> Locked -> (write_unlock) -> Unlocked`.
///
/// - [`CacheEntry::get_value`] issued while another thread holds the lock suspends the caller until the lock is
///   released, then reads the value the producer left behind.
/// - [`CacheEntry::peek_value`] never suspends.
/// - [`CacheEntry::set_value`] does not require the lock. Producers are expected to hold it while producing.
///
/// A thread that never releases a lock it acquired starves every other caller of the entry forever. Prefer the
/// scoped [`crate::object::WriteGuard`] which releases on every exit path.
pub struct CacheEntry<V> {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
    slot: RwLock<Option<Reference<V>>>,
    strength: Strength,
    /// Set by memory pressure, reset by the next store.
    softened: AtomicBool,
}

impl<V> Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("owner", &*self.owner.lock())
            .field("slot", &*self.slot.read())
            .field("softened", &self.softened.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V> CacheEntry<V>
where
    V: Value,
{
    /// Create an unlocked entry without value whose values will be held with the given strength.
    pub fn new(strength: Strength) -> Self {
        Self {
            owner: Mutex::new(None),
            released: Condvar::new(),
            slot: RwLock::new(None),
            strength,
            softened: AtomicBool::new(false),
        }
    }

    /// Block until no other thread holds the lock of the entry, then hold it.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock. The lock is not re-entrant.
    pub fn write_lock(&self) {
        let current = thread::current().id();
        let mut owner = self.owner.lock();
        assert_ne!(
            *owner,
            Some(current),
            "cache entry write lock is not re-entrant, the calling thread already holds it"
        );
        while owner.is_some() {
            self.released.wait(&mut owner);
        }
        *owner = Some(current);
    }

    /// Release the lock of the entry.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the lock. Silently succeeding would break mutual exclusion.
    pub fn write_unlock(&self) {
        let current = thread::current().id();
        let mut owner = self.owner.lock();
        match *owner {
            Some(holder) if holder == current => {}
            Some(_) => panic!("cache entry write unlock from a thread that does not hold the write lock"),
            None => panic!("cache entry write unlock without a matching write lock"),
        }
        *owner = None;
        drop(owner);
        self.released.notify_all();
    }

    /// Whether any thread holds the lock.
    pub fn is_locked(&self) -> bool {
        self.owner.lock().is_some()
    }

    /// Whether the calling thread holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Wait for the in-flight production (if any) to finish, then read the value.
    ///
    /// The lock holder itself reads without waiting.
    pub fn get_value(&self) -> Option<Arc<V>> {
        let current = thread::current().id();
        let mut owner = self.owner.lock();
        while matches!(*owner, Some(holder) if holder != current) {
            self.released.wait(&mut owner);
        }
        // Read while the state is still observed unlocked.
        self.peek_value()
    }

    /// Store a value, replacing the previous slot.
    pub fn set_value(&self, value: Arc<V>) {
        let slot = Reference::new(value, self.strength);
        let mut guard = self.slot.write();
        *guard = Some(slot);
        self.softened.store(false, Ordering::Release);
    }

    /// Read the value immediately, ignoring the lock.
    pub fn peek_value(&self) -> Option<Arc<V>> {
        self.slot.read().as_ref().and_then(|slot| slot.get())
    }

    /// Whether the entry holds no live value, either never populated or reclaimed.
    pub fn is_vacant(&self) -> bool {
        self.slot.read().as_ref().is_none_or(|slot| slot.is_cleared())
    }

    /// Whether the entry carries nothing worth keeping for its strength.
    ///
    /// A weak entry is reclaimable once vacant. A soft entry additionally needs to have been softened by memory
    /// pressure since its last store, so an entry without value survives until then.
    pub fn is_reclaimable(&self) -> bool {
        match self.strength {
            Strength::Strong => false,
            Strength::Soft => self.softened.load(Ordering::Acquire) && self.is_vacant(),
            Strength::Weak => self.is_vacant(),
        }
    }

    /// Release the soft hold of the value, if any, and mark the entry as softened.
    pub fn soften(&self) {
        let slot = self.slot.read();
        if let Some(slot) = slot.as_ref() {
            slot.soften();
        }
        self.softened.store(true, Ordering::Release);
    }

    /// Reference strength of the stored values.
    pub fn strength(&self) -> Strength {
        self.strength
    }
}

/// Slot holding a cache entry in a soft or weak cache.
///
/// The entry is reclaimable as a whole once nobody but the table refers to it (no lock holder, no waiter, no
/// guard) and [`CacheEntry::is_reclaimable`] holds.
pub struct EntrySlot<V> {
    entry: Arc<CacheEntry<V>>,
}

impl<V> Debug for EntrySlot<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EntrySlot").field(&self.entry).finish()
    }
}

impl<V> EntrySlot<V> {
    pub(crate) fn entry(&self) -> &Arc<CacheEntry<V>> {
        &self.entry
    }
}

impl<V> Slot for EntrySlot<V>
where
    V: Value,
{
    type Target = Arc<CacheEntry<V>>;

    fn new(target: &Self::Target, _: Strength) -> Self {
        Self { entry: target.clone() }
    }

    fn get(&self) -> Option<Self::Target> {
        if self.is_cleared() {
            None
        } else {
            Some(self.entry.clone())
        }
    }

    fn is_cleared(&self) -> bool {
        // Handles are only cloned out of the table under its shard lock, the count cannot grow behind our back.
        Arc::strong_count(&self.entry) == 1 && !self.entry.is_locked() && self.entry.is_reclaimable()
    }

    fn soften(&self) {
        self.entry.soften();
    }
}
