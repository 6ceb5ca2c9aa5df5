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
    code::{Key, Value},
    error::{Error, Result},
};

/// A concurrent key to value cache with per-key producer locking.
///
/// The expected usage is claim-before-compute:
///
/// ```
/// use std::sync::Arc;
///
/// use refcache_memory::{CacheBuilder, ObjectCache};
///
/// let cache = CacheBuilder::<String, String>::new().build();
/// let key = "epsg:4326".to_string();
///
/// let value = match cache.get(&key) {
///     Some(value) => value,
///     None => {
///         let guard = cache.lock(&key);
///         // Another producer may have finished while we were waiting for the lock.
///         match guard.peek() {
///             Some(value) => value,
///             None => {
///                 let value = Arc::new("WGS 84".to_string());
///                 guard.put(value.clone());
///                 value
///             }
///         }
///     }
/// };
/// assert_eq!(value.as_str(), "WGS 84");
/// ```
///
/// While a thread holds the lock of a key, [`ObjectCache::get`] from other threads on that key waits until the
/// lock is released. Threads working on different keys never wait for each other.
pub trait ObjectCache<K, V>: Send + Sync + 'static
where
    K: Key,
    V: Value,
{
    /// Get the value of `key`, waiting for an in-flight producer of the key to finish first.
    ///
    /// Returns `None` if no value is cached, or if the value has been reclaimed. A miss registers `key` without a
    /// value: it shows up in [`ObjectCache::keys`] until it is removed. A weak cache drops it once idle, a soft cache
    /// only on memory pressure.
    fn get(&self, key: &K) -> Option<Arc<V>>;

    /// Get the value of `key` without waiting, even if another thread is producing it. Never registers `key`.
    fn peek(&self, key: &K) -> Option<Arc<V>>;

    /// Acquire the exclusive producer lock of `key`, waiting while another thread holds it.
    ///
    /// Every `write_lock` must be paired with a [`ObjectCache::write_unlock`] from the same thread on every exit
    /// path. Prefer [`ObjectCache::lock`].
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock of `key`.
    fn write_lock(&self, key: &K);

    /// Release the producer lock of `key`.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the lock of `key`.
    fn write_unlock(&self, key: &K);

    /// Store `value` for `key`. Holding the lock of `key` is expected but not checked.
    fn put(&self, key: &K, value: Arc<V>);

    /// Remove `key`, returning its last live value.
    ///
    /// A holder of the removed key's lock can still release it with [`ObjectCache::write_unlock`].
    fn remove(&self, key: &K) -> Option<Arc<V>>;

    /// Snapshot of the keys currently known to the cache.
    ///
    /// Keys whose values have been reclaimed may or may not appear.
    fn keys(&self) -> HashSet<K>;

    /// Whether the cache knows `key`.
    fn contains_key(&self, key: &K) -> bool;

    /// Number of keys known to the cache.
    fn len(&self) -> usize;

    /// Whether the cache knows no key.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every key.
    fn clear(&self);

    /// Signal memory pressure, returning how many entries were dropped.
    ///
    /// Soft caches release their values unless they are owned elsewhere. Strong caches ignore the signal.
    fn reclaim(&self) -> usize;

    /// Acquire the producer lock of `key` as a guard that releases it when dropped.
    fn lock(&self, key: &K) -> WriteGuard<'_, K, V, Self>
    where
        Self: Sized,
    {
        self.write_lock(key);
        WriteGuard {
            cache: self,
            key: key.clone(),
            _marker: PhantomData,
        }
    }

    /// Get the value of `key`, or produce it with `fetch` under the lock of `key`.
    ///
    /// Concurrent callers for the same key run `fetch` at most once as long as its result stays cached. If `fetch`
    /// fails, nothing is cached, the lock is released, and the error is returned.
    fn get_or_fetch<F, E>(&self, key: &K, fetch: F) -> Result<Arc<V>>
    where
        Self: Sized,
        F: FnOnce() -> std::result::Result<Arc<V>, E>,
        E: Into<anyhow::Error>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let guard = self.lock(key);
        if let Some(value) = guard.peek() {
            return Ok(value);
        }

        let value = fetch().map_err(|e| Error::external(e).with_context("key", format!("{key:?}")))?;
        guard.put(value.clone());
        Ok(value)
    }
}

/// Scoped producer lock of a key, released on drop.
///
/// The lock belongs to the thread that acquired it, so the guard cannot be sent to another thread.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a, K, V, C>
where
    K: Key,
    V: Value,
    C: ObjectCache<K, V> + ?Sized,
{
    cache: &'a C,
    key: K,
    _marker: PhantomData<(fn() -> V, *const ())>,
}

impl<K, V, C> Debug for WriteGuard<'_, K, V, C>
where
    K: Key,
    V: Value,
    C: ObjectCache<K, V> + ?Sized,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteGuard").field("key", &self.key).finish()
    }
}

impl<K, V, C> WriteGuard<'_, K, V, C>
where
    K: Key,
    V: Value,
    C: ObjectCache<K, V> + ?Sized,
{
    /// The locked key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Value of the locked key, if another producer finished before the lock was acquired.
    pub fn peek(&self) -> Option<Arc<V>> {
        self.cache.peek(&self.key)
    }

    /// Store the produced value.
    pub fn put(&self, value: Arc<V>) {
        self.cache.put(&self.key, value)
    }
}

impl<K, V, C> Drop for WriteGuard<'_, K, V, C>
where
    K: Key,
    V: Value,
    C: ObjectCache<K, V> + ?Sized,
{
    fn drop(&mut self) {
        self.cache.write_unlock(&self.key);
    }
}
