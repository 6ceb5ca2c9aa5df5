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

//! Fuzzy test for refcache object caches.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use itertools::Itertools;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use refcache::{Cache, CacheBuilder, ChainedCache, ObjectCache, Strength};

const THREADS: usize = 8;
const KEYS: u64 = 64;
const OPS: usize = 2000;
const HOLD: usize = 16;

const COMPUTE_WAIT: Duration = Duration::from_micros(200);

fn value_of(key: u64) -> String {
    format!("value-{key}")
}

struct Counters {
    computations: Vec<AtomicUsize>,
}

impl Counters {
    fn new() -> Self {
        Self {
            computations: (0..KEYS).map(|_| AtomicUsize::new(0)).collect_vec(),
        }
    }

    fn compute(&self, key: u64) -> Arc<String> {
        self.computations[key as usize].fetch_add(1, Ordering::SeqCst);
        thread::sleep(COMPUTE_WAIT);
        Arc::new(value_of(key))
    }
}

/// Claim-before-compute spelled out with the raw lock operations.
fn get_or_compute<C>(cache: &C, counters: &Counters, key: u64) -> Arc<String>
where
    C: ObjectCache<u64, String>,
{
    if let Some(value) = cache.get(&key) {
        return value;
    }
    cache.write_lock(&key);
    let value = match cache.peek(&key) {
        Some(value) => value,
        None => {
            let value = counters.compute(key);
            cache.put(&key, value.clone());
            value
        }
    };
    cache.write_unlock(&key);
    value
}

fn run<C>(cache: Arc<C>, counters: Arc<Counters>, removes: bool)
where
    C: ObjectCache<u64, String>,
{
    let handles = (0..THREADS)
        .map(|i| {
            let cache = cache.clone();
            let counters = counters.clone();
            thread::spawn(move || {
                let mut rng = SmallRng::seed_from_u64(i as u64);
                let mut held = Vec::with_capacity(HOLD);

                for _ in 0..OPS {
                    let key = rng.random_range(0..KEYS);
                    let value = match rng.random_range(0..100) {
                        0..40 => Some(get_or_compute(cache.as_ref(), &counters, key)),
                        40..70 => Some(
                            cache
                                .get_or_fetch(&key, || Ok::<_, anyhow::Error>(counters.compute(key)))
                                .unwrap(),
                        ),
                        70..85 => cache.peek(&key),
                        85..95 if removes => cache.remove(&key),
                        95..97 if removes => {
                            cache.reclaim();
                            None
                        }
                        _ => {
                            assert!(cache.keys().iter().all(|k| *k < KEYS));
                            None
                        }
                    };

                    if let Some(value) = value {
                        assert_eq!(value.as_str(), value_of(key));
                        if held.len() == HOLD {
                            held.swap_remove(rng.random_range(0..HOLD));
                        }
                        held.push(value);
                    }
                }
            })
        })
        .collect_vec();

    for handle in handles {
        handle.join().unwrap();
    }

    // No lock leaked: every key can be claimed again.
    for key in 0..KEYS {
        cache.write_lock(&key);
        cache.write_unlock(&key);
    }
}

fn build(retention: Strength) -> Cache<u64, String> {
    CacheBuilder::new().with_retention(retention).with_shards(4).build()
}

#[test_log::test]
fn test_strong_cache_computes_each_key_once() {
    let cache = Arc::new(build(Strength::Strong));
    let counters = Arc::new(Counters::new());

    run(cache.clone(), counters.clone(), false);

    for key in 0..KEYS {
        match counters.computations[key as usize].load(Ordering::SeqCst) {
            0 => {}
            1 => assert_eq!(cache.peek(&key).as_deref(), Some(&value_of(key))),
            n => panic!("key {key} computed {n} times"),
        }
    }
    assert_eq!(cache.len(), KEYS as usize);
}

#[test_log::test]
fn test_mixed_operations() {
    for retention in [Strength::Strong, Strength::Soft, Strength::Weak] {
        tracing::info!("fuzzy test on {retention} cache");

        let cache = Arc::new(build(retention));
        let counters = Arc::new(Counters::new());

        run(cache.clone(), counters.clone(), true);

        match retention {
            Strength::Strong => assert_eq!(cache.len(), KEYS as usize),
            Strength::Soft => {
                cache.reclaim();
                assert!(cache.is_empty());
            }
            Strength::Weak => assert!(cache.is_empty()),
        }
    }
}

#[test_log::test]
fn test_chained_cache() {
    let cache = Arc::new(ChainedCache::new(build(Strength::Weak), build(Strength::Soft)));
    let counters = Arc::new(Counters::new());

    run(cache.clone(), counters.clone(), true);

    cache.reclaim();
    assert!(cache.is_empty());
}
