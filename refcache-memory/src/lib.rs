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

//! In-memory object cache for refcache.
//!
//! The cache maps keys to shared values (`Arc<V>`) and lets one producer per key compute a missing value while
//! readers of the key wait for it. How long values stay cached is chosen per cache with a [`Strength`]:
//!
//! - strong caches keep values until they are removed,
//! - soft caches keep values until memory pressure is signaled with [`ObjectCache::reclaim`],
//! - weak caches keep values only as long as somebody else owns them.

mod cache;
mod chain;
mod entry;
mod expunge;
mod generic;
mod object;
mod reference;
mod table;

mod prelude;
pub use prelude::*;
