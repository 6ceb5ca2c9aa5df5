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

use std::hash::{BuildHasher, BuildHasherDefault, Hash};

/// Key trait for the object cache.
///
/// Keys are owned by the caller and never mutated by the cache. A key type that cannot hash or compare
/// is rejected at compile time by this bound.
pub trait Key: Send + Sync + 'static + Hash + Eq + Clone + std::fmt::Debug {}

/// Value trait for the object cache.
///
/// Values are shared with the cache through [`std::sync::Arc`], so no `Clone` is required.
pub trait Value: Send + Sync + 'static {}

impl<T: Send + Sync + 'static + Hash + Eq + Clone + std::fmt::Debug> Key for T {}
impl<T: Send + Sync + 'static> Value for T {}

/// Hash builder trait.
pub trait HashBuilder: BuildHasher + Send + Sync + 'static {}
impl<T> HashBuilder for T where T: BuildHasher + Send + Sync + 'static {}

/// The default hasher for refcache.
///
/// It is guaranteed that the hash results of the same key are the same across different runs.
pub type DefaultHasher = BuildHasherDefault<twox_hash::XxHash64>;
