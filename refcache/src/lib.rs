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

//! refcache - A reference-tiered object cache for Rust.
//!
//! An object cache maps keys to shared values and coordinates their production: the first thread that misses a
//! key claims it with a write lock, computes the value and puts it, while every other reader of the key waits for
//! the value instead of computing it again.
//!
//! ```
//! use std::sync::Arc;
//!
//! use refcache::{CacheBuilder, ObjectCache, Strength};
//!
//! let cache = CacheBuilder::<u64, String>::new().with_retention(Strength::Soft).build();
//!
//! let value = cache
//!     .get_or_fetch(&4326, || Ok::<_, anyhow::Error>(Arc::new("WGS 84".to_string())))
//!     .unwrap();
//! assert_eq!(value.as_str(), "WGS 84");
//! assert_eq!(cache.peek(&4326), Some(value));
//! ```

/// Commonly used types of refcache.
pub mod prelude;
pub use prelude::*;
