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

use crate::code::Key;

/// Event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Entry removed explicitly.
    Remove,
    /// Entry dropped by a cache clear.
    Clear,
    /// Entry expunged after its referent was reclaimed.
    Expunge,
}

/// Trait for the customized event listener.
pub trait EventListener: Send + Sync + 'static {
    /// Associated key type.
    type Key;

    /// Called when a key leaves the cache with the reason.
    ///
    /// The listener is called out of the critical sections of the key table shards.
    #[expect(unused_variables)]
    fn on_leave(&self, reason: Event, key: &Self::Key)
    where
        Self::Key: Key,
    {
    }
}

