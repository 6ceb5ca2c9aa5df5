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
    str::FromStr,
    sync::{Arc, Weak},
};

use arc_swap::ArcSwapOption;
use refcache_common::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};

/// Reference strength of a slot.
///
/// - [`Strength::Strong`]: the value lives until the slot is replaced or removed.
/// - [`Strength::Soft`]: the value is kept alive by the slot until memory pressure is signaled with
///   [`Slot::soften`], from then on the slot behaves like a weak one.
/// - [`Strength::Weak`]: the value is reclaimed as soon as the last `Arc` held outside of the cache is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    /// Ordinary ownership.
    #[default]
    #[serde(alias = "all")]
    Strong,
    /// Reclaimable under memory pressure.
    Soft,
    /// Reclaimable once no other owner references the value.
    Weak,
}

impl Strength {
    /// Convert self into static str.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strength::Strong => "strong",
            Strength::Soft => "soft",
            Strength::Weak => "weak",
        }
    }
}

impl std::fmt::Display for Strength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Strength {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strong" | "all" => Ok(Strength::Strong),
            "soft" => Ok(Strength::Soft),
            "weak" => Ok(Strength::Weak),
            _ => Err(Error::new(ErrorKind::Config, "unknown retention policy").with_context("retention", s)),
        }
    }
}

/// A reference-holding container stored by [`crate::expunge::ExpungingMap`].
///
/// A slot is "cleared" once the referent it pointed at has been reclaimed. A cleared slot must be treated
/// exactly like an absent one by every read path.
pub trait Slot: Send + Sync + 'static {
    /// The shared handle handed out to callers.
    type Target: Clone + Send + Sync + 'static;

    /// Create a slot referencing `target` with the given strength.
    fn new(target: &Self::Target, strength: Strength) -> Self;

    /// Get the referent, or `None` if it has been reclaimed.
    fn get(&self) -> Option<Self::Target>;

    /// Whether the referent has been reclaimed and the slot may be expunged.
    fn is_cleared(&self) -> bool;

    /// Release the memory-pressure-sensitive part of the hold, if any.
    fn soften(&self) {}
}

enum Inner<V> {
    Strong(Arc<V>),
    Soft { hold: ArcSwapOption<V>, weak: Weak<V> },
    Weak(Weak<V>),
}

/// A single value holder whose retention is strong, soft or weak.
pub struct Reference<V> {
    inner: Inner<V>,
}

impl<V> Debug for Reference<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reference")
            .field("strength", &self.strength())
            .field("cleared", &self.is_cleared())
            .finish()
    }
}

impl<V> Reference<V> {
    /// Create a reference to `value` with the given strength.
    pub fn new(value: Arc<V>, strength: Strength) -> Self {
        let inner = match strength {
            Strength::Strong => Inner::Strong(value),
            Strength::Soft => Inner::Soft {
                weak: Arc::downgrade(&value),
                hold: ArcSwapOption::new(Some(value)),
            },
            Strength::Weak => Inner::Weak(Arc::downgrade(&value)),
        };
        Self { inner }
    }

    /// Read the current referent, or `None` if it was reclaimed.
    pub fn get(&self) -> Option<Arc<V>> {
        match &self.inner {
            Inner::Strong(value) => Some(value.clone()),
            Inner::Soft { hold, weak } => hold.load_full().or_else(|| weak.upgrade()),
            Inner::Weak(weak) => weak.upgrade(),
        }
    }

    /// Get the strength of the reference.
    pub fn strength(&self) -> Strength {
        match &self.inner {
            Inner::Strong(_) => Strength::Strong,
            Inner::Soft { .. } => Strength::Soft,
            Inner::Weak(_) => Strength::Weak,
        }
    }

    /// Whether the reference is strong.
    pub fn is_strong(&self) -> bool {
        matches!(self.inner, Inner::Strong(_))
    }

    /// Whether the reference is soft.
    pub fn is_soft(&self) -> bool {
        matches!(self.inner, Inner::Soft { .. })
    }

    /// Whether the reference is weak.
    pub fn is_weak(&self) -> bool {
        matches!(self.inner, Inner::Weak(_))
    }

    /// Whether the referent has been reclaimed. A strong reference is never cleared.
    pub fn is_cleared(&self) -> bool {
        match &self.inner {
            Inner::Strong(_) => false,
            // The soft hold is a strong count itself, so the weak count covers both.
            Inner::Soft { weak, .. } | Inner::Weak(weak) => weak.strong_count() == 0,
        }
    }

    /// Drop the strong hold of a soft reference. No-op for strong and weak references.
    pub fn soften(&self) {
        if let Inner::Soft { hold, .. } = &self.inner {
            hold.store(None);
        }
    }
}

impl<V> Slot for Reference<V>
where
    V: Send + Sync + 'static,
{
    type Target = Arc<V>;

    fn new(target: &Self::Target, strength: Strength) -> Self {
        Reference::new(target.clone(), strength)
    }

    fn get(&self) -> Option<Self::Target> {
        Reference::get(self)
    }

    fn is_cleared(&self) -> bool {
        Reference::is_cleared(self)
    }

    fn soften(&self) {
        Reference::soften(self)
    }
}
