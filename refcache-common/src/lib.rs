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

//! Shared components for refcache.

/// Assertion helpers.
pub mod assert;
/// Key and value bounds and the default hash builder.
pub mod code;
/// Error type of refcache.
pub mod error;
/// Event listener for entries leaving a cache.
pub mod event;
/// Scoped functional programming extensions.
pub mod scope;
