// Copyright 2026 frameclaim Project Authors
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

//! Claimable cache entries, the chained cache table and the evictable cache for frameclaim.
//!
//! Workers check entries out with typed claims scoped to a frame (see [`claim`]), so that work on an entry runs at
//! most once per frame. The [`evictable::EvictableCache`] keeps such entries in a concurrent open-addressing
//! [`table::Table`] and trims it back to its target size in the background.

/// Claim types, claim results and the two claimable backends.
pub mod claim;
/// The evictable cache and its evictor.
pub mod evictable;
/// Slot entries of the cache table.
pub mod monomer;
/// Structure statistics.
pub mod stats;
/// The chained open-addressing cache table.
pub mod table;

/// Re-exports of the commonly used types.
pub mod prelude;
