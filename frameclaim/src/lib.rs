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

#![cfg_attr(docsrs, feature(doc_cfg))]

//! frameclaim is a concurrent object cache for frame-based simulation loops.
//!
//! Worker threads check cached entries out with typed claims scoped to a frame, so that per-frame work on an
//! entry runs at most once. A background evictor keeps the cache near its target size without ever taking an
//! entry from under a claim.
//!
//! ```rust
//! use frameclaim::prelude::*;
//!
//! static CLOCK: FrameClock = FrameClock::new();
//!
//! struct World;
//!
//! impl FrameSource for World {
//!     fn current() -> Frame {
//!         CLOCK.current()
//!     }
//! }
//!
//! // Entries not seen for more than 60 frames may be evicted.
//! type Region = Aged<LockedClaimable<Vec<u32>>, World, 60>;
//!
//! let evictor = WorkerId::new(61).unwrap();
//! let cache = EvictableCacheBuilder::<u64, Region>::new(1024, evictor).build().unwrap();
//!
//! let worker = WorkerId::new(0).unwrap();
//! let frame = CLOCK.advance();
//! let region = cache.insert(worker, 42).unwrap();
//! match region.claim(worker, ClaimType::Exclusive, frame) {
//!     ClaimResult::Claimed(mut claim) => claim.get_mut().push(1),
//!     ClaimResult::AlreadyProcessed | ClaimResult::Taken => {}
//! }
//! assert_eq!(
//!     region.claim(worker, ClaimType::Exclusive, frame).status(),
//!     ClaimStatus::AlreadyProcessed
//! );
//!
//! cache.do_eviction_if_necessary().unwrap();
//! ```

use frameclaim_common as common;
use frameclaim_memory as memory;

/// Re-exports of everything needed to use the cache.
pub mod prelude;
pub use prelude::*;
