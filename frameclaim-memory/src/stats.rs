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

//! Structure statistics of the cache table.
//!
//! Unlike the counters reported by the evictable cache, these are read by the table itself (e.g. the assigned slot
//! count drives eviction), so they are updated per operation without batching.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Live counters of a cache table.
///
/// A slot is counted before it is filled and uncounted after it is emptied, so the size never drops below the
/// number of filled slots.
#[derive(Debug, Default)]
pub struct StructureStats {
    size: AtomicUsize,
    hops_total: AtomicUsize,
    hops_samples: AtomicUsize,
}

impl StructureStats {
    /// Count a slot that is about to be filled.
    pub fn reserve(&self) {
        self.size.fetch_add(1, Ordering::Relaxed);
    }

    /// Uncount a slot that was emptied, or whose reservation was not used.
    pub fn erased(&self) {
        self.size.fetch_sub(1, Ordering::Relaxed);
    }

    /// A key was assigned to a reserved slot after probing `hops` positions past its home.
    pub fn inserted(&self, hops: usize) {
        self.hops_total.fetch_add(hops, Ordering::Relaxed);
        self.hops_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of assigned slots.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Average number of positions probed past the home slot by inserts.
    pub fn contention(&self) -> f64 {
        let samples = self.hops_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0.0;
        }
        self.hops_total.load(Ordering::Relaxed) as f64 / samples as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_stats() {
        let stats = StructureStats::default();
        assert_eq!(stats.contention(), 0.0);

        stats.reserve();
        stats.inserted(0);
        stats.reserve();
        stats.inserted(3);
        stats.erased();
        assert_eq!(stats.size(), 1);
        assert_eq!(stats.contention(), 1.5);

        // A reservation that lost its slot does not count as an insert.
        stats.reserve();
        stats.erased();
        assert_eq!(stats.size(), 1);
        assert_eq!(stats.contention(), 1.5);
    }
}
