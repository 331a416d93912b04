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

use std::sync::Barrier;

use frameclaim::prelude::*;

static CLOCK: FrameClock = FrameClock::new();

struct World;

impl FrameSource for World {
    fn current() -> Frame {
        CLOCK.current()
    }
}

const AGE: u64 = 3;

/// Frame of the last update plus one, and the number of updates.
type Region = Aged<VolatileClaimable<[u64; 2]>, World, AGE>;

#[test_log::test]
fn test_frame_loop() {
    const WORKERS: usize = 4;
    const FRAMES: u64 = 50;
    const KEYS: u64 = 256;
    const TOUCHES: u64 = 32;

    let cache = EvictableCacheBuilder::<u64, Region>::new(64, WorkerId::new(WorkerId::COUNT - 1).unwrap())
        .with_hash_bits(6)
        .build()
        .unwrap();
    let barrier = Barrier::new(WORKERS + 1);

    std::thread::scope(|s| {
        for id in 0..WORKERS {
            let (cache, barrier) = (&cache, &barrier);
            s.spawn(move || {
                let w = WorkerId::new(id).unwrap();
                for f in 0..FRAMES {
                    barrier.wait();
                    let frame = World::current();
                    // Windows of neighbouring workers overlap, so most keys are contended.
                    for i in 0..TOUCHES {
                        let key = (f * 31 + id as u64 * 7 + i) % KEYS;
                        let region = cache.insert(w, key).unwrap();
                        if let ClaimResult::Claimed(mut claim) = region.claim_yield_loop(w, ClaimType::Exclusive, frame) {
                            let region = claim.get_mut();
                            assert_ne!(region[0], frame.id() + 1, "key {key} processed twice in {frame}");
                            region[0] = frame.id() + 1;
                            region[1] += 1;
                        };
                    }
                    barrier.wait();
                }
            });
        }

        for _ in 0..FRAMES {
            CLOCK.advance();
            barrier.wait();
            barrier.wait();
            cache.do_eviction_if_necessary().unwrap();
        }
    });

    // Let every entry age out so that the outstanding run can reach the target.
    for _ in 0..=AGE {
        CLOCK.advance();
    }
    cache.wait_for_evictor().unwrap();
    cache.do_eviction_if_necessary().unwrap();
    cache.wait_for_evictor().unwrap();

    let stats = cache.stats();
    assert!(stats.entries_evicted > 0);
    // The last check only starts a run above the kickoff size.
    assert!(stats.table.size <= 64 + 64 / 4, "{stats:?}");
}
