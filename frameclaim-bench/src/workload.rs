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

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Barrier,
    },
    time::Instant,
};

use frameclaim::prelude::*;
use hdrhistogram::Histogram;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rand_distr::{Distribution, Zipf};

use crate::{
    report::{Counters, Report},
    Args,
};

/// Cached value of the bench. Word 0 holds the id of the last frame that wrote the value, plus one.
pub type Payload = [u64; 8];

/// Entries untouched for more than this many frames may be evicted.
const AGE: u64 = 4;

static CLOCK: FrameClock = FrameClock::new();

pub struct World;

impl FrameSource for World {
    fn current() -> Frame {
        CLOCK.current()
    }
}

type Region<C> = Aged<C, World, AGE>;

enum Sampler {
    Uniform(u64),
    Zipf(Zipf<f64>),
}

impl Sampler {
    fn new(keys: u64, s: f64) -> anyhow::Result<Self> {
        anyhow::ensure!(keys > 0, "\"--keys\" value must be greater than 0");
        if s == 0.0 {
            return Ok(Self::Uniform(keys));
        }
        Ok(Self::Zipf(Zipf::new(keys as f64, s)?))
    }

    fn sample(&self, rng: &mut impl Rng) -> u64 {
        match self {
            Sampler::Uniform(keys) => rng.random_range(0..*keys),
            // Zipf samples lie in `[1, keys]`.
            Sampler::Zipf(zipf) => zipf.sample(rng) as u64 - 1,
        }
    }
}

fn histogram() -> anyhow::Result<Histogram<u64>> {
    // 1ns ~ 10s
    Ok(Histogram::new_with_bounds(1, 10_000_000_000, 3)?)
}

#[derive(Default)]
struct Tally {
    claimed: AtomicU64,
    claimed_shared: AtomicU64,
    upgraded: AtomicU64,
    already_processed: AtomicU64,
    taken: AtomicU64,
    missed: AtomicU64,
    failed: AtomicU64,
}

impl Tally {
    fn record(&self, status: ClaimStatus) {
        let counter = match status {
            ClaimStatus::Claimed => &self.claimed,
            ClaimStatus::ClaimedUpgradeable | ClaimStatus::ClaimedShared => &self.claimed_shared,
            ClaimStatus::AlreadyProcessed => &self.already_processed,
            ClaimStatus::Taken => &self.taken,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn counters(&self) -> Counters {
        Counters {
            claimed: self.claimed.load(Ordering::Relaxed),
            claimed_shared: self.claimed_shared.load(Ordering::Relaxed),
            upgraded: self.upgraded.load(Ordering::Relaxed),
            already_processed: self.already_processed.load(Ordering::Relaxed),
            taken: self.taken.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct Context<'a, C> {
    args: &'a Args,
    cache: &'a EvictableCache<u64, Region<C>>,
    sampler: &'a Sampler,
    barrier: &'a Barrier,
    tally: &'a Tally,
}

/// Process one key in the current frame.
fn touch<C>(ctx: &Context<'_, C>, worker: WorkerId, frame: Frame, key: u64, shared: bool)
where
    C: Claimable<Payload = Payload>,
{
    let region = match ctx.cache.get(worker, &key) {
        Some(region) => region,
        None => {
            ctx.tally.missed.fetch_add(1, Ordering::Relaxed);
            match ctx.cache.insert(worker, key) {
                Ok(region) => region,
                Err(e) => {
                    // A failing worker must keep meeting the frame barrier.
                    tracing::error!(key, "[bench]: insert failed: {e}");
                    ctx.tally.failed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
    };

    let stamp = frame.id() + 1;
    let ty = if shared {
        ClaimType::NonExclusiveShared
    } else {
        ClaimType::Exclusive
    };
    let result = region.claim_yield_loop(worker, ty, frame);
    ctx.tally.record(result.status());
    let ClaimResult::Claimed(mut claim) = result else {
        return;
    };

    if claim.status() == ClaimStatus::Claimed {
        write(claim.get_mut(), stamp, key);
        return;
    }
    // A shared reader refreshes a stale value if it holds the upgradeable read.
    if (*claim)[0] < stamp && claim.upgrade() == ClaimStatus::Claimed {
        ctx.tally.upgraded.fetch_add(1, Ordering::Relaxed);
        write(claim.get_mut(), stamp, key);
    }
}

fn write(payload: &mut Payload, stamp: u64, key: u64) {
    payload[0] = stamp;
    for (i, word) in payload.iter_mut().enumerate().skip(1) {
        *word = word.wrapping_add(key ^ i as u64);
    }
}

/// Run the frame loop over a cache of `C` values.
pub fn bench<C>(args: &Args) -> anyhow::Result<Report>
where
    C: Claimable<Payload = Payload>,
{
    anyhow::ensure!(
        args.workers > 0 && args.workers < WorkerId::COUNT,
        "\"--workers\" value must be in [1, {})",
        WorkerId::COUNT
    );
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.shared_ratio),
        "\"--shared-ratio\" value must be in [0, 1]"
    );

    let sampler = Sampler::new(args.keys, args.zipf)?;
    let evictor = WorkerId::new(WorkerId::COUNT - 1)?;
    let cache = EvictableCacheBuilder::<u64, Region<C>>::new(args.target_size, evictor)
        .with_hash_bits(args.hash_bits)
        .with_target_contention(args.target_contention)
        .build()?;
    let barrier = Barrier::new(args.workers + 1);
    let tally = Tally::default();
    let ctx = Context {
        args,
        cache: &cache,
        sampler: &sampler,
        barrier: &barrier,
        tally: &tally,
    };

    // Workers share barriers with the frame loop and must not fail once spawned.
    let mut frame_time = histogram()?;
    let mut op_latency = histogram()?;
    let workers = (0..args.workers)
        .map(|id| -> anyhow::Result<_> { Ok((id, WorkerId::new(id)?, histogram()?)) })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let start = Instant::now();
    std::thread::scope(|s| -> anyhow::Result<()> {
        let handles = workers
            .into_iter()
            .map(|(id, worker, latency)| {
                let ctx = &ctx;
                s.spawn(move || run_worker(ctx, id, worker, latency))
            })
            .collect::<Vec<_>>();

        for _ in 0..args.frames {
            #[cfg(feature = "tracing")]
            let root = fastrace::Span::root("frame", fastrace::collector::SpanContext::random());
            #[cfg(feature = "tracing")]
            let _guard = root.set_local_parent();

            let frame = CLOCK.advance();
            let now = Instant::now();
            barrier.wait();
            barrier.wait();
            frame_time.saturating_record(now.elapsed().as_nanos() as u64);

            if let Err(e) = cache.do_eviction_if_necessary() {
                tracing::error!(%frame, "[bench]: evictor failed: {e}");
            }
        }

        for handle in handles {
            let latency = handle.join().map_err(|_| anyhow::anyhow!("worker panicked"))?;
            op_latency.add(latency)?;
        }
        Ok(())
    })?;
    let elapsed = start.elapsed();

    // Age everything out and let the last run finish.
    for _ in 0..=AGE {
        CLOCK.advance();
    }
    cache.wait_for_evictor()?;
    cache.do_eviction_if_necessary()?;
    cache.wait_for_evictor()?;

    // Printing resets the eviction counters.
    let stats = cache.stats();
    let mut text = vec![];
    cache.print_stats(&mut text, "  ")?;
    let report = Report {
        workers: args.workers,
        frames: args.frames,
        elapsed: elapsed.as_secs_f64(),
        counters: tally.counters(),
        op_latency: (&op_latency).into(),
        frame_time: (&frame_time).into(),
        cache: stats,
        cache_text: String::from_utf8(text)?,
    };
    Ok(report)
}

fn run_worker<C>(ctx: &Context<'_, C>, id: usize, worker: WorkerId, mut latency: Histogram<u64>) -> Histogram<u64>
where
    C: Claimable<Payload = Payload>,
{
    let mut rng = SmallRng::seed_from_u64(ctx.args.seed.wrapping_add(id as u64));

    for _ in 0..ctx.args.frames {
        ctx.barrier.wait();
        let frame = World::current();
        for _ in 0..ctx.args.ops_per_frame {
            let key = ctx.sampler.sample(&mut rng);
            let shared = rng.random_bool(ctx.args.shared_ratio);
            let now = Instant::now();
            touch(ctx, worker, frame, key, shared);
            latency.saturating_record(now.elapsed().as_nanos() as u64);
        }
        ctx.barrier.wait();
    }
    latency
}
