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

use std::io::Write;

use frameclaim::prelude::*;
use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Claim outcomes of all workers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Counters {
    pub claimed: u64,
    pub claimed_shared: u64,
    pub upgraded: u64,
    pub already_processed: u64,
    pub taken: u64,
    /// Lookups that had to insert.
    pub missed: u64,
    /// Inserts that failed.
    pub failed: u64,
}

impl Counters {
    fn ops(&self) -> u64 {
        self.claimed + self.claimed_shared + self.already_processed + self.taken + self.failed
    }
}

/// Percentiles of a histogram, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Percentiles {
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub max: u64,
}

impl From<&Histogram<u64>> for Percentiles {
    fn from(histogram: &Histogram<u64>) -> Self {
        Self {
            mean: histogram.mean(),
            p50: histogram.value_at_quantile(0.5),
            p90: histogram.value_at_quantile(0.9),
            p99: histogram.value_at_quantile(0.99),
            p999: histogram.value_at_quantile(0.999),
            max: histogram.max(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Report {
    pub workers: usize,
    pub frames: u64,
    /// Wall time of the frame loop in seconds.
    pub elapsed: f64,
    pub counters: Counters,
    pub op_latency: Percentiles,
    pub frame_time: Percentiles,
    pub cache: CacheStats,
    #[serde(skip)]
    pub cache_text: String,
}

impl Report {
    pub fn ops_per_sec(&self) -> f64 {
        if self.elapsed == 0.0 {
            return 0.0;
        }
        self.counters.ops() as f64 / self.elapsed
    }

    pub fn print(&self, w: &mut impl Write) -> std::io::Result<()> {
        let c = &self.counters;
        writeln!(
            w,
            "{} workers, {} frames in {:.3}s, {:.0} ops/s",
            self.workers,
            self.frames,
            self.elapsed,
            self.ops_per_sec()
        )?;
        writeln!(w, "claims:")?;
        writeln!(w, "  exclusive: {}", c.claimed)?;
        writeln!(w, "  shared: {} ({} upgraded)", c.claimed_shared, c.upgraded)?;
        writeln!(w, "  already processed: {}", c.already_processed)?;
        writeln!(w, "  taken: {}", c.taken)?;
        writeln!(w, "  missed: {}", c.missed)?;
        writeln!(w, "  failed: {}", c.failed)?;
        print_percentiles(w, "op latency", &self.op_latency)?;
        print_percentiles(w, "frame time", &self.frame_time)?;
        writeln!(w, "cache:")?;
        write!(w, "{}", self.cache_text)
    }
}

fn print_percentiles(w: &mut impl Write, name: &str, p: &Percentiles) -> std::io::Result<()> {
    writeln!(
        w,
        "{name} (ns): mean {:.0}, p50 {}, p90 {}, p99 {}, p999 {}, max {}",
        p.mean, p.p50, p.p90, p.p99, p.p999, p.max
    )
}
