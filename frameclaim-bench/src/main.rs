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

//! Load generator for frameclaim.
//!
//! Drives an evictable cache through a simulated frame loop: every frame, each worker looks up a batch of keys and
//! claims the entries exclusively or shared, while the main thread ticks the frame clock and triggers eviction.

mod report;
mod workload;

#[cfg(feature = "deadlock")]
use std::time::Duration;

use clap::{Parser, ValueEnum};
use frameclaim::prelude::*;

use crate::{report::Report, workload::Payload};

#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Claim backend of the cached values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Upgradeable reader/writer lock, in-place edits.
    Locked,
    /// Lock-free ownership word, private copies.
    Volatile,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Worker threads.
    #[arg(short, long, default_value_t = 8)]
    workers: usize,

    /// Frames to simulate.
    #[arg(short, long, default_value_t = 600)]
    frames: u64,

    /// Lookups per worker per frame.
    #[arg(long, default_value_t = 1024)]
    ops_per_frame: usize,

    /// Key range.
    #[arg(long, default_value_t = 100_000)]
    keys: u64,

    /// Zipf exponent of the key distribution. `0` means uniform.
    #[arg(long, default_value_t = 0.0)]
    zipf: f64,

    /// Ratio of shared claims.
    #[arg(long, default_value_t = 0.5)]
    shared_ratio: f64,

    /// Target size of the cache.
    #[arg(long, default_value_t = 16 * 1024)]
    target_size: usize,

    /// Chains of the cache table hold `1 << hash_bits` slots.
    #[arg(long, default_value_t = 12)]
    hash_bits: usize,

    /// Positions of each chain a key may be placed at.
    #[arg(long, default_value_t = 8)]
    target_contention: usize,

    /// Claim backend.
    #[arg(long, value_enum, default_value_t = Backend::Volatile)]
    backend: Backend,

    /// Seed of the key samplers.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Print the report as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[cfg(not(feature = "tracing"))]
fn init_logger() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();
}

#[cfg(feature = "tracing")]
fn init_logger() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    fastrace::set_reporter(
        fastrace::collector::ConsoleReporter,
        fastrace::collector::Config::default(),
    );

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();
}

fn run(args: &Args) -> anyhow::Result<Report> {
    match args.backend {
        Backend::Locked => workload::bench::<LockedClaimable<Payload>>(args),
        Backend::Volatile => workload::bench::<VolatileClaimable<Payload>>(args),
    }
}

fn main() -> anyhow::Result<()> {
    init_logger();

    #[cfg(feature = "deadlock")]
    {
        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_secs(1));
            let deadlocks = parking_lot::deadlock::check_deadlock();
            if deadlocks.is_empty() {
                continue;
            }

            println!("{} deadlocks detected", deadlocks.len());
            for (i, threads) in deadlocks.iter().enumerate() {
                println!("Deadlock #{}", i);
                for t in threads {
                    println!("Thread Id {:#?}", t.thread_id());
                    println!("{:#?}", t.backtrace());
                }
            }
        });
    }

    let args = Args::parse();
    tracing::info!("frameclaim bench with args:\n{:#?}", args);

    let report = run(&args)?;

    #[cfg(feature = "tracing")]
    fastrace::flush();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print(&mut std::io::stdout().lock())?;
    }
    Ok(())
}
