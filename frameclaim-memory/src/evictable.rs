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

//! The evictable cache: a [`Table`] of claimable values kept near a target size by a background evictor.
//!
//! Eviction has hysteresis. A run starts when the size exceeds `target + target / 4` and keeps sweeping the table
//! until the size is back at `target`. The evictor never takes a value from under a claim: it claims the entry
//! with [`ClaimType::Evictor`], empties the slot, and puts the entry back if it was revived meanwhile.

use std::{
    fmt::Debug,
    hash::BuildHasher,
    io::Write,
    marker::PhantomData,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use frameclaim_common::{
    code::Key,
    error::{Error, Result},
    frame::{Frame, FrameSource},
    hasher::DefaultHasher,
    worker::WorkerId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    claim::{Claim, ClaimResult, ClaimType, Claimable},
    monomer::Monomer,
    table::{Table, TableConfig, TableStats},
};

/// A cached value the evictor may drop.
pub trait Evictable: Claimable {
    /// Whether the evictor may drop the value now.
    ///
    /// Called by the evictor without holding a claim, and again while holding its claim. Must not block.
    fn can_be_evicted(&self) -> bool;

    /// Frame passed with the evictor claim. Values seen in this frame are skipped.
    ///
    /// [`Frame::never`] by default, which skips nothing.
    fn eviction_frame(&self) -> Frame {
        Frame::never()
    }

    /// Called once on an evicted value, under the evictor claim, after its entry left the table.
    ///
    /// Revived values are not passed here. Does nothing by default.
    fn evict(&self, payload: &mut Self::Payload) {
        let _ = payload;
    }
}

/// A claimable value that may be evicted once it has not been seen for more than `FRAMES` frames of `S`.
///
/// Never-seen values are evictable right away.
pub struct Aged<C, S, const FRAMES: u64> {
    inner: C,
    _source: PhantomData<fn() -> S>,
}

impl<C, S, const FRAMES: u64> Debug for Aged<C, S, FRAMES>
where
    C: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aged")
            .field("inner", &self.inner)
            .field("frames", &FRAMES)
            .finish()
    }
}

impl<C, S, const FRAMES: u64> Default for Aged<C, S, FRAMES>
where
    C: Default,
{
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<C, S, const FRAMES: u64> Aged<C, S, FRAMES> {
    /// Wrap a claimable value.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            _source: PhantomData,
        }
    }
}

impl<C, S, const FRAMES: u64> Claimable for Aged<C, S, FRAMES>
where
    C: Claimable,
    S: FrameSource,
{
    type Payload = C::Payload;
    type Claim<'a>
        = C::Claim<'a>
    where
        Self: 'a;

    fn claim(&self, worker: WorkerId, ty: ClaimType, frame: Frame) -> ClaimResult<Self::Claim<'_>> {
        self.inner.claim(worker, ty, frame)
    }

    fn last_seen(&self) -> Frame {
        self.inner.last_seen()
    }

    fn last_seen_exclusively(&self) -> Frame {
        self.inner.last_seen_exclusively()
    }
}

impl<C, S, const FRAMES: u64> Evictable for Aged<C, S, FRAMES>
where
    C: Claimable,
    S: FrameSource,
{
    fn can_be_evicted(&self) -> bool {
        S::current() - self.inner.last_seen() > FRAMES
    }

    fn eviction_frame(&self) -> Frame {
        S::current()
    }
}

/// Called by the evictor with the key of an entry it just claimed, before emptying its slot.
pub type EvictorHook<K> = Arc<dyn Fn(K) + Send + Sync + 'static>;

/// A cached entry.
///
/// Dereferences to the value. The handle keeps the value alive after eviction, but an evicted entry is no longer
/// reachable through the cache.
pub struct Entry<K, V> {
    monomer: Arc<Monomer<K, V>>,
    key: K,
}

impl<K, V> Clone for Entry<K, V>
where
    K: Copy,
{
    fn clone(&self) -> Self {
        Self {
            monomer: self.monomer.clone(),
            key: self.key,
        }
    }
}

impl<K, V> Debug for Entry<K, V>
where
    K: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry").field("key", &self.key).finish()
    }
}

impl<K, V> Entry<K, V>
where
    K: Copy,
{
    /// The key the entry was looked up with.
    pub fn key(&self) -> K {
        self.key
    }
}

impl<K, V> Deref for Entry<K, V>
where
    K: Key,
{
    type Target = V;

    fn deref(&self) -> &V {
        self.monomer.value()
    }
}

/// Snapshot of the cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries evicted by finished evictor runs.
    pub entries_evicted: usize,
    /// Checks that found the cache small enough.
    pub runs_skipped: usize,
    /// Checks made while a run was still going.
    pub runs_overlapped: usize,
    /// Target size.
    pub target_size: usize,
    /// Table statistics.
    pub table: TableStats,
}

/// Builder of an [`EvictableCache`].
pub struct EvictableCacheBuilder<K, V, S = DefaultHasher> {
    hash_bits: usize,
    target_contention: usize,
    max_chains: Option<usize>,
    hash_builder: S,
    target_size: usize,
    evictor: WorkerId,
    hook: Option<EvictorHook<K>>,
    _marker: PhantomData<fn() -> V>,
}

impl<K, V> EvictableCacheBuilder<K, V, DefaultHasher> {
    /// Default chain size, `1 << 10` slots.
    pub const DEFAULT_HASH_BITS: usize = 10;
    /// Default probe depth.
    pub const DEFAULT_TARGET_CONTENTION: usize = 8;

    /// A cache kept near `target_size` entries, evicted by the worker `evictor`.
    ///
    /// The evictor id must not be used by any other thread while the cache lives.
    pub fn new(target_size: usize, evictor: WorkerId) -> Self {
        Self {
            hash_bits: Self::DEFAULT_HASH_BITS,
            target_contention: Self::DEFAULT_TARGET_CONTENTION,
            max_chains: None,
            hash_builder: DefaultHasher::default(),
            target_size,
            evictor,
            hook: None,
            _marker: PhantomData,
        }
    }
}

impl<K, V, S> EvictableCacheBuilder<K, V, S>
where
    K: Key,
    V: Evictable,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Set the chain size to `1 << hash_bits` slots.
    pub fn with_hash_bits(mut self, hash_bits: usize) -> Self {
        self.hash_bits = hash_bits;
        self
    }

    /// Set how many positions of each chain a key may be placed at.
    pub fn with_target_contention(mut self, target_contention: usize) -> Self {
        self.target_contention = target_contention;
        self
    }

    /// Limit the number of table chains.
    pub fn with_max_chains(mut self, max_chains: usize) -> Self {
        self.max_chains = Some(max_chains);
        self
    }

    /// Use another hash builder for keys.
    pub fn with_hash_builder<OS>(self, hash_builder: OS) -> EvictableCacheBuilder<K, V, OS> {
        EvictableCacheBuilder {
            hash_bits: self.hash_bits,
            target_contention: self.target_contention,
            max_chains: self.max_chains,
            hash_builder,
            target_size: self.target_size,
            evictor: self.evictor,
            hook: self.hook,
            _marker: PhantomData,
        }
    }

    /// Call `hook` with the key of every entry the evictor claims, before the entry is removed.
    pub fn with_evictor_hook(mut self, hook: impl Fn(K) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Build the cache.
    pub fn build(self) -> Result<EvictableCache<K, V, S>> {
        let mut config = TableConfig::new(self.hash_bits, self.target_contention).with_hash_builder(self.hash_builder);
        if let Some(max_chains) = self.max_chains {
            config = config.with_max_chains(max_chains);
        }
        let table = Table::new(config)?;
        let target_size = self.target_size;
        let inner = Inner {
            table,
            target_size,
            kickoff_size: target_size + target_size / 4,
            complain_size: target_size + target_size / 2,
            evictor: self.evictor,
            stop: AtomicBool::new(false),
            hook: self.hook,
        };
        Ok(EvictableCache {
            inner: Arc::new(inner),
            task: Mutex::new(None),
            entries_evicted: AtomicUsize::new(0),
            runs_skipped: AtomicUsize::new(0),
            runs_overlapped: AtomicUsize::new(0),
        })
    }
}

struct Inner<K, V, S> {
    table: Table<K, V, S>,

    target_size: usize,
    kickoff_size: usize,
    complain_size: usize,

    evictor: WorkerId,
    stop: AtomicBool,
    hook: Option<EvictorHook<K>>,
}

impl<K, V, S> Inner<K, V, S>
where
    K: Key,
    V: Evictable,
    S: BuildHasher + Send + Sync + 'static,
{
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn satisfied(&self) -> bool {
        self.table.size() <= self.target_size
    }

    /// Sweep the table until it is back at the target size. Returns the number of evicted entries.
    fn run(&self) -> usize {
        tracing::debug!(
            size = self.table.size(),
            target = self.target_size,
            "[evictor]: start"
        );
        let mut evicted = 0;
        let mut passes = 0;
        while !self.stopped() && !self.satisfied() {
            let before = evicted;
            for index in 0..self.table.slot_count() {
                if self.stopped() || self.satisfied() {
                    break;
                }
                if self.evict_slot(index) {
                    evicted += 1;
                }
            }
            passes += 1;
            if evicted == before {
                std::thread::yield_now();
            }
        }
        tracing::debug!(
            evicted,
            passes,
            size = self.table.size(),
            stopped = self.stopped(),
            "[evictor]: finish"
        );
        evicted
    }

    #[cfg_attr(
        feature = "tracing",
        fastrace::trace(name = "frameclaim::memory::evictable::evict_slot")
    )]
    fn evict_slot(&self, index: usize) -> bool {
        let Some(monomer) = self.table.at_slot(index) else {
            return false;
        };
        let Some((key, value)) = monomer.here(self.evictor, false) else {
            return false;
        };
        if !value.can_be_evicted() {
            return false;
        }
        let ClaimResult::Claimed(mut claim) = value.claim(self.evictor, ClaimType::Evictor, value.eviction_frame()) else {
            return false;
        };
        if let Some(hook) = &self.hook {
            hook(key);
        }

        if !self.table.erase_slot(index, &monomer) {
            // Erased by someone else meanwhile.
            claim.invalidate();
            return false;
        }
        if value.can_be_evicted() && monomer.erase(self.evictor, &key) {
            value.evict(claim.get_mut());
            claim.invalidate();
            tracing::trace!(?key, index, "[evictor]: evict");
            return true;
        }

        tracing::trace!(?key, index, "[evictor]: revived");
        if let Err(monomer) = self.table.reinsert_slot(index, monomer.clone()) {
            if let Err(e) = self.table.adopt(key, monomer) {
                tracing::warn!(?key, ?e, "[evictor]: drop revived entry that cannot be put back");
            }
        }
        claim.release();
        false
    }
}

/// A concurrent cache of claimable values, kept near a target size by a background evictor.
///
/// Call [`EvictableCache::do_eviction_if_necessary`] once per frame. It starts an evictor run when the cache has
/// grown too large, and collects the result of the previous run. At most one run is outstanding at any time.
pub struct EvictableCache<K, V, S = DefaultHasher> {
    inner: Arc<Inner<K, V, S>>,
    task: Mutex<Option<JoinHandle<usize>>>,

    entries_evicted: AtomicUsize,
    runs_skipped: AtomicUsize,
    runs_overlapped: AtomicUsize,
}

impl<K, V, S> Debug for EvictableCache<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictableCache")
            .field("table", &self.inner.table)
            .field("target_size", &self.inner.target_size)
            .field("evictor", &self.inner.evictor)
            .finish()
    }
}

impl<K, V, S> EvictableCache<K, V, S>
where
    K: Key,
    V: Evictable,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Create a cache, see [`EvictableCacheBuilder`] for the parameters.
    pub fn new(
        hash_bits: usize,
        target_contention: usize,
        hash_builder: S,
        target_size: usize,
        evictor: WorkerId,
    ) -> Result<Self> {
        EvictableCacheBuilder::new(target_size, evictor)
            .with_hash_bits(hash_bits)
            .with_target_contention(target_contention)
            .with_hash_builder(hash_builder)
            .build()
    }

    /// The entry for `key`.
    ///
    /// An entry that is claimed by someone else at the moment is reported as missing.
    pub fn get(&self, worker: WorkerId, key: &K) -> Option<Entry<K, V>> {
        let monomer = self.inner.table.get(worker, key)?;
        Some(Entry { monomer, key: *key })
    }

    /// The entry for `key`, inserting a default value if there is none.
    pub fn insert(&self, worker: WorkerId, key: K) -> Result<Entry<K, V>> {
        let monomer = self.inner.table.insert(worker, key)?;
        Ok(Entry { monomer, key })
    }

    /// Number of entries.
    pub fn size(&self) -> usize {
        self.inner.table.size()
    }

    /// The size eviction brings the cache back to.
    pub fn target_size(&self) -> usize {
        self.inner.target_size
    }

    /// Returns `true` if the cache is no larger than its target size.
    pub fn within_target_size(&self) -> bool {
        self.inner.satisfied()
    }

    /// Returns `true` if the cache outgrew its target size by more than half.
    pub fn way_outside_target_size(&self) -> bool {
        self.size() > self.inner.complain_size
    }

    /// Returns `true` while an evictor run is outstanding.
    pub fn is_evicting(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Collect the previous evictor run if it finished, and start a new one if the cache grew too large.
    ///
    /// Fails with [`frameclaim_common::error::ErrorKind::Join`] if the previous run panicked.
    #[cfg_attr(
        feature = "tracing",
        fastrace::trace(name = "frameclaim::memory::evictable::do_eviction_if_necessary")
    )]
    pub fn do_eviction_if_necessary(&self) -> Result<()> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|task| task.is_finished()) {
            self.collect(&mut task)?;
        }
        if task.is_some() {
            self.runs_overlapped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let size = self.size();
        if size <= self.inner.kickoff_size {
            self.runs_skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        if size > self.inner.complain_size {
            tracing::warn!(
                size,
                target = self.inner.target_size,
                "[evictor]: cache is way outside its target size"
            );
        }

        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name("frameclaim-evictor".to_string())
            .spawn(move || inner.run())?;
        *task = Some(handle);
        Ok(())
    }

    /// Wait for the outstanding evictor run, if any, and collect it.
    pub fn wait_for_evictor(&self) -> Result<()> {
        let mut task = self.task.lock();
        self.collect(&mut task)
    }

    fn collect(&self, task: &mut Option<JoinHandle<usize>>) -> Result<()> {
        let Some(handle) = task.take() else {
            return Ok(());
        };
        let evicted = handle.join().map_err(|payload| Error::join("evictor", payload))?;
        self.entries_evicted.fetch_add(evicted, Ordering::Relaxed);
        Ok(())
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries_evicted: self.entries_evicted.load(Ordering::Relaxed),
            runs_skipped: self.runs_skipped.load(Ordering::Relaxed),
            runs_overlapped: self.runs_overlapped.load(Ordering::Relaxed),
            target_size: self.inner.target_size,
            table: self.inner.table.stats(),
        }
    }

    /// Write the statistics, one per line, each line starting with `prefix`.
    ///
    /// The eviction counters are reset.
    pub fn print_stats(&self, w: &mut impl Write, prefix: &str) -> std::io::Result<()> {
        writeln!(
            w,
            "{prefix}entries evicted: {}",
            self.entries_evicted.swap(0, Ordering::Relaxed)
        )?;
        writeln!(w, "{prefix}runs skipped: {}", self.runs_skipped.swap(0, Ordering::Relaxed))?;
        writeln!(
            w,
            "{prefix}runs overlapped: {}",
            self.runs_overlapped.swap(0, Ordering::Relaxed)
        )?;
        self.inner.table.print_stats(w, prefix)
    }
}

impl<K, V, S> Drop for EvictableCache<K, V, S> {
    fn drop(&mut self) {
        self.inner.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.task.get_mut().take() {
            if handle.join().is_err() {
                tracing::warn!("[evictor]: run panicked while the cache was dropped");
            }
        }
    }
}
