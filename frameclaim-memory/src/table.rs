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

//! The chained open-addressing cache table.
//!
//! The table is a list of chains, each an array of `1 << hash_bits` slots. A key hashes to a home offset and is
//! looked up at the first `target_contention` offsets from there, in every chain. An insert that finds no free
//! position appends a chain. Chains are never removed, so a slot index stays valid for the table's lifetime.
//!
//! Slots own their monomers through [`Arc`]. Emptying a slot never frees a monomer that someone still uses.

use std::{
    fmt::Debug,
    hash::{BuildHasher, Hash},
    io::Write,
    sync::Arc,
};

use arc_swap::{ArcSwap, ArcSwapOption};
use equivalent::Equivalent;
use frameclaim_common::{
    code::Key,
    error::{Error, ErrorKind, Result},
    hasher::{wring, DefaultHasher},
    strict_assert,
    worker::WorkerId,
};
use itertools::Itertools;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{monomer::Monomer, stats::StructureStats};

/// Largest supported `hash_bits`.
pub const MAX_HASH_BITS: usize = 30;

type Chain<K, V> = Arc<[ArcSwapOption<Monomer<K, V>>]>;

/// Configuration of a [`Table`].
#[derive(Debug, Clone)]
pub struct TableConfig<S = DefaultHasher> {
    hash_bits: usize,
    target_contention: usize,
    max_chains: Option<usize>,
    hash_builder: S,
}

impl TableConfig<DefaultHasher> {
    /// Chains of `1 << hash_bits` slots, probed `target_contention` positions deep.
    pub fn new(hash_bits: usize, target_contention: usize) -> Self {
        Self {
            hash_bits,
            target_contention,
            max_chains: None,
            hash_builder: DefaultHasher::default(),
        }
    }
}

impl<S> TableConfig<S> {
    /// Limit the number of chains. Inserts into a full table fail with [`ErrorKind::NoSpace`].
    ///
    /// Unlimited by default.
    pub fn with_max_chains(mut self, max_chains: usize) -> Self {
        self.max_chains = Some(max_chains);
        self
    }

    /// Use another hash builder for keys.
    pub fn with_hash_builder<OS>(self, hash_builder: OS) -> TableConfig<OS> {
        TableConfig {
            hash_bits: self.hash_bits,
            target_contention: self.target_contention,
            max_chains: self.max_chains,
            hash_builder,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.hash_bits == 0 || self.hash_bits > MAX_HASH_BITS {
            return Err(Error::new(ErrorKind::Config, "hash bits out of range")
                .with_context("hash_bits", self.hash_bits)
                .with_context("max", MAX_HASH_BITS));
        }
        if self.target_contention == 0 || self.target_contention > 1 << self.hash_bits {
            return Err(Error::new(ErrorKind::Config, "target contention must be within one chain")
                .with_context("target_contention", self.target_contention)
                .with_context("hash_bits", self.hash_bits));
        }
        if self.max_chains == Some(0) {
            return Err(Error::new(ErrorKind::Config, "the table needs at least one chain"));
        }
        Ok(())
    }
}

/// Snapshot of the table statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    /// Assigned slots.
    pub size: usize,
    /// Total slots.
    pub slot_count: usize,
    /// Number of chains.
    pub chains: usize,
    /// Average positions probed past the home slot by inserts.
    pub contention: f64,
}

/// A concurrent chained open-addressing table of [`Monomer`]s.
pub struct Table<K, V, S = DefaultHasher> {
    chains: ArcSwap<Vec<Chain<K, V>>>,
    grow: Mutex<()>,

    hash_bits: usize,
    target_contention: usize,
    max_chains: Option<usize>,
    hash_builder: S,

    stats: StructureStats,
}

impl<K, V, S> Debug for Table<K, V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("chains", &self.chains.load().len())
            .field("hash_bits", &self.hash_bits)
            .field("target_contention", &self.target_contention)
            .field("max_chains", &self.max_chains)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<K, V, S> Table<K, V, S>
where
    K: Key,
    S: BuildHasher,
{
    /// Create a table with one chain.
    pub fn new(config: TableConfig<S>) -> Result<Self> {
        config.validate()?;
        let chain = Self::chain(config.hash_bits);
        Ok(Self {
            chains: ArcSwap::from_pointee(vec![chain]),
            grow: Mutex::new(()),
            hash_bits: config.hash_bits,
            target_contention: config.target_contention,
            max_chains: config.max_chains,
            hash_builder: config.hash_builder,
            stats: StructureStats::default(),
        })
    }

    fn chain(hash_bits: usize) -> Chain<K, V> {
        (0..1 << hash_bits).map(|_| ArcSwapOption::empty()).collect()
    }

    fn mask(&self) -> usize {
        (1 << self.hash_bits) - 1
    }

    /// `(hop, chain, offset)` in probing order: each position in every chain before the next position.
    fn probe(&self, hash: u64, chains: usize) -> impl Iterator<Item = (usize, usize, usize)> {
        let home = wring(hash, self.hash_bits);
        let mask = self.mask();
        (0..self.target_contention)
            .cartesian_product(0..chains)
            .map(move |(hop, chain)| (hop, chain, (home + hop) & mask))
    }

    fn locate(&self, index: usize) -> (usize, usize) {
        (index >> self.hash_bits, index & self.mask())
    }

    fn index(&self, chain: usize, offset: usize) -> usize {
        (chain << self.hash_bits) | offset
    }

    /// Number of assigned slots.
    pub fn size(&self) -> usize {
        self.stats.size()
    }

    /// Number of slots, assigned or not. Slot indices run from 0 to `slot_count() - 1`.
    pub fn slot_count(&self) -> usize {
        self.chains.load().len() << self.hash_bits
    }

    /// Number of chains.
    pub fn chains(&self) -> usize {
        self.chains.load().len()
    }

    /// The monomer holding `key`.
    ///
    /// A key that is claimed by someone else at the moment is reported as missing.
    pub fn get<Q>(&self, worker: WorkerId, key: &Q) -> Option<Arc<Monomer<K, V>>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let hash = self.hash_builder.hash_one(key);
        let chains = self.chains.load();
        self.find(worker, hash, key, &chains).map(|(_, monomer)| monomer)
    }

    fn find<Q>(&self, worker: WorkerId, hash: u64, key: &Q, chains: &[Chain<K, V>]) -> Option<(usize, Arc<Monomer<K, V>>)>
    where
        Q: Equivalent<K> + ?Sized,
    {
        self.probe(hash, chains.len()).find_map(|(_, chain, offset)| {
            let monomer = chains[chain][offset].load_full()?;
            let found = monomer.get(worker, key).is_some();
            found.then(|| (self.index(chain, offset), monomer))
        })
    }

    /// The monomer holding `key`, assigning a free slot to it if there is none.
    ///
    /// Concurrent inserts of the same key may assign it twice. Appends a chain when no probed position is free.
    pub fn insert(&self, worker: WorkerId, key: K) -> Result<Arc<Monomer<K, V>>>
    where
        V: Default,
    {
        if key.is_unassigned() {
            return Err(Error::new(ErrorKind::Config, "the unassigned key cannot be inserted")
                .with_context("key", format!("{key:?}")));
        }
        let hash = self.hash_builder.hash_one(key);
        // Created on the first free slot only, and reused if that slot is lost to a racing insert.
        let mut fresh: Option<Arc<Monomer<K, V>>> = None;
        loop {
            let chains = self.chains.load_full();
            if let Some((_, monomer)) = self.find(worker, hash, &key, &chains) {
                return Ok(monomer);
            }
            for (hop, chain, offset) in self.probe(hash, chains.len()) {
                let slot = &chains[chain][offset];
                if slot.load().is_some() {
                    continue;
                }
                let monomer = fresh.get_or_insert_with(|| Self::assigned(worker, key)).clone();
                if self.fill(slot, monomer.clone()) {
                    self.stats.inserted(hop);
                    tracing::trace!(?key, hop, chain, "[table]: insert");
                    return Ok(monomer);
                }
            }
            self.grow(chains.len())?;
        }
    }

    fn assigned(worker: WorkerId, key: K) -> Arc<Monomer<K, V>>
    where
        V: Default,
    {
        let monomer = Arc::new(Monomer::default());
        let assigned = monomer.insert(worker, key).is_some();
        strict_assert!(assigned);
        monomer
    }

    /// Put `monomer` into an empty slot. The slot is counted before it becomes visible to erasers.
    fn fill(&self, slot: &ArcSwapOption<Monomer<K, V>>, monomer: Arc<Monomer<K, V>>) -> bool {
        self.stats.reserve();
        let prev = slot.compare_and_swap(&None::<Arc<Monomer<K, V>>>, Some(monomer));
        if prev.is_some() {
            self.stats.erased();
            return false;
        }
        true
    }

    /// Unassign `key` and empty its slot.
    ///
    /// Returns `false` if the key is missing or claimed by someone else.
    pub fn erase(&self, worker: WorkerId, key: &K) -> bool {
        let hash = self.hash_builder.hash_one(key);
        let chains = self.chains.load_full();
        let Some((index, monomer)) = self.find(worker, hash, key, &chains) else {
            return false;
        };
        if !self.erase_slot(index, &monomer) {
            return false;
        }
        if monomer.erase(worker, key) {
            tracing::trace!(?key, index, "[table]: erase");
            return true;
        }
        // Claimed in between. The monomer goes back, to its old slot if possible.
        if let Err(monomer) = self.reinsert_slot(index, monomer) {
            if let Err(e) = self.adopt(*key, monomer) {
                tracing::warn!(?key, ?e, "[table]: lost an entry that could not be put back");
            }
        }
        false
    }

    /// The monomer in slot `index`.
    pub fn at_slot(&self, index: usize) -> Option<Arc<Monomer<K, V>>> {
        let (chain, offset) = self.locate(index);
        self.chains.load().get(chain)?[offset].load_full()
    }

    /// Empty slot `index` if it still holds `expected`.
    pub fn erase_slot(&self, index: usize, expected: &Arc<Monomer<K, V>>) -> bool {
        let (chain, offset) = self.locate(index);
        let chains = self.chains.load();
        let Some(chain) = chains.get(chain) else {
            return false;
        };
        let prev = chain[offset].compare_and_swap(expected, None::<Arc<Monomer<K, V>>>);
        let erased = matches!(&*prev, Some(prev) if Arc::ptr_eq(prev, expected));
        if erased {
            self.stats.erased();
        }
        erased
    }

    /// Put `monomer` back into slot `index`.
    ///
    /// Fails, handing the monomer back, if the slot was filled meanwhile.
    pub fn reinsert_slot(&self, index: usize, monomer: Arc<Monomer<K, V>>) -> std::result::Result<(), Arc<Monomer<K, V>>> {
        let (chain, offset) = self.locate(index);
        let chains = self.chains.load();
        let Some(chain) = chains.get(chain) else {
            return Err(monomer);
        };
        if !self.fill(&chain[offset], monomer.clone()) {
            return Err(monomer);
        }
        Ok(())
    }

    /// Put a monomer holding `key` into any free slot of the key's probe sequence, appending a chain if needed.
    pub fn adopt(&self, key: K, monomer: Arc<Monomer<K, V>>) -> Result<()> {
        let hash = self.hash_builder.hash_one(key);
        loop {
            let chains = self.chains.load_full();
            for (_, chain, offset) in self.probe(hash, chains.len()) {
                if self.fill(&chains[chain][offset], monomer.clone()) {
                    tracing::trace!(?key, chain, offset, "[table]: adopt");
                    return Ok(());
                }
            }
            self.grow(chains.len())?;
        }
    }

    /// Append a chain unless another thread already grew the table past `seen` chains.
    fn grow(&self, seen: usize) -> Result<()> {
        let _guard = self.grow.lock();
        let chains = self.chains.load_full();
        if chains.len() > seen {
            return Ok(());
        }
        if let Some(max) = self.max_chains {
            if chains.len() >= max {
                return Err(Error::no_space(chains.len(), chains.len() << self.hash_bits));
            }
        }
        let mut grown = Vec::with_capacity(chains.len() + 1);
        grown.extend(chains.iter().cloned());
        grown.push(Self::chain(self.hash_bits));
        tracing::debug!(chains = grown.len(), size = self.size(), "[table]: grow");
        self.chains.store(Arc::new(grown));
        Ok(())
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> TableStats {
        let chains = self.chains();
        TableStats {
            size: self.size(),
            slot_count: chains << self.hash_bits,
            chains,
            contention: self.stats.contention(),
        }
    }

    /// Write the statistics, one per line, each line starting with `prefix`.
    pub fn print_stats(&self, w: &mut impl Write, prefix: &str) -> std::io::Result<()> {
        let stats = self.stats();
        writeln!(w, "{prefix}size: {}", stats.size)?;
        writeln!(w, "{prefix}slots: {} in {} chains", stats.slot_count, stats.chains)?;
        writeln!(w, "{prefix}average contention: {:.3}", stats.contention)?;
        Ok(())
    }
}
