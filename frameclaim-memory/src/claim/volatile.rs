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
    cell::UnsafeCell,
    fmt::Debug,
    mem::MaybeUninit,
    ops::Deref,
    sync::atomic::{AtomicU64, Ordering},
};

use bitflags::bitflags;
use frameclaim_common::{frame::Frame, worker::WorkerId};
use serde::{Deserialize, Serialize};

use super::{
    tear,
    watch::{Verdict, Watch},
    Claim, ClaimError, ClaimResult, ClaimStatus, ClaimType, Claimable, UPGRADE_YIELD_ATTEMPTS,
};

bitflags! {
    /// Control bits of the ownership word.
    ///
    /// Bits `0..62` are the reader bits, one per [`WorkerId`]. A holder always sets its own reader bit as well.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Control: u64 {
        const EXCLUSIVE = 1 << 63;
        const UPGRADEABLE = 1 << 62;
    }
}

const EXCLUSIVE: u64 = Control::EXCLUSIVE.bits();
const UPGRADEABLE: u64 = Control::UPGRADEABLE.bits();

/// Kind of ownership held on a [`VolatileCell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    /// Sole owner, edits are written back on release.
    Exclusive,
    /// Reader that may become the sole owner.
    Upgradeable,
    /// Reader.
    Shared,
}

impl Access {
    fn status(&self) -> ClaimStatus {
        match self {
            Access::Exclusive => ClaimStatus::Claimed,
            Access::Upgradeable => ClaimStatus::ClaimedUpgradeable,
            Access::Shared => ClaimStatus::ClaimedShared,
        }
    }
}

/// The ownership word: unclaimed (0), exclusive, or a set of readers.
#[derive(Debug, Default)]
struct Ownership {
    word: AtomicU64,
}

impl Ownership {
    fn bit(worker: WorkerId) -> u64 {
        1 << worker.get()
    }

    fn try_acquire(&self, worker: WorkerId, access: Access) -> bool {
        let bit = Self::bit(worker);
        match access {
            Access::Exclusive => self
                .word
                .compare_exchange(0, EXCLUSIVE | bit, Ordering::Acquire, Ordering::Relaxed)
                .is_ok(),
            Access::Upgradeable => self
                .word
                .fetch_update(Ordering::Acquire, Ordering::Relaxed, |word| {
                    (word & (EXCLUSIVE | UPGRADEABLE | bit) == 0).then_some(word | UPGRADEABLE | bit)
                })
                .is_ok(),
            Access::Shared => self
                .word
                .fetch_update(Ordering::Acquire, Ordering::Relaxed, |word| {
                    (word & (EXCLUSIVE | bit) == 0).then_some(word | bit)
                })
                .is_ok(),
        }
    }

    /// Turn the upgradeable reservation into exclusive ownership. Fails while other readers remain.
    fn try_upgrade(&self, worker: WorkerId) -> bool {
        let bit = Self::bit(worker);
        self.word
            .compare_exchange(UPGRADEABLE | bit, EXCLUSIVE | bit, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release(&self, worker: WorkerId, access: Access) -> Result<(), ClaimError> {
        let bit = Self::bit(worker);
        let res = match access {
            Access::Exclusive => self
                .word
                .compare_exchange(EXCLUSIVE | bit, 0, Ordering::Release, Ordering::Relaxed)
                .map(|_| ()),
            Access::Upgradeable => self
                .word
                .fetch_update(Ordering::Release, Ordering::Relaxed, |word| {
                    (word & (EXCLUSIVE | UPGRADEABLE | bit) == UPGRADEABLE | bit)
                        .then_some(word & !(UPGRADEABLE | bit))
                })
                .map(|_| ()),
            Access::Shared => self
                .word
                .fetch_update(Ordering::Release, Ordering::Relaxed, |word| {
                    (word & (EXCLUSIVE | bit) == bit).then_some(word & !bit)
                })
                .map(|_| ()),
        };
        res.map_err(|state| ClaimError::NotHeld { worker, access, state })
    }

    fn load(&self) -> u64 {
        self.word.load(Ordering::Relaxed)
    }
}

#[repr(C, align(8))]
struct Shared<T>(UnsafeCell<T>);

/// A lock-free claimable cell of plain data, without frame stamps.
///
/// Ownership lives in one atomic word. A claim copies the value out into a private buffer with a tear-free,
/// word-granular copy; an exclusive claim copies it back on release.
pub struct VolatileCell<T> {
    ownership: Ownership,
    value: Shared<T>,
}

// The value is only read under a reader bit and only written under the exclusive bit.
unsafe impl<T> Sync for VolatileCell<T> where T: Copy + Send + Sync {}

impl<T> Debug for VolatileCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatileCell")
            .field("ownership", &format_args!("{:#x}", self.ownership.load()))
            .finish()
    }
}

impl<T> Default for VolatileCell<T>
where
    T: Copy + Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> VolatileCell<T>
where
    T: Copy,
{
    /// Create an unclaimed cell.
    pub fn new(value: T) -> Self {
        Self {
            ownership: Ownership::default(),
            value: Shared(UnsafeCell::new(value)),
        }
    }

    /// Try to take `access` on the cell without blocking.
    pub fn try_claim(&self, worker: WorkerId, access: Access) -> Option<VolatileClaim<'_, T>> {
        if !self.ownership.try_acquire(worker, access) {
            return None;
        }
        // SAFETY: `access` was just acquired for `worker`.
        Some(unsafe { VolatileClaim::new(self, worker, access) })
    }

    /// Consume the cell, returning the value.
    pub fn into_inner(self) -> T {
        self.value.0.into_inner()
    }

    fn give_up(&self, worker: WorkerId, access: Access) {
        if let Err(e) = self.ownership.release(worker, access) {
            panic!("{e}");
        }
    }
}

/// Claim guard of [`VolatileCell`] and [`VolatileClaimable`].
///
/// Dereferences to the private copy of the value.
pub struct VolatileClaim<'a, T>
where
    T: Copy,
{
    cell: &'a VolatileCell<T>,
    worker: WorkerId,
    access: Access,
    local: T,
    settled: bool,
}

impl<T> Debug for VolatileClaim<'_, T>
where
    T: Copy,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatileClaim")
            .field("worker", &self.worker)
            .field("access", &self.access)
            .finish()
    }
}

impl<'a, T> VolatileClaim<'a, T>
where
    T: Copy,
{
    /// # Safety
    ///
    /// `worker` must hold `access` on the ownership word of `cell`.
    unsafe fn new(cell: &'a VolatileCell<T>, worker: WorkerId, access: Access) -> Self {
        let mut local = MaybeUninit::<T>::uninit();
        tear::copy_out(cell.value.0.get(), local.as_mut_ptr());
        Self {
            cell,
            worker,
            access,
            local: local.assume_init(),
            settled: false,
        }
    }

    /// The worker holding the claim.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    fn settle(&mut self, write_back: bool) {
        if self.settled {
            return;
        }
        self.settled = true;
        if write_back && self.access == Access::Exclusive {
            // SAFETY: the exclusive bit keeps every other claim away from the cell.
            unsafe { tear::copy_in(&self.local, self.cell.value.0.get()) };
        }
        self.cell.give_up(self.worker, self.access);
    }
}

impl<T> Deref for VolatileClaim<'_, T>
where
    T: Copy,
{
    type Target = T;

    fn deref(&self) -> &T {
        &self.local
    }
}

impl<T> Drop for VolatileClaim<'_, T>
where
    T: Copy,
{
    fn drop(&mut self) {
        self.settle(true);
    }
}

impl<T> Claim for VolatileClaim<'_, T>
where
    T: Copy,
{
    fn status(&self) -> ClaimStatus {
        self.access.status()
    }

    fn get_mut(&mut self) -> &mut T {
        if self.access != Access::Exclusive {
            panic!(
                "{}",
                ClaimError::ReadOnly {
                    worker: self.worker,
                    status: self.status()
                }
            );
        }
        &mut self.local
    }

    fn upgrade(&mut self) -> ClaimStatus {
        if self.access == Access::Upgradeable {
            for _ in 0..UPGRADE_YIELD_ATTEMPTS {
                if self.cell.ownership.try_upgrade(self.worker) {
                    // No writer can have run while we held a reader bit, the private copy is current.
                    self.access = Access::Exclusive;
                    break;
                }
                std::thread::yield_now();
            }
        }
        self.status()
    }

    fn release(mut self) {
        self.settle(true);
    }

    fn invalidate(mut self) {
        self.settle(false);
    }
}

/// A lock-free claimable value with frame stamps.
///
/// Claims work on a private copy of the value. An exclusive or upgraded claim writes its copy back when released,
/// [`Claim::invalidate`] discards it.
pub struct VolatileClaimable<T> {
    cell: VolatileCell<T>,
    watch: Watch,
}

impl<T> Debug for VolatileClaimable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatileClaimable")
            .field("cell", &self.cell)
            .field("last_seen", &self.watch.last_seen())
            .field("last_seen_exclusively", &self.watch.last_seen_exclusively())
            .finish()
    }
}

impl<T> Default for VolatileClaimable<T>
where
    T: Copy + Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> VolatileClaimable<T>
where
    T: Copy,
{
    /// Create a never-seen claimable holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            cell: VolatileCell::new(value),
            watch: Watch::default(),
        }
    }

    /// Consume the claimable, returning the value.
    pub fn into_inner(self) -> T {
        self.cell.into_inner()
    }

    fn try_acquire(&self, worker: WorkerId, ty: ClaimType) -> Option<Access> {
        let ownership = &self.cell.ownership;
        let candidates: &[Access] = match ty {
            ClaimType::Exclusive | ClaimType::NonExclusive | ClaimType::Evictor => &[Access::Exclusive],
            ClaimType::NonExclusiveShared => &[Access::Upgradeable, Access::Shared],
            ClaimType::NonExclusiveUpgrade => &[Access::Upgradeable],
        };
        candidates
            .iter()
            .copied()
            .find(|access| ownership.try_acquire(worker, *access))
    }
}

impl<T> Claimable for VolatileClaimable<T>
where
    T: Copy + Default + Send + Sync + 'static,
{
    type Payload = T;
    type Claim<'a> = VolatileClaim<'a, T>;

    fn claim(&self, worker: WorkerId, ty: ClaimType, frame: Frame) -> ClaimResult<VolatileClaim<'_, T>> {
        self.watch.check(ty, frame);
        let Some(access) = self.try_acquire(worker, ty) else {
            return self.watch.contended(ty, frame);
        };
        let verdict = self.watch.acquired(ty, frame);
        if verdict != Verdict::Admit {
            self.cell.give_up(worker, access);
        }
        // SAFETY: the guard is only created for an admitted claim, which still holds `access`.
        verdict.into_result(|| unsafe { VolatileClaim::new(&self.cell, worker, access) })
    }

    fn last_seen(&self) -> Frame {
        self.watch.last_seen()
    }

    fn last_seen_exclusively(&self) -> Frame {
        self.watch.last_seen_exclusively()
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;

    fn worker(id: usize) -> WorkerId {
        WorkerId::new(id).unwrap()
    }

    #[test]
    fn test_ownership_word() {
        let o = Ownership::default();
        let (w0, w1, w2) = (worker(0), worker(1), worker(2));

        assert!(o.try_acquire(w0, Access::Shared));
        assert!(!o.try_acquire(w0, Access::Shared));
        assert!(o.try_acquire(w1, Access::Upgradeable));
        assert!(!o.try_acquire(w2, Access::Upgradeable));
        assert!(!o.try_acquire(w2, Access::Exclusive));
        assert_eq!(o.load(), UPGRADEABLE | 0b11);

        assert!(!o.try_upgrade(w1));
        o.release(w0, Access::Shared).unwrap();
        assert!(o.try_upgrade(w1));
        assert_eq!(o.load(), EXCLUSIVE | 0b10);
        assert!(!o.try_acquire(w0, Access::Shared));

        o.release(w1, Access::Exclusive).unwrap();
        assert_eq!(o.load(), 0);
    }

    #[test]
    fn test_double_release_rejected() {
        let o = Ownership::default();
        let w = worker(3);

        assert!(o.try_acquire(w, Access::Exclusive));
        o.release(w, Access::Exclusive).unwrap();
        assert_eq!(
            o.release(w, Access::Exclusive),
            Err(ClaimError::NotHeld {
                worker: w,
                access: Access::Exclusive,
                state: 0
            })
        );

        assert!(o.try_acquire(w, Access::Shared));
        o.release(w, Access::Shared).unwrap();
        assert!(o.release(w, Access::Shared).is_err());
        // Releasing another worker's ownership is the same mistake.
        assert!(o.try_acquire(w, Access::Exclusive));
        assert!(o.release(worker(4), Access::Exclusive).is_err());
        assert!(o.release(worker(4), Access::Shared).is_err());
    }

    #[test]
    #[should_panic(expected = "does not hold")]
    fn test_guard_double_release_panics() {
        let cell = VolatileCell::new(0u32);
        let w = worker(0);
        let claim = cell.try_claim(w, Access::Exclusive).unwrap();
        cell.ownership.release(w, Access::Exclusive).unwrap();
        drop(claim);
    }

    #[test]
    fn test_invalidate_discards_edits() {
        let c = VolatileClaimable::new(1u64);
        let w = worker(0);

        let mut claim = c.claim(w, ClaimType::NonExclusive, Frame::new(0)).claimed().unwrap();
        *claim.get_mut() = 7;
        claim.invalidate();
        assert_eq!(*c.claim(w, ClaimType::NonExclusive, Frame::new(0)).claimed().unwrap(), 1);

        let mut claim = c.claim(w, ClaimType::NonExclusive, Frame::new(0)).claimed().unwrap();
        *claim.get_mut() = 7;
        claim.release();
        assert_eq!(c.into_inner(), 7);
    }

    #[test]
    fn test_private_copy() {
        let c = VolatileClaimable::new([1u16; 5]);
        let (w0, w1) = (worker(0), worker(1));
        let f = Frame::new(0);

        let mut upgradeable = c.claim(w0, ClaimType::NonExclusiveUpgrade, f).claimed().unwrap();
        assert_eq!(upgradeable.upgrade(), ClaimStatus::Claimed);
        upgradeable.get_mut()[4] = 9;
        // Not visible until released.
        assert_eq!(c.claim(w1, ClaimType::NonExclusiveShared, f).status(), ClaimStatus::Taken);
        drop(upgradeable);

        let reader = c.claim(w1, ClaimType::NonExclusiveShared, f).claimed().unwrap();
        assert_eq!(*reader, [1, 1, 1, 1, 9]);
    }

    #[test]
    fn test_refused_claim_releases_ownership() {
        let c = VolatileClaimable::new(0u8);
        let w = worker(0);
        let f = Frame::new(2);

        drop(c.claim(w, ClaimType::Exclusive, f));
        assert_eq!(c.claim(w, ClaimType::Exclusive, f).status(), ClaimStatus::AlreadyProcessed);
        assert_eq!(c.cell.ownership.load(), 0);
        assert_eq!(c.claim(w, ClaimType::Evictor, f).status(), ClaimStatus::Taken);
        assert_eq!(c.cell.ownership.load(), 0);
    }

    /// Payload whose last byte is the checksum of the others. 31 bytes exercise every chunk width.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Checked([u8; 31]);

    impl Default for Checked {
        fn default() -> Self {
            Self::fill(0)
        }
    }

    impl Checked {
        fn fill(seed: u64) -> Self {
            let mut rng = SmallRng::seed_from_u64(seed);
            let mut bytes = [0u8; 31];
            rng.fill(&mut bytes[..30]);
            bytes[30] = Self::sum(&bytes[..30]);
            Self(bytes)
        }

        fn sum(bytes: &[u8]) -> u8 {
            bytes.iter().fold(0x5a, |acc, b| acc.rotate_left(3) ^ b)
        }

        fn is_valid(&self) -> bool {
            Self::sum(&self.0[..30]) == self.0[30]
        }
    }

    #[test_log::test]
    fn test_no_torn_reads() {
        const WRITERS: usize = 4;
        const READERS: usize = 4;
        const ROUNDS: u64 = 5000;

        let c = VolatileClaimable::<Checked>::default();
        let f = Frame::new(0);

        std::thread::scope(|s| {
            for id in 0..WRITERS {
                let c = &c;
                s.spawn(move || {
                    let w = worker(id);
                    for round in 0..ROUNDS {
                        if let ClaimResult::Claimed(mut claim) = c.claim(w, ClaimType::NonExclusive, f) {
                            *claim.get_mut() = Checked::fill(round * WRITERS as u64 + id as u64);
                        }
                    }
                });
            }
            for id in WRITERS..WRITERS + READERS {
                let c = &c;
                s.spawn(move || {
                    let w = worker(id);
                    let mut seen = 0;
                    while seen < ROUNDS {
                        if let ClaimResult::Claimed(claim) = c.claim(w, ClaimType::NonExclusiveShared, f) {
                            assert!(claim.is_valid(), "torn read: {:?}", *claim);
                            seen += 1;
                        }
                    }
                });
            }
        });

        assert!(c.into_inner().is_valid());
    }
}
