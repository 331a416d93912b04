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

use std::{fmt::Debug, ops::Deref};

use frameclaim_common::{frame::Frame, worker::WorkerId};
use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};

use super::{Claim, ClaimError, ClaimResult, ClaimStatus, ClaimType, Claimable, Watch, UPGRADE_YIELD_ATTEMPTS};

/// A claimable value guarded by an upgradeable reader/writer lock.
///
/// Claims edit the value in place, so [`Claim::invalidate`] cannot discard edits and behaves like
/// [`Claim::release`].
pub struct LockedClaimable<T> {
    value: RwLock<T>,
    watch: Watch,
}

impl<T> Debug for LockedClaimable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedClaimable")
            .field("last_seen", &self.watch.last_seen())
            .field("last_seen_exclusively", &self.watch.last_seen_exclusively())
            .finish()
    }
}

impl<T> Default for LockedClaimable<T>
where
    T: Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> LockedClaimable<T> {
    /// Create a never-seen claimable holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
            watch: Watch::default(),
        }
    }

    /// Consume the claimable, returning the value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    /// Like [`Claimable::claim`], but waits for the lock instead of reporting [`ClaimStatus::Taken`].
    ///
    /// The frame stamps are still checked, so an exclusive claim may report [`ClaimStatus::AlreadyProcessed`]
    /// after waiting.
    pub fn claim_blocking(&self, worker: WorkerId, ty: ClaimType, frame: Frame) -> ClaimResult<LockedClaim<'_, T>> {
        self.watch.check(ty, frame);
        let guard = match ty {
            ClaimType::Exclusive | ClaimType::NonExclusive | ClaimType::Evictor => Guard::Exclusive(self.value.write()),
            ClaimType::NonExclusiveShared => match self.value.try_upgradable_read() {
                Some(g) => Guard::Upgradeable(g),
                None => Guard::Shared(self.value.read()),
            },
            ClaimType::NonExclusiveUpgrade => Guard::Upgradeable(self.value.upgradable_read()),
        };
        self.watch
            .acquired(ty, frame)
            .into_result(|| LockedClaim { worker, guard })
    }

    fn try_acquire(&self, ty: ClaimType) -> Option<Guard<'_, T>> {
        match ty {
            ClaimType::Exclusive | ClaimType::NonExclusive | ClaimType::Evictor => {
                self.value.try_write().map(Guard::Exclusive)
            }
            ClaimType::NonExclusiveShared => self
                .value
                .try_upgradable_read()
                .map(Guard::Upgradeable)
                .or_else(|| self.value.try_read().map(Guard::Shared)),
            ClaimType::NonExclusiveUpgrade => self.value.try_upgradable_read().map(Guard::Upgradeable),
        }
    }
}

impl<T> Claimable for LockedClaimable<T>
where
    T: Default + Send + Sync + 'static,
{
    type Payload = T;
    type Claim<'a> = LockedClaim<'a, T>;

    fn claim(&self, worker: WorkerId, ty: ClaimType, frame: Frame) -> ClaimResult<LockedClaim<'_, T>> {
        self.watch.check(ty, frame);
        match self.try_acquire(ty) {
            Some(guard) => self
                .watch
                .acquired(ty, frame)
                .into_result(|| LockedClaim { worker, guard }),
            None => self.watch.contended(ty, frame),
        }
    }

    fn last_seen(&self) -> Frame {
        self.watch.last_seen()
    }

    fn last_seen_exclusively(&self) -> Frame {
        self.watch.last_seen_exclusively()
    }
}

enum Guard<'a, T> {
    Shared(RwLockReadGuard<'a, T>),
    Upgradeable(RwLockUpgradableReadGuard<'a, T>),
    Exclusive(RwLockWriteGuard<'a, T>),
    /// Placeholder while the upgradeable guard is moved out for promotion.
    Upgrading,
}

/// Claim guard of [`LockedClaimable`].
pub struct LockedClaim<'a, T> {
    worker: WorkerId,
    guard: Guard<'a, T>,
}

impl<T> Debug for LockedClaim<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedClaim")
            .field("worker", &self.worker)
            .field("status", &self.status())
            .finish()
    }
}

impl<'a, T> LockedClaim<'a, T> {
    fn promote(mut guard: RwLockUpgradableReadGuard<'a, T>) -> Guard<'a, T> {
        for _ in 0..UPGRADE_YIELD_ATTEMPTS {
            match RwLockUpgradableReadGuard::try_upgrade(guard) {
                Ok(g) => return Guard::Exclusive(g),
                Err(g) => guard = g,
            }
            std::thread::yield_now();
        }
        Guard::Upgradeable(guard)
    }
}

impl<T> Deref for LockedClaim<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.guard {
            Guard::Shared(g) => &**g,
            Guard::Upgradeable(g) => &**g,
            Guard::Exclusive(g) => &**g,
            Guard::Upgrading => unreachable!("claim observed mid-upgrade"),
        }
    }
}

impl<T> Claim for LockedClaim<'_, T> {
    fn status(&self) -> ClaimStatus {
        match &self.guard {
            Guard::Shared(_) => ClaimStatus::ClaimedShared,
            Guard::Upgradeable(_) => ClaimStatus::ClaimedUpgradeable,
            Guard::Exclusive(_) => ClaimStatus::Claimed,
            Guard::Upgrading => unreachable!("claim observed mid-upgrade"),
        }
    }

    fn get_mut(&mut self) -> &mut T {
        let status = self.status();
        match &mut self.guard {
            Guard::Exclusive(g) => &mut **g,
            _ => panic!(
                "{}",
                ClaimError::ReadOnly {
                    worker: self.worker,
                    status
                }
            ),
        }
    }

    fn upgrade(&mut self) -> ClaimStatus {
        let guard = std::mem::replace(&mut self.guard, Guard::Upgrading);
        self.guard = match guard {
            Guard::Upgradeable(g) => Self::promote(g),
            other => other,
        };
        self.status()
    }

    fn release(self) {}

    fn invalidate(self) {}
}
