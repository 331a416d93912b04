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

use std::sync::atomic::Ordering;

use frameclaim_common::frame::{AtomicFrame, Frame};

use super::{ClaimResult, ClaimType};

/// What to do with an acquired claim after checking the frame stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Admit,
    AlreadyProcessed,
    Taken,
}

impl Verdict {
    /// Build the claim result, creating the guard only when the claim is admitted.
    pub(crate) fn into_result<C>(self, guard: impl FnOnce() -> C) -> ClaimResult<C> {
        match self {
            Verdict::Admit => ClaimResult::Claimed(guard()),
            Verdict::AlreadyProcessed => ClaimResult::AlreadyProcessed,
            Verdict::Taken => ClaimResult::Taken,
        }
    }
}

/// Frame stamps of a claimable value.
///
/// Stamps are only written while the value is owned, so a stamp check made after acquiring ownership cannot race
/// with another claim of the same value.
#[derive(Debug, Default)]
pub(crate) struct Watch {
    last_seen: AtomicFrame,
    last_seen_exclusively: AtomicFrame,
}

impl Watch {
    pub(crate) fn check(&self, ty: ClaimType, frame: Frame) {
        assert!(
            ty == ClaimType::Evictor || !frame.is_never(),
            "{ty:?} claim in the never frame"
        );
    }

    /// Result of a claim whose ownership could not be acquired.
    pub(crate) fn contended<C>(&self, ty: ClaimType, frame: Frame) -> ClaimResult<C> {
        if ty == ClaimType::Exclusive && self.last_seen_exclusively.load(Ordering::Acquire) == frame {
            ClaimResult::AlreadyProcessed
        } else {
            ClaimResult::Taken
        }
    }

    /// Verdict for a claim holding ownership. Stamps the value if the claim is admitted.
    ///
    /// On a refusal the caller still owns the value and must give it up.
    pub(crate) fn acquired(&self, ty: ClaimType, frame: Frame) -> Verdict {
        match ty {
            ClaimType::Evictor => {
                if !frame.is_never() && self.last_seen.load(Ordering::Acquire) == frame {
                    Verdict::Taken
                } else {
                    Verdict::Admit
                }
            }
            ClaimType::Exclusive => {
                if self.last_seen_exclusively.load(Ordering::Acquire) == frame {
                    return Verdict::AlreadyProcessed;
                }
                self.last_seen.store(frame, Ordering::Release);
                self.last_seen_exclusively.store(frame, Ordering::Release);
                Verdict::Admit
            }
            ClaimType::NonExclusive | ClaimType::NonExclusiveShared | ClaimType::NonExclusiveUpgrade => {
                self.last_seen.store(frame, Ordering::Release);
                Verdict::Admit
            }
        }
    }

    pub(crate) fn last_seen(&self) -> Frame {
        self.last_seen.load(Ordering::Acquire)
    }

    pub(crate) fn last_seen_exclusively(&self) -> Frame {
        self.last_seen_exclusively.load(Ordering::Acquire)
    }
}
