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
    fmt::Display,
    hash::{Hash, Hasher},
    ops::Sub,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

/// Raw encoding of a never-seen frame.
const NEVER_RAW: u64 = u64::MAX;

/// A generation counter scoping "at most once" work.
///
/// A frame starts out as *never*, meaning "it never happened". The first [`Frame::increment`] moves it to id 0.
/// Ids cycle, so frames only know whether they are the same frame or not: any other frame is treated as earlier.
///
/// Frames pack into a single `u64` (see [`AtomicFrame`]), which is why the largest id is [`Frame::MAX_ID`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "RawFrame")]
pub struct Frame {
    id: u64,
    never: bool,
}

/// Unchecked serde form of [`Frame`].
#[derive(Deserialize)]
struct RawFrame {
    id: u64,
    never: bool,
}

impl TryFrom<RawFrame> for Frame {
    type Error = String;

    fn try_from(raw: RawFrame) -> std::result::Result<Self, String> {
        if raw.never {
            return Ok(Self::never());
        }
        if raw.id > Self::MAX_ID {
            return Err(format!("frame id {} exceeds the largest id {}", raw.id, Self::MAX_ID));
        }
        Ok(Self::new(raw.id))
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::never()
    }
}

impl Frame {
    /// The largest frame id. Incrementing past it wraps to 0.
    pub const MAX_ID: u64 = NEVER_RAW - 1;

    /// A frame in which nothing has happened yet.
    pub const fn never() -> Self {
        Self { id: 0, never: true }
    }

    /// A seen frame with the given id. Ids beyond [`Frame::MAX_ID`] wrap around.
    pub const fn new(id: u64) -> Self {
        Self {
            id: id % NEVER_RAW,
            never: false,
        }
    }

    /// Advance to the next frame, leaving the never state.
    pub fn increment(&mut self) {
        if self.never {
            self.never = false;
            self.id = 0;
        } else if self.id == Self::MAX_ID {
            self.id = 0;
        } else {
            self.id += 1;
        }
    }

    /// Copying flavor of [`Frame::increment`].
    #[must_use]
    pub fn next(mut self) -> Self {
        self.increment();
        self
    }

    /// Frame id. A never frame reports 0.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns `true` if the frame has never been incremented.
    pub fn is_never(&self) -> bool {
        self.never
    }

    /// Returns `true` if `self` is less recent than `other`.
    ///
    /// A never frame is earlier than every seen frame. Two seen frames with different ids are both earlier than
    /// each other: ids roll over, so the relation is not transitive and is not an ordering.
    pub fn earlier_than(&self, other: &Frame) -> bool {
        match (self.never, other.never) {
            (true, true) => false,
            (true, false) => true,
            (false, true) => false,
            (false, false) => self.id != other.id,
        }
    }

    /// Encode the frame as a `u64`. Never frames become `u64::MAX`.
    pub fn into_raw(self) -> u64 {
        if self.never {
            NEVER_RAW
        } else {
            self.id
        }
    }

    /// Decode a frame from [`Frame::into_raw`].
    pub fn from_raw(raw: u64) -> Self {
        if raw == NEVER_RAW {
            Self::never()
        } else {
            Self::new(raw)
        }
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        match (self.never, other.never) {
            (true, true) => true,
            (false, false) => self.id == other.id,
            _ => false,
        }
    }
}

impl Eq for Frame {}

impl Hash for Frame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.into_raw().hash(state)
    }
}

/// The age of `self` relative to `rhs`, in frames.
///
/// If either frame is never seen the age is `u64::MAX`, the oldest possible.
impl Sub for Frame {
    type Output = u64;

    fn sub(self, rhs: Self) -> u64 {
        if self.never || rhs.never {
            u64::MAX
        } else {
            self.id.wrapping_sub(rhs.id)
        }
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame {}", self.id)?;
        if self.never {
            write!(f, " (Never seen)")?;
        }
        Ok(())
    }
}

/// A [`Frame`] stored in one atomic word.
#[derive(Debug)]
pub struct AtomicFrame {
    raw: AtomicU64,
}

impl Default for AtomicFrame {
    fn default() -> Self {
        Self::new(Frame::never())
    }
}

impl AtomicFrame {
    /// Create an atomic frame holding `frame`.
    pub const fn new(frame: Frame) -> Self {
        let raw = if frame.never { NEVER_RAW } else { frame.id };
        Self {
            raw: AtomicU64::new(raw),
        }
    }

    /// Load the frame.
    pub fn load(&self, order: Ordering) -> Frame {
        Frame::from_raw(self.raw.load(order))
    }

    /// Store a frame.
    pub fn store(&self, frame: Frame, order: Ordering) {
        self.raw.store(frame.into_raw(), order)
    }
}

/// The frame currently being computed, shared by all workers.
///
/// The clock starts in the never frame. The owner of the simulation loop calls [`FrameClock::advance`] once per
/// tick; workers read [`FrameClock::current`] to scope their claims.
#[derive(Debug, Default)]
pub struct FrameClock {
    frame: AtomicFrame,
}

impl FrameClock {
    /// Create a clock in the never frame. Usable in statics.
    pub const fn new() -> Self {
        Self {
            frame: AtomicFrame::new(Frame::never()),
        }
    }

    /// The frame being computed.
    pub fn current(&self) -> Frame {
        self.frame.load(Ordering::Acquire)
    }

    /// Move to the next frame and return it.
    pub fn advance(&self) -> Frame {
        // Only one thread normally ticks the clock, but concurrent advances must not lose a tick.
        let prev = match self
            .frame
            .raw
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Some(Frame::from_raw(raw).next().into_raw())
            }) {
            Ok(prev) | Err(prev) => prev,
        };
        Frame::from_raw(prev).next()
    }
}

/// A statically known frame clock.
///
/// Cached values that age out by frame count read the current frame through this trait, so the clock does not
/// have to be stored in every entry.
///
/// ```rust
/// # use frameclaim_common::frame::{FrameClock, FrameSource, Frame};
/// static CLOCK: FrameClock = FrameClock::new();
///
/// struct World;
///
/// impl FrameSource for World {
///     fn current() -> Frame {
///         CLOCK.current()
///     }
/// }
///
/// CLOCK.advance();
/// assert_eq!(World::current(), Frame::new(0));
/// ```
pub trait FrameSource: Send + Sync + 'static {
    /// The frame being computed.
    fn current() -> Frame;
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    #[test]
    fn test_never_frame() {
        let never = Frame::never();
        let mut seen = Frame::never();
        seen.increment();

        assert!(never.is_never());
        assert!(!seen.is_never());
        assert_eq!(seen.id(), 0);

        assert_eq!(never, Frame::default());
        assert_ne!(never, seen);
        assert_ne!(never, Frame::new(0));

        assert!(never.earlier_than(&seen));
        assert!(!seen.earlier_than(&never));
        assert!(!never.earlier_than(&never));

        assert_eq!(seen - never, u64::MAX);
        assert_eq!(never - seen, u64::MAX);
        assert_eq!(never - never, u64::MAX);
    }

    #[test]
    fn test_rolling_order() {
        let a = Frame::new(10);
        let b = Frame::new(11);

        assert!(a.earlier_than(&b));
        assert!(b.earlier_than(&a));
        assert!(!a.earlier_than(&a));
        assert_eq!(b - a, 1);
        assert_eq!(a - a, 0);
    }

    #[test]
    fn test_wraparound() {
        let mut f = Frame::new(Frame::MAX_ID);
        f.increment();
        assert_eq!(f, Frame::new(0));
        assert!(!f.is_never());
        assert_eq!(Frame::new(u64::MAX), Frame::new(0));

        assert_eq!(Frame::new(2) - Frame::new(5), 2u64.wrapping_sub(5));
    }

    #[test]
    fn test_raw_encoding() {
        let frames = [Frame::never(), Frame::new(0), Frame::new(42), Frame::new(Frame::MAX_ID)];
        let decoded = frames.iter().map(|f| Frame::from_raw(f.into_raw())).collect_vec();
        assert_eq!(&frames[..], &decoded[..]);
        assert_eq!(Frame::never().into_raw(), u64::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(Frame::new(7).to_string(), "Frame 7");
        assert_eq!(Frame::never().to_string(), "Frame 0 (Never seen)");
    }

    #[test]
    fn test_serde() {
        let json = serde_json::to_string(&Frame::new(3)).unwrap();
        let frame: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, Frame::new(3));

        let never: Frame = serde_json::from_str(&serde_json::to_string(&Frame::never()).unwrap()).unwrap();
        assert!(never.is_never());
        let last: Frame = serde_json::from_str(&format!(r#"{{"id":{},"never":false}}"#, Frame::MAX_ID)).unwrap();
        assert_eq!(last, Frame::new(Frame::MAX_ID));

        // The never encoding is not a valid id of a seen frame.
        let json = format!(r#"{{"id":{},"never":false}}"#, u64::MAX);
        assert!(serde_json::from_str::<Frame>(&json).is_err());
    }

    #[test]
    fn test_clock() {
        let clock = FrameClock::new();
        assert!(clock.current().is_never());
        assert_eq!(clock.advance(), Frame::new(0));
        assert_eq!(clock.advance(), Frame::new(1));
        assert_eq!(clock.current(), Frame::new(1));
    }

    #[test]
    fn test_clock_wraps_past_max_id() {
        let clock = FrameClock::new();
        clock.frame.store(Frame::new(Frame::MAX_ID), Ordering::Release);
        assert_eq!(clock.advance(), Frame::new(0));
        assert!(!clock.current().is_never());
    }

    #[test]
    fn test_concurrent_advance() {
        let clock = FrameClock::new();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        clock.advance();
                    }
                });
            }
        });
        assert_eq!(clock.current(), Frame::new(3999));
    }
}
