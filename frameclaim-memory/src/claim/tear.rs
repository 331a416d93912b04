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

//! Word-granular copies between a shared cell and a private buffer.
//!
//! The shared side is accessed with volatile loads and stores of the widest integer that fits in the remaining
//! bytes: 8 bytes while possible, then one 4, 2 and 1 byte chunk for the tail. Starting from an 8-aligned base
//! every chunk is naturally aligned. The private side may have any alignment.

use std::mem::{size_of, MaybeUninit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Shared cell to private buffer.
    Out,
    /// Private buffer to shared cell.
    In,
}

/// # Safety
///
/// `src` must be valid for reads and `dst` for writes of `C` at `offset`, and the shared side must be aligned
/// for `C` at `offset`.
#[inline(always)]
unsafe fn chunk<C: Copy>(src: *const u8, dst: *mut u8, offset: usize, direction: Direction) {
    let src = src.add(offset) as *const MaybeUninit<C>;
    let dst = dst.add(offset) as *mut MaybeUninit<C>;
    match direction {
        Direction::Out => dst.write_unaligned(src.read_volatile()),
        Direction::In => dst.write_volatile(src.read_unaligned()),
    }
}

/// # Safety
///
/// See [`copy_out`] and [`copy_in`].
unsafe fn copy<T>(src: *const T, dst: *mut T, direction: Direction) {
    let len = size_of::<T>();
    let (src, dst) = (src as *const u8, dst as *mut u8);

    let mut offset = 0;
    while len - offset >= 8 {
        chunk::<u64>(src, dst, offset, direction);
        offset += 8;
    }
    if len - offset >= 4 {
        chunk::<u32>(src, dst, offset, direction);
        offset += 4;
    }
    if len - offset >= 2 {
        chunk::<u16>(src, dst, offset, direction);
        offset += 2;
    }
    if len - offset >= 1 {
        chunk::<u8>(src, dst, offset, direction);
    }
}

/// Copy a value out of a shared cell.
///
/// # Safety
///
/// `shared` must be 8-aligned and valid for reads of `T`, `local` valid for writes of `T`, and no other thread may
/// write `shared` during the copy.
pub(crate) unsafe fn copy_out<T>(shared: *const T, local: *mut T) {
    copy(shared, local, Direction::Out)
}

/// Copy a value back into a shared cell.
///
/// # Safety
///
/// `shared` must be 8-aligned and valid for writes of `T`, `local` valid for reads of `T`, and no other thread may
/// access `shared` during the copy.
pub(crate) unsafe fn copy_in<T>(local: *const T, shared: *mut T) {
    copy(local, shared, Direction::In)
}
