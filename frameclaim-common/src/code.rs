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

use std::{fmt::Debug, hash::Hash};

/// Key of a cache entry.
///
/// Keys live inside the slots of the cache table and are copied in and out of them word by word, so they must be
/// plain `Copy` data. One value of the key space is reserved to mark a free slot.
pub trait Key: Copy + Eq + Hash + Send + Sync + Debug + 'static {
    /// The key value that marks a slot as unassigned. It can never be inserted.
    const UNASSIGNED: Self;

    /// Returns `true` if the key is the unassigned marker.
    fn is_unassigned(&self) -> bool {
        *self == Self::UNASSIGNED
    }
}

macro_rules! for_all_primitives {
    ($macro:ident) => {
        $macro! {
            u8 => u8::MAX,
            u16 => u16::MAX,
            u32 => u32::MAX,
            u64 => u64::MAX,
            u128 => u128::MAX,
            usize => usize::MAX,
            i8 => i8::MIN,
            i16 => i16::MIN,
            i32 => i32::MIN,
            i64 => i64::MIN,
            i128 => i128::MIN,
            isize => isize::MIN,
        }
    };
}

macro_rules! impl_key {
    ($( $type:ty => $unassigned:expr, )*) => {
        $(
            impl Key for $type {
                const UNASSIGNED: Self = $unassigned;
            }
        )*
    };
}

for_all_primitives! { impl_key }

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    struct Coord {
        x: i32,
        y: i32,
    }

    impl Key for Coord {
        const UNASSIGNED: Self = Coord { x: i32::MIN, y: i32::MIN };
    }

    #[test]
    fn test_unassigned_markers() {
        assert!(u64::MAX.is_unassigned());
        assert!(!0u64.is_unassigned());
        assert!(i32::MIN.is_unassigned());
        assert!(!(-1i32).is_unassigned());
        assert!(Coord::UNASSIGNED.is_unassigned());
        assert!(!Coord { x: 0, y: i32::MIN }.is_unassigned());
    }
}
