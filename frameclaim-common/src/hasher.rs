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

use std::hash::{BuildHasher, BuildHasherDefault, Hasher};

pub use twox_hash::XxHash64;

/// Hash builder used by the cache table unless another one is given.
pub type DefaultHasher = BuildHasherDefault<XxHash64>;

/// A hasher that returns integer keys unchanged.
///
/// Placement in the cache table becomes predictable, which makes it handy for tests and for keys that are already
/// well distributed.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityHasher {
    state: u64,
}

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state = self.state.rotate_left(8) ^ *byte as u64;
        }
    }

    fn write_u8(&mut self, i: u8) {
        self.write_u64(i as u64)
    }

    fn write_u16(&mut self, i: u16) {
        self.write_u64(i as u64)
    }

    fn write_u32(&mut self, i: u32) {
        self.write_u64(i as u64)
    }

    fn write_u64(&mut self, i: u64) {
        self.state ^= i;
    }

    fn write_usize(&mut self, i: usize) {
        self.write_u64(i as u64)
    }

    fn write_i32(&mut self, i: i32) {
        self.write_u32(i as u32)
    }

    fn write_i64(&mut self, i: i64) {
        self.write_u64(i as u64)
    }
}

impl BuildHasher for IdentityHasher {
    type Hasher = Self;

    fn build_hasher(&self) -> Self::Hasher {
        Self::default()
    }
}

/// Fold every bit of `hash` into the low `bits` bits.
///
/// The table only addresses `1 << bits` slots per chain, so instead of dropping the high bits they are xored down.
pub fn wring(hash: u64, bits: usize) -> usize {
    debug_assert!(bits > 0 && bits < 64);
    let mut wrung = 0;
    let mut offset = 0;
    while offset < u64::BITS as usize {
        wrung ^= hash >> offset;
        offset += bits;
    }
    (wrung & ((1 << bits) - 1)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_hasher() {
        for i in 0..1024u64 {
            assert_eq!(i, IdentityHasher::default().hash_one(i));
        }
        assert_eq!(7, IdentityHasher::default().hash_one(7u32));
    }

    #[test]
    fn test_wring() {
        // Small hashes are untouched.
        for i in 0..256 {
            assert_eq!(wring(i, 8), i as usize);
        }
        // High bits are folded down instead of dropped.
        assert_eq!(wring(1 << 8, 8), 1);
        assert_eq!(wring((1 << 8) | 1, 8), 0);
        assert_eq!(wring(u64::MAX, 8), 0);
        assert!(wring(u64::MAX, 10) < 1 << 10);
    }

    #[test]
    fn test_default_hasher_is_deterministic() {
        let a = DefaultHasher::default().hash_one(42u64);
        let b = DefaultHasher::default().hash_one(42u64);
        assert_eq!(a, b);
    }
}
