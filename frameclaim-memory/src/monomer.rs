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

use std::fmt::Debug;

use equivalent::Equivalent;
use frameclaim_common::{code::Key, strict_assert, worker::WorkerId};

use crate::claim::{Access, Claim, VolatileCell};

/// One open-addressing slot entry: a claimable key and the value it owns.
///
/// The key is [`Key::UNASSIGNED`] while the monomer is free. Every operation makes a single non-blocking claim on
/// the key and reports contention as a miss.
pub struct Monomer<K, V> {
    key: VolatileCell<K>,
    value: V,
}

impl<K, V> Debug for Monomer<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monomer").field("key", &self.key).finish_non_exhaustive()
    }
}

impl<K, V> Default for Monomer<K, V>
where
    K: Key,
    V: Default,
{
    fn default() -> Self {
        Self::new(V::default())
    }
}

impl<K, V> Monomer<K, V>
where
    K: Key,
{
    /// Create a free monomer owning `value`.
    pub fn new(value: V) -> Self {
        Self {
            key: VolatileCell::new(K::UNASSIGNED),
            value,
        }
    }

    /// The owned value, regardless of the key.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// The current key and the value. Free monomers are only reported with `accept_unassigned`.
    pub fn here(&self, worker: WorkerId, accept_unassigned: bool) -> Option<(K, &V)> {
        let key = *self.key.try_claim(worker, Access::Shared)?;
        (accept_unassigned || !key.is_unassigned()).then_some((key, &self.value))
    }

    /// The value, if the monomer holds `key`.
    pub fn get<Q>(&self, worker: WorkerId, key: &Q) -> Option<&V>
    where
        Q: Equivalent<K> + ?Sized,
    {
        let claim = self.key.try_claim(worker, Access::Shared)?;
        (!claim.is_unassigned() && key.equivalent(&*claim)).then_some(&self.value)
    }

    /// Assign `key` to a free monomer.
    pub fn insert(&self, worker: WorkerId, key: K) -> Option<&V> {
        strict_assert!(!key.is_unassigned());
        let mut claim = self.key.try_claim(worker, Access::Exclusive)?;
        if !claim.is_unassigned() {
            return None;
        }
        *claim.get_mut() = key;
        Some(&self.value)
    }

    /// Free the monomer if it holds `key`.
    pub fn erase(&self, worker: WorkerId, key: &K) -> bool {
        let Some(mut claim) = self.key.try_claim(worker, Access::Exclusive) else {
            return false;
        };
        if claim.is_unassigned() || *claim != *key {
            return false;
        }
        *claim.get_mut() = K::UNASSIGNED;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: usize) -> WorkerId {
        WorkerId::new(id).unwrap()
    }

    #[test]
    fn test_monomer_lifecycle() {
        let m = Monomer::<u32, String>::new("value".to_string());
        let w = worker(0);

        assert_eq!(m.here(w, false), None);
        assert_eq!(m.here(w, true).map(|(k, _)| k), Some(u32::MAX));
        assert_eq!(m.get(w, &u32::MAX), None);
        assert!(!m.erase(w, &u32::MAX));

        assert_eq!(m.insert(w, 7).map(String::as_str), Some("value"));
        assert_eq!(m.insert(w, 8), None);
        assert_eq!(m.get(w, &7u32).map(String::as_str), Some("value"));
        assert_eq!(m.get(w, &8u32), None);
        assert_eq!(m.here(w, false).map(|(k, _)| k), Some(7));

        assert!(!m.erase(w, &8));
        assert!(m.erase(w, &7));
        assert_eq!(m.here(w, false), None);
        assert_eq!(m.insert(w, 8).map(String::as_str), Some("value"));
    }

    #[test]
    fn test_monomer_contention_is_a_miss() {
        let m = Monomer::<u64, ()>::new(());
        let (w0, w1) = (worker(0), worker(1));
        assert!(m.insert(w0, 1).is_some());

        let held = m.key.try_claim(w0, Access::Exclusive).unwrap();
        assert_eq!(m.get(w1, &1u64), None);
        assert_eq!(m.here(w1, true), None);
        assert!(!m.erase(w1, &1));
        drop(held);

        // Readers do not block each other.
        let reader = m.key.try_claim(w0, Access::Shared).unwrap();
        assert_eq!(m.get(w1, &1u64), Some(&()));
        assert!(!m.erase(w1, &1));
        drop(reader);
        assert!(m.erase(w1, &1));
    }
}
