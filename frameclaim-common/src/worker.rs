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

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Identity of the thread holding a claim.
///
/// Every concurrently running thread must use its own id: shared claims are tracked with one bit per worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct WorkerId(u8);

impl WorkerId {
    /// Number of distinct worker ids.
    pub const COUNT: usize = 62;

    /// Create a worker id.
    pub fn new(id: usize) -> Result<Self> {
        if id >= Self::COUNT {
            return Err(Error::new(ErrorKind::Config, "worker id out of range")
                .with_context("id", id)
                .with_context("count", Self::COUNT));
        }
        Ok(Self(id as u8))
    }

    /// The raw id.
    pub fn get(&self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<usize> for WorkerId {
    type Error = Error;

    fn try_from(id: usize) -> Result<Self> {
        Self::new(id)
    }
}

impl From<WorkerId> for usize {
    fn from(id: WorkerId) -> usize {
        id.get()
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_range() {
        assert_eq!(WorkerId::new(0).unwrap().get(), 0);
        assert_eq!(WorkerId::new(61).unwrap().get(), 61);
        assert_eq!(WorkerId::new(62).unwrap_err().kind(), ErrorKind::Config);
        assert!(WorkerId::try_from(usize::MAX).is_err());
    }

    #[test]
    fn test_worker_id_serde() {
        let id: WorkerId = serde_json::from_str("5").unwrap();
        assert_eq!(id, WorkerId::new(5).unwrap());
        assert!(serde_json::from_str::<WorkerId>("99").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "5");
    }
}
