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

//! Shared components and utils for frameclaim.

/// Allow to enable debug assertions in release profile with feature "strict_assertion".
pub mod assert;
/// Key trait for cache-resident keys.
pub mod code;
/// The error type shared by all frameclaim crates.
pub mod error;
/// Frame counters and the shared frame clock.
pub mod frame;
/// Hashing utils.
pub mod hasher;
/// Worker identity for claims.
pub mod worker;
