// Copyright 2022 Ryan Seipp
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

//! `parking_lot`-style synchronization primitives, used throughout the
//! session/stream/transaction data model instead of `std::sync` so a
//! poisoned panic in one handler thread can't wedge every other session
//! sharing the same lock.

pub mod condvar;
pub mod lock;
pub mod parker;
pub mod parking_lot;
pub mod word_lock;

pub use condvar::Condvar;
pub use lock::{Mutex, MutexGuard};
