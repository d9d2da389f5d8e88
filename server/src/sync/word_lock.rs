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

//! A lock that fits in a single `usize`, the building block
//! [`sync::lock::Mutex`](super::lock::Mutex) is built from.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::parking_lot::{park, unpark_one};

const LOCKED_BIT: usize = 1;
const PARKED_BIT: usize = 2;

/// Number of spin iterations attempted before a contended lock gives up
/// and parks. Chosen the same way as the `parking_lot` crate: enough to
/// ride out a lock held across a handful of instructions, not so much
/// that it burns a core waiting on one held across a syscall.
const SPIN_LIMIT: u32 = 10;

struct SpinWait {
    counter: u32,
}

impl SpinWait {
    fn new() -> Self {
        SpinWait { counter: 0 }
    }

    /// Spins once. Returns `true` if the caller should retry its fast
    /// path, `false` once the spin budget is exhausted and the caller
    /// should fall back to parking.
    fn spin(&mut self) -> bool {
        if self.counter >= SPIN_LIMIT {
            return false;
        }
        self.counter += 1;
        for _ in 0..(1 << self.counter.min(SPIN_LIMIT)) {
            std::hint::spin_loop();
        }
        true
    }
}

/// A mutual-exclusion lock represented as a single [`AtomicUsize`]: bit 0
/// is "locked", bit 1 is "a thread is parked waiting for this lock".
/// Unlike `std::sync::Mutex`, this type carries no poisoning state and no
/// OS-level wait queue of its own — contended waiters are recorded in the
/// shared [`parking_lot`](super::parking_lot) table, keyed by this lock's
/// own address.
#[derive(Debug)]
pub struct WordLock {
    state: AtomicUsize,
}

impl Default for WordLock {
    fn default() -> Self {
        Self::new()
    }
}

impl WordLock {
    /// Creates a new, unlocked `WordLock`.
    pub const fn new() -> Self {
        WordLock {
            state: AtomicUsize::new(0),
        }
    }

    /// Acquires the lock, blocking the calling thread if it is held
    /// elsewhere.
    pub fn lock(&self) {
        if self
            .state
            .compare_exchange_weak(0, LOCKED_BIT, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            self.lock_slow();
        }
    }

    /// Acquires the lock only if it is currently free.
    pub fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(0, LOCKED_BIT, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[cold]
    fn lock_slow(&self) {
        let mut spin = SpinWait::new();
        let mut state = self.state.load(Ordering::Relaxed);

        loop {
            if state & LOCKED_BIT == 0 {
                match self.state.compare_exchange_weak(
                    state,
                    state | LOCKED_BIT,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return,
                    Err(x) => {
                        state = x;
                        continue;
                    }
                }
            }

            if state & PARKED_BIT == 0 && spin.spin() {
                state = self.state.load(Ordering::Relaxed);
                continue;
            }

            if state & PARKED_BIT == 0 {
                if let Err(x) = self.state.compare_exchange_weak(
                    state,
                    state | PARKED_BIT,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    state = x;
                    continue;
                }
            }

            let addr = self as *const WordLock as *const ();
            park(addr, || {
                self.state.load(Ordering::Relaxed) == LOCKED_BIT | PARKED_BIT
            });

            spin = SpinWait::new();
            state = self.state.load(Ordering::Relaxed);
        }
    }

    /// Releases the lock, waking one parked waiter (if any) so it can
    /// retry acquiring it.
    pub fn unlock(&self) {
        let state = self.state.fetch_and(!LOCKED_BIT, Ordering::Release);
        if state & PARKED_BIT != 0 {
            let addr = self as *const WordLock as *const ();
            unpark_one(addr);
        }
    }
}
