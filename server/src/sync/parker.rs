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

//! Per-thread parking primitive.
//!
//! A `Parker` holds a single wake token. `park` blocks until a token is
//! available (consuming it); `unpark` deposits a token, waking a blocked
//! parker if one is waiting. This is the same single-token contract as
//! `std::thread::park`/`Thread::unpark`, expressed as an owned value so
//! [`parking_lot`](super::parking_lot) can hand one to each waiter in its
//! table instead of addressing threads directly.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A single-token parking primitive used by [`WordLock`](super::word_lock::WordLock)
/// and [`Condvar`](super::condvar::Condvar) to put a thread to sleep until
/// it is explicitly woken.
#[derive(Debug, Default)]
pub struct Parker {
    token: Mutex<bool>,
    cond: Condvar,
}

impl Parker {
    /// Creates a parker with no token available.
    pub fn new() -> Self {
        Parker {
            token: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Blocks the calling thread until a token becomes available, then
    /// consumes it.
    pub fn park(&self) {
        let mut token = self.token.lock().unwrap();
        while !*token {
            token = self.cond.wait(token).unwrap();
        }
        *token = false;
    }

    /// Like [`park`](Self::park), but gives up after `timeout` elapses.
    /// Returns whether a token was consumed.
    pub fn park_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut token = self.token.lock().unwrap();
        loop {
            if *token {
                *token = false;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.cond.wait_timeout(token, deadline - now).unwrap();
            token = guard;
            if result.timed_out() && !*token {
                return false;
            }
        }
    }

    /// Deposits a wake token, notifying a thread blocked in `park` if one
    /// is waiting. Idempotent: unparking a parker that already holds a
    /// token is a no-op, matching `std::thread::Thread::unpark`.
    pub fn unpark(&self) {
        let mut token = self.token.lock().unwrap();
        *token = true;
        self.cond.notify_one();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn unpark_before_park_is_not_lost() {
        let parker = Parker::new();
        parker.unpark();
        parker.park(); // must not block
    }

    #[test]
    fn park_blocks_until_unparked() {
        let parker = Arc::new(Parker::new());
        let other = parker.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            other.unpark();
        });
        parker.park();
        handle.join().unwrap();
    }

    #[test]
    fn park_timeout_reports_timeout() {
        let parker = Parker::new();
        assert!(!parker.park_timeout(Duration::from_millis(10)));
    }
}
