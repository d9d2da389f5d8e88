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

//! A `parking_lot`-style condition variable, used to wake a suspended
//! transaction handler once its session's read buffer has more data (or
//! its write buffer has drained).

use std::time::Duration;

use super::lock::{mutex_of, MutexGuard};
use super::parking_lot::{prepare_park, unpark_all, unpark_one};

/// A condition variable that pairs with [`sync::lock::Mutex`](super::lock::Mutex).
#[derive(Debug, Default)]
pub struct Condvar {
    _private: (),
}

impl Condvar {
    /// Creates a new condition variable.
    pub const fn new() -> Self {
        Condvar { _private: () }
    }

    fn addr(&self) -> *const () {
        self as *const Condvar as *const ()
    }

    /// Atomically unlocks `guard`'s mutex and blocks, returning a new
    /// guard once woken. No wakeup deposited between this call and the
    /// thread actually going to sleep is lost — registration happens
    /// before the mutex is released.
    pub fn wait<'a, T: ?Sized>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let parker = prepare_park(self.addr());
        let mutex = mutex_of(&guard);
        drop(guard);
        parker.park();
        mutex.lock()
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout` and
    /// reacquires the mutex regardless, reporting whether it timed out.
    pub fn wait_timeout<'a, T: ?Sized>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> (MutexGuard<'a, T>, bool) {
        let parker = prepare_park(self.addr());
        let mutex = mutex_of(&guard);
        drop(guard);
        let woken = parker.park_timeout(timeout);
        (mutex.lock(), !woken)
    }

    /// Wakes one thread waiting on this condvar, if any.
    pub fn notify_one(&self) {
        unpark_one(self.addr());
    }

    /// Wakes every thread waiting on this condvar.
    pub fn notify_all(&self) {
        unpark_all(self.addr());
    }
}
