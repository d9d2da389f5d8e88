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

//! A `parking_lot`-style `Mutex<T>`: one word of lock state plus the
//! protected value, no poisoning.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};

use super::word_lock::WordLock;

/// A mutual-exclusion lock around a `T`, built on [`WordLock`]. Unlike
/// `std::sync::Mutex`, a panic while holding the guard does not poison
/// the lock — the next locker simply proceeds, matching `parking_lot`'s
/// behavior and the assumption the rest of this crate makes that a
/// panicking handler thread is caught at the dispatcher, not left to
/// corrupt shared session state.
pub struct Mutex<T: ?Sized> {
    raw: WordLock,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Wraps `value` in a new, unlocked mutex.
    pub const fn new(value: T) -> Self {
        Mutex {
            raw: WordLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Consumes the mutex, returning the wrapped value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the lock, blocking until it is available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    /// Acquires the lock only if it is immediately available.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Bypasses locking to obtain a mutable reference, since `&mut self`
    /// statically proves exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("Mutex").field("data", &&*guard).finish(),
            None => f
                .debug_struct("Mutex")
                .field("data", &format_args!("<locked>"))
                .finish(),
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Mutex::new(T::default())
    }
}

/// RAII guard returned by [`Mutex::lock`]/[`Mutex::try_lock`]; releases
/// the lock when dropped.
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<'a, T: ?Sized> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: holding the guard proves the lock is held, so no other
        // guard for this mutex can exist concurrently.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T: ?Sized> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `Deref` impl above; `&mut self` proves we're the
        // only borrower of this guard.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T: ?Sized> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

impl<'a, T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Exposes the `Mutex` underlying a guard so [`Condvar`](super::condvar::Condvar)
/// can drop the guard (releasing the lock) and later reacquire it around
/// a wait, without a second public API for the same mutex.
pub(crate) fn mutex_of<'a, T: ?Sized>(guard: &MutexGuard<'a, T>) -> &'a Mutex<T> {
    guard.mutex
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn guard_derefs_to_inner_value() {
        let mutex = Mutex::new(5);
        assert_eq!(5, *mutex.lock());
    }

    #[test]
    fn guard_mutation_is_visible_after_unlock() {
        let mutex = Mutex::new(vec![1, 2, 3]);
        mutex.lock().push(4);
        assert_eq!(&[1, 2, 3, 4], mutex.lock().as_slice());
    }

    #[test]
    fn concurrent_increments_are_all_observed() {
        let mutex = Arc::new(Mutex::new(0usize));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let mutex = mutex.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *mutex.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(8000, *mutex.lock());
    }
}
