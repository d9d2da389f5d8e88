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

//! A global table of parked threads, keyed by an arbitrary address.
//!
//! [`WordLock`](super::word_lock::WordLock) and
//! [`Condvar`](super::condvar::Condvar) don't own their own wait queues;
//! instead they park under their own address (`self as *const _ as *const
//! ()`), and this table fans addresses out to the [`Parker`]s waiting on
//! them. Bucketing by address rather than one queue per lock keeps a lock
//! itself to a single word, at the cost of a shared table lookup on the
//! slow (contended) path only.
//!
//! The real `parking_lot_core` keys this table with a fixed-size array of
//! lock-free intrusive buckets so the fast path never allocates. This
//! version swaps that for a `Mutex`-guarded `HashMap`: slower under heavy
//! contention, but its correctness doesn't depend on hand-verified unsafe
//! linked-list surgery, which matters more here than shaving nanoseconds
//! off an uncontended lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use super::parker::Parker;

#[derive(Default)]
struct Table {
    queues: HashMap<usize, Vec<Arc<Parker>>>,
}

fn table() -> &'static Mutex<Table> {
    static TABLE: OnceLock<Mutex<Table>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(Table::default()))
}

/// Parks the current thread under `addr`, unless `validate` (run while
/// holding the table's lock, so it observes a consistent view relative to
/// concurrent [`unpark_one`]/[`unpark_all`] calls) returns `false`.
///
/// Callers re-check their own lock word inside `validate`; if it no
/// longer matches the "should sleep" state, `park` returns immediately
/// without blocking, and the caller is expected to retry its fast path.
pub fn park(addr: *const (), validate: impl FnOnce() -> bool) {
    let parker = Arc::new(Parker::new());
    {
        let mut table = table().lock().unwrap();
        if !validate() {
            return;
        }
        table
            .queues
            .entry(addr as usize)
            .or_default()
            .push(parker.clone());
    }
    parker.park();
}

/// Registers a fresh [`Parker`] in the queue for `addr` without blocking.
/// The caller parks it later (after releasing whatever lock it holds),
/// which is what lets [`Condvar::wait`](super::condvar::Condvar::wait)
/// register-then-unlock-then-block without a window where a concurrent
/// `notify` could be missed: `notify` deposits a token in the `Parker`
/// the moment it's visible in the table, and `Parker::park` consumes a
/// token even if it was deposited before `park` was called.
pub fn prepare_park(addr: *const ()) -> Arc<Parker> {
    let parker = Arc::new(Parker::new());
    let mut table = table().lock().unwrap();
    table
        .queues
        .entry(addr as usize)
        .or_default()
        .push(parker.clone());
    parker
}

/// Wakes a single thread parked under `addr`, if any.
pub fn unpark_one(addr: *const ()) {
    let parker = {
        let mut table = table().lock().unwrap();
        let queue = table.queues.get_mut(&(addr as usize));
        let parker = queue.and_then(|q| (!q.is_empty()).then(|| q.remove(0)));
        if matches!(table.queues.get(&(addr as usize)), Some(q) if q.is_empty()) {
            table.queues.remove(&(addr as usize));
        }
        parker
    };
    if let Some(parker) = parker {
        parker.unpark();
    }
}

/// Wakes every thread parked under `addr`.
pub fn unpark_all(addr: *const ()) {
    let parkers = {
        let mut table = table().lock().unwrap();
        table.queues.remove(&(addr as usize)).unwrap_or_default()
    };
    for parker in parkers {
        parker.unpark();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn validate_false_skips_parking() {
        let addr: &() = &();
        park(addr as *const (), || false);
    }

    #[test]
    fn unpark_one_wakes_a_waiter() {
        static ADDR: () = ();
        let woke = Arc::new(AtomicBool::new(false));
        let woke2 = woke.clone();

        let handle = thread::spawn(move || {
            park(&ADDR as *const (), || true);
            woke2.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(20));
        unpark_one(&ADDR as *const ());
        handle.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
    }
}
