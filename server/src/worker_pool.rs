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

//! A fixed pool of handler threads, fed transactions through a bounded
//! `crossbeam_channel`. Replaces the teacher's `Worker` (a single
//! `std::sync::mpsc` receiver with a `todo!()` body) with a complete
//! pool: `N` threads each loop on `recv`, run the caller's handler, and
//! settle the transaction.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::warn;

use crate::transaction::Transaction;

/// A request handler, run on whichever worker thread picks up the
/// transaction. Must not panic across the boundary uncaught — a panic
/// here is caught by the worker loop and only drops that one
/// transaction, per this core's no-poisoning design.
pub type Handler = Arc<dyn Fn(&mut Transaction) + Send + Sync>;

/// A fixed-size pool of handler threads.
pub struct WorkerPool {
    sender: Sender<Transaction>,
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawns `num_workers` threads, each running `handler` against
    /// transactions pulled from a channel of capacity `queue_capacity`.
    pub fn new(num_workers: usize, queue_capacity: usize, handler: Handler) -> Self {
        let (sender, receiver): (Sender<Transaction>, Receiver<Transaction>) =
            bounded(queue_capacity);

        let handles = (0..num_workers)
            .map(|id| {
                let receiver = receiver.clone();
                let handler = handler.clone();
                thread::Builder::new()
                    .name(format!("http-worker-{id}"))
                    .spawn(move || Self::run(id, receiver, handler))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        WorkerPool { sender, handles }
    }

    fn run(id: usize, receiver: Receiver<Transaction>, handler: Handler) {
        while let Ok(mut transaction) = receiver.recv() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(&mut transaction);
            }));
            if let Err(_panic) = result {
                warn!(worker = id, "handler panicked; dropping transaction");
                transaction.reset_response(parser::Status::InternalServerError);
                let _ = transaction.write_body_no_content();
            }
            transaction.deinit();
        }
    }

    /// Attempts to hand `transaction` off to a worker without blocking.
    /// Returns it back to the caller if the queue is saturated or every
    /// worker has exited, so the dispatcher can reply synchronously
    /// instead.
    pub fn try_dispatch(&self, transaction: Transaction) -> Result<(), Transaction> {
        self.sender.try_send(transaction).map_err(|err| match err {
            TrySendError::Full(t) => t,
            TrySendError::Disconnected(t) => t,
        })
    }

    /// Stops accepting new work and joins every worker thread, letting
    /// whatever is already queued drain first.
    pub fn stop(self) {
        drop(self.sender);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::EventTable;
    use crate::stream::Stream;
    use crate::transaction::{Request, Response};
    use parser::{Method, Version};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;
    use typed_arena::Arena;

    fn dummy_transaction() -> Transaction {
        let stream = Stream::new(Weak::new(), Arc::new(EventTable::new()));
        let request = Request {
            method: Method::Get,
            target: "/".to_string(),
            version: Version::H1_1,
            headers: Vec::new(),
        };
        let response = Response::default_for(Version::H1_1);
        Transaction::new(stream, request, response, Arena::new())
    }

    #[test]
    fn full_queue_hands_the_transaction_back() {
        // No worker threads, so nothing ever drains the queue.
        let handler: Handler = Arc::new(|_: &mut Transaction| {});
        let pool = WorkerPool::new(0, 1, handler);

        assert!(pool.try_dispatch(dummy_transaction()).is_ok());
        assert!(pool.try_dispatch(dummy_transaction()).is_err());
    }

    #[test]
    fn dispatched_transaction_runs_handler_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let handler: Handler = Arc::new(move |_txn: &mut Transaction| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        let pool = WorkerPool::new(1, 4, handler);
        pool.try_dispatch(dummy_transaction()).ok();
        pool.stop();

        assert_eq!(1, calls.load(Ordering::SeqCst));
    }
}
