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

//! A small embedding helper: bind a loopback listener, spin up a
//! [`Dispatcher`] with a caller-supplied handler on its own thread, and
//! hand back its address plus a handle to shut it down.
//!
//! There's no equivalent in the teacher repo — its `main.rs`/binary
//! wiring did this inline. This mirrors that same shape (bind, spawn,
//! return a join handle) as a reusable library entry point instead, so
//! tests and embedders don't have to hand-roll the wiring themselves.

use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::error;

use crate::dispatcher::Dispatcher;
use crate::ring::CompletionRing;
use crate::worker_pool::{Handler, WorkerPool};

const DEFAULT_RING_ENTRIES: u32 = 256;
const DEFAULT_WORKER_QUEUE: usize = 1024;

fn new_main_ring() -> std::io::Result<Box<dyn CompletionRing>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(crate::ring::IoUringRing::new(DEFAULT_RING_ENTRIES)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Ok(Box::new(crate::ring::PollRing::new(
            DEFAULT_RING_ENTRIES as usize,
        )?))
    }
}

/// A running server bound to a loopback address.
pub struct Server {
    addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    join: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("addr", &self.addr).finish()
    }
}

impl Server {
    /// Binds `127.0.0.1:0`, builds a [`Dispatcher`] around `handler`
    /// running on `num_workers` threads, and starts serving on a new
    /// thread. Returns once the listener is bound and the dispatch
    /// thread has started.
    pub fn start(num_workers: usize, handler: Handler) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let listener_fd = listener.as_raw_fd();
        // Leaked deliberately: the dispatcher now owns this fd for the
        // server's lifetime and closes it itself on shutdown.
        std::mem::forget(listener);

        let ring = new_main_ring()?;
        let workers = WorkerPool::new(num_workers, DEFAULT_WORKER_QUEUE, handler);
        let dispatcher = Arc::new(Dispatcher::new(ring, vec![listener_fd], workers));

        let run_handle = dispatcher.clone();
        let join = std::thread::Builder::new()
            .name("http-dispatcher".to_string())
            .spawn(move || {
                if let Err(err) = run_handle.run() {
                    error!(%err, "dispatcher loop exited with an error");
                }
            })
            .expect("failed to spawn dispatcher thread");

        Ok(Server {
            addr,
            dispatcher,
            join: Some(join),
        })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Begins a graceful shutdown and blocks until the dispatch thread
    /// has exited.
    pub fn shutdown(&mut self) {
        self.dispatcher.stop();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.shutdown();
        }
    }
}
