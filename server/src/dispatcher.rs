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

//! The main event loop: owns the server's primary `CompletionRing`, the
//! set of listening sockets, the live session list, and the worker
//! pool transactions are handed off to.
//!
//! Replaces the teacher's `Listener` (`mio::Poll` driven directly, a
//! `Slab<Arc<Session>>`, round-robin `std::sync::mpsc` senders) with a
//! single completion-ring-driven loop: every event — accept, read,
//! write, cancel — arrives as a tagged [`Cqe`] rather than a distinct
//! `mio::Token` match arm per I/O direction.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parser::Status;
use tracing::{debug, warn};

use crate::event::{EventTable, ServerEvent};
use crate::ring::{Cqe, CompletionRing};
use crate::session::Session;
use crate::sync::lock::Mutex;
use crate::worker_pool::WorkerPool;

/// The main server loop.
///
/// `ring` is behind a mutex rather than requiring `&mut self` for
/// [`run`](Self::run): the dispatcher is normally driven from one
/// thread, but [`stop`](Self::stop) is called from another, and a
/// shared `Arc<Dispatcher>` is the natural handle for that — the same
/// reason every other mutable field here is mutex-guarded rather than
/// plain.
pub struct Dispatcher {
    ring: Mutex<Box<dyn CompletionRing>>,
    events: Arc<EventTable>,
    listeners: Vec<RawFd>,
    sessions: Mutex<Vec<Arc<Session>>>,
    workers: WorkerPool,
    stopping: AtomicBool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.listeners.len())
            .field("sessions", &self.sessions.lock().len())
            .field("stopping", &self.stopping.load(Ordering::Relaxed))
            .finish()
    }
}

impl Dispatcher {
    /// Builds a dispatcher around an already-constructed ring, bound
    /// listener fds, and a worker pool ready to accept transactions.
    pub fn new(ring: Box<dyn CompletionRing>, listeners: Vec<RawFd>, workers: WorkerPool) -> Self {
        Dispatcher {
            ring: Mutex::new(ring),
            events: Arc::new(EventTable::new()),
            listeners,
            sessions: Mutex::new(Vec::new()),
            workers,
            stopping: AtomicBool::new(false),
        }
    }

    fn post_accept(&self, listener_fd: RawFd) -> std::io::Result<()> {
        let tag = self.events.insert(ServerEvent::Accept { listener_fd });
        self.ring.lock().accept(listener_fd, tag)
    }

    /// Runs the event loop until [`stop`](Self::stop) has been called
    /// and every session has drained. Blocks the calling thread.
    pub fn run(&self) -> std::io::Result<()> {
        let listeners = self.listeners.clone();
        for fd in listeners {
            self.post_accept(fd)?;
        }

        loop {
            if self.stopping.load(Ordering::Acquire) && self.sessions.lock().is_empty() {
                return Ok(());
            }

            let cqe = {
                let mut ring = self.ring.lock();
                ring.submit(1)?;
                ring.cqe()?
            };
            self.handle_completion(cqe)?;
            self.reap_closed_sessions();
        }
    }

    fn handle_completion(&self, cqe: Cqe) -> std::io::Result<()> {
        match self.events.take(cqe.user_data) {
            ServerEvent::Accept { listener_fd } => {
                if let Ok(fd) = cqe.as_accept() {
                    self.accept_session(fd);
                } else {
                    warn!(fd = listener_fd, "accept failed");
                }
                if !self.stopping.load(Ordering::Acquire) {
                    self.post_accept(listener_fd)?;
                }
            }
            ServerEvent::ReadBuffer { session } => {
                session.receive_read(cqe);
                self.route_completed_requests(&session);
                if !session.check_closing() {
                    session.set_read_buffer(&mut **self.ring.lock())?;
                }
            }
            ServerEvent::CloseStream { stream } => {
                if stream.has_in_progress_transaction() {
                    let tag = self.events.insert(ServerEvent::CloseStream { stream });
                    self.ring.lock().nop(tag)?;
                } else {
                    stream.close();
                }
            }
            ServerEvent::WriteCompletion { .. } | ServerEvent::Cancel | ServerEvent::Nop => {}
        }
        Ok(())
    }

    fn accept_session(&self, fd: RawFd) {
        let session = Session::new(fd, self.events.clone());
        match session.open_stream() {
            Ok(_) => {
                if let Err(err) = session.set_read_buffer(&mut **self.ring.lock()) {
                    warn!(%err, "failed to arm initial read");
                    return;
                }
                self.sessions.lock().push(session);
            }
            Err(err) => warn!(?err, "failed to open stream for accepted session"),
        }
    }

    fn route_completed_requests(&self, session: &Arc<Session>) {
        let Some(stream) = session.stream() else {
            return;
        };
        while let Some(transaction) = stream.try_complete_transaction() {
            if let Err(mut rejected) = self.workers.try_dispatch(transaction) {
                rejected.reset_response(Status::TooManyRequests);
                if let Err(err) = rejected.write_body_no_content() {
                    warn!(%err, "failed to write overload response");
                }
                rejected.deinit();
            }
        }
    }

    fn reap_closed_sessions(&self) {
        self.sessions.lock().retain(|s| !s.check_closing());
    }

    /// Begins a graceful shutdown: stops re-arming accepts and lets
    /// in-flight sessions drain on their own.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        debug!("dispatcher stopping");
    }
}
