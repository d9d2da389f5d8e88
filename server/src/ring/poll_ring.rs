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

//! The portable `CompletionRing` backend: `mio::Poll` reports readiness,
//! and the actual `recv(2)`/`send(2)`/`accept(2)` syscall runs inline
//! once a registered fd is ready, with the result stashed as a
//! completion for the next [`PollRing::cqe`] call.
//!
//! Grounded on the same `mio::Poll` + token-indexed bookkeeping the
//! teacher's `listener.rs` already used for its accept/read loop; this
//! generalizes that to the full `nop`/`accept`/`recv`/`send`/`close`/
//! `cancel` surface `CompletionRing` requires.

use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;

use super::{Cqe, CompletionRing, RingError, RingFlags};

enum PendingOp {
    Accept {
        listener_fd: RawFd,
        user_data: u64,
    },
    Recv {
        fd: RawFd,
        buf: *mut [u8],
        user_data: u64,
    },
    Send {
        fd: RawFd,
        buf: *const [u8],
        user_data: u64,
    },
}

// SAFETY: the raw pointers inside `Recv`/`Send` are only ever
// dereferenced on the thread driving this ring's `cqe` loop, and the
// `CompletionRing::recv`/`send` contract requires the caller to keep
// the buffer alive (and not touched elsewhere) until the matching
// completion fires.
unsafe impl Send for PendingOp {}

/// Portable `CompletionRing` backend built on `mio::Poll`. Used on
/// non-Linux Unix targets, and as the fallback when the kernel doesn't
/// advertise `io_uring` support.
pub struct PollRing {
    poll: Poll,
    events: Events,
    pending: Slab<PendingOp>,
    completions: VecDeque<Cqe>,
    share_backlog_policy: bool,
}

impl std::fmt::Debug for PollRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollRing")
            .field("pending", &self.pending.len())
            .field("completions", &self.completions.len())
            .finish()
    }
}

impl PollRing {
    /// Creates a new ring with room for `capacity` simultaneously
    /// tracked events.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(PollRing {
            poll: Poll::new()?,
            events: Events::with_capacity(capacity.max(1)),
            pending: Slab::with_capacity(capacity.max(1)),
            completions: VecDeque::new(),
            share_backlog_policy: false,
        })
    }

    fn register(&mut self, fd: RawFd, interest: Interest, op: PendingOp) -> io::Result<()> {
        let token_index = self.pending.insert(op);
        let token = Token(token_index);
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, interest)
    }

    fn drive_ready(&mut self, fd: RawFd, token: Token) {
        let Some(op) = self.pending.try_remove(token.0) else {
            return;
        };
        let _ = self.poll.registry().deregister(&mut SourceFd(&fd));

        let cqe = match op {
            PendingOp::Accept {
                listener_fd,
                user_data,
            } => {
                // SAFETY: `accept` is a standard blocking-or-EAGAIN
                // syscall on a non-blocking fd; no invariants beyond
                // `listener_fd` being a valid, open socket.
                let result = unsafe {
                    libc::accept(listener_fd, std::ptr::null_mut(), std::ptr::null_mut())
                };
                let result = if result < 0 {
                    -io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL)
                } else {
                    result as i32
                };
                Cqe { user_data, result }
            }
            PendingOp::Recv { fd, buf, user_data } => {
                // SAFETY: the `CompletionRing::recv` contract guarantees
                // `buf` is still valid and exclusively ours at this
                // point.
                let slice = unsafe { &mut *buf };
                let result = unsafe {
                    libc::recv(
                        fd,
                        slice.as_mut_ptr() as *mut libc::c_void,
                        slice.len(),
                        0,
                    )
                };
                let result = if result < 0 {
                    -io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL)
                } else {
                    result as i32
                };
                Cqe { user_data, result }
            }
            PendingOp::Send { fd, buf, user_data } => {
                // SAFETY: see `Recv` above.
                let slice = unsafe { &*buf };
                let result = unsafe {
                    libc::send(
                        fd,
                        slice.as_ptr() as *const libc::c_void,
                        slice.len(),
                        0,
                    )
                };
                let result = if result < 0 {
                    -io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL)
                } else {
                    result as i32
                };
                Cqe { user_data, result }
            }
        };
        self.completions.push_back(cqe);
    }
}

impl CompletionRing for PollRing {
    fn nop(&mut self, user_data: u64) -> io::Result<()> {
        self.completions.push_back(Cqe {
            user_data,
            result: 0,
        });
        Ok(())
    }

    fn accept(&mut self, listener_fd: RawFd, user_data: u64) -> io::Result<()> {
        self.register(
            listener_fd,
            Interest::READABLE,
            PendingOp::Accept {
                listener_fd,
                user_data,
            },
        )
    }

    unsafe fn recv(&mut self, fd: RawFd, buf: *mut [u8], user_data: u64) -> io::Result<()> {
        self.register(fd, Interest::READABLE, PendingOp::Recv { fd, buf, user_data })
    }

    unsafe fn send(&mut self, fd: RawFd, buf: *const [u8], user_data: u64) -> io::Result<()> {
        self.register(fd, Interest::WRITABLE, PendingOp::Send { fd, buf, user_data })
    }

    fn close(&mut self, fd: RawFd, user_data: u64) -> io::Result<()> {
        // SAFETY: `fd` is caller-owned and no longer used afterwards;
        // mirrors `libc::close` use in the io_uring echo-server example.
        let result = unsafe { libc::close(fd) };
        let result = if result < 0 {
            -io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL)
        } else {
            0
        };
        self.completions.push_back(Cqe { user_data, result });
        Ok(())
    }

    fn cancel(&mut self, target_user_data: u64, user_data: u64) -> io::Result<()> {
        let found = self
            .pending
            .iter()
            .find(|(_, op)| {
                matches!(op,
                    PendingOp::Accept { user_data: u, .. }
                    | PendingOp::Recv { user_data: u, .. }
                    | PendingOp::Send { user_data: u, .. } if *u == target_user_data)
            })
            .map(|(token, _)| token);

        let result = if let Some(token) = found {
            let fd = match &self.pending[token] {
                PendingOp::Accept { listener_fd, .. } => *listener_fd,
                PendingOp::Recv { fd, .. } => *fd,
                PendingOp::Send { fd, .. } => *fd,
            };
            self.pending.remove(token);
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
            0
        } else {
            -libc::ENOENT
        };

        self.completions.push_back(Cqe { user_data, result });
        Ok(())
    }

    fn submit(&mut self, wait_n: usize) -> io::Result<usize> {
        if wait_n == 0 {
            return Ok(self.completions.len());
        }
        while self.completions.len() < wait_n {
            self.poll.poll(&mut self.events, None)?;
            let ready: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
            for token in ready {
                if let Some(op) = self.pending.get(token.0) {
                    let fd = match op {
                        PendingOp::Accept { listener_fd, .. } => *listener_fd,
                        PendingOp::Recv { fd, .. } => *fd,
                        PendingOp::Send { fd, .. } => *fd,
                    };
                    self.drive_ready(fd, token);
                }
            }
        }
        Ok(self.completions.len())
    }

    fn cqe(&mut self) -> io::Result<Cqe> {
        loop {
            if let Some(cqe) = self.completions.pop_front() {
                return Ok(cqe);
            }
            self.poll.poll(&mut self.events, Some(Duration::from_secs(1)))?;
            let ready: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
            for token in ready {
                if let Some(op) = self.pending.get(token.0) {
                    let fd = match op {
                        PendingOp::Accept { listener_fd, .. } => *listener_fd,
                        PendingOp::Recv { fd, .. } => *fd,
                        PendingOp::Send { fd, .. } => *fd,
                    };
                    self.drive_ready(fd, token);
                }
            }
        }
    }

    fn child(&self, entries: u32, flags: RingFlags) -> io::Result<Box<dyn CompletionRing>> {
        let mut ring = PollRing::new(entries as usize)?;
        ring.share_backlog_policy = flags.share_backlog_policy;
        Ok(Box::new(ring))
    }
}
