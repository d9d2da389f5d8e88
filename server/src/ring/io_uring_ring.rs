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

//! The Linux `io_uring` `CompletionRing` backend.
//!
//! Grounded directly on the teacher's own `examples/io_uring_echo_server.rs`:
//! a backlog `VecDeque<squeue::Entry>` drains into the submission queue
//! whenever it has room, `submit_and_wait` retries on `EBUSY`, and
//! completions carry back the `user_data` tag unchanged. That example
//! built its own accept/poll/read/write state machine on top of the
//! ring; this module only provides the uniform ring primitives
//! (`nop`/`accept`/`recv`/`send`/`close`/`cancel`) and leaves the
//! state machine to `Session`/`Stream`.

use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;

use io_uring::{cqueue, opcode, squeue, types, IoUring};

use super::{Cqe, CompletionRing, RingFlags};

/// Probes whether the running kernel supports `io_uring` at all, by
/// attempting to create a minimal ring. Called once at server startup
/// to decide between [`IoUringRing`] and
/// [`PollRing`](super::poll_ring::PollRing).
pub fn is_supported() -> bool {
    IoUring::new(2).is_ok()
}

/// `io_uring`-backed completion ring.
pub struct IoUringRing {
    ring: IoUring,
    backlog: VecDeque<squeue::Entry>,
    share_backlog_policy: bool,
}

impl std::fmt::Debug for IoUringRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoUringRing")
            .field("backlog", &self.backlog.len())
            .finish()
    }
}

impl IoUringRing {
    /// Creates a new ring with `entries` submission-queue slots.
    pub fn new(entries: u32) -> io::Result<Self> {
        Ok(IoUringRing {
            ring: IoUring::new(entries)?,
            backlog: VecDeque::new(),
            share_backlog_policy: false,
        })
    }

    fn push(&mut self, entry: squeue::Entry) {
        // SAFETY: the resources an entry references (fds, buffer
        // pointers) are guaranteed live until completion by this
        // module's callers, per `CompletionRing::recv`/`send`'s safety
        // contract.
        unsafe {
            if self.ring.submission().push(&entry).is_err() {
                self.backlog.push_back(entry);
            }
        }
    }

    fn drain_backlog(&mut self) -> io::Result<()> {
        loop {
            if self.ring.submission().is_full() {
                match self.ring.submit() {
                    Ok(_) => {}
                    Err(ref err) if err.raw_os_error() == Some(libc::EBUSY) => return Ok(()),
                    Err(err) => return Err(err),
                }
            }
            self.ring.submission().sync();
            match self.backlog.pop_front() {
                // SAFETY: see `push`.
                Some(entry) => unsafe {
                    let _ = self.ring.submission().push(&entry);
                },
                None => return Ok(()),
            }
        }
    }
}

impl CompletionRing for IoUringRing {
    fn nop(&mut self, user_data: u64) -> io::Result<()> {
        let entry = opcode::Nop::new().build().user_data(user_data);
        self.push(entry);
        Ok(())
    }

    fn accept(&mut self, listener_fd: RawFd, user_data: u64) -> io::Result<()> {
        let entry = opcode::Accept::new(types::Fd(listener_fd), std::ptr::null_mut(), std::ptr::null_mut())
            .build()
            .user_data(user_data);
        self.push(entry);
        Ok(())
    }

    unsafe fn recv(&mut self, fd: RawFd, buf: *mut [u8], user_data: u64) -> io::Result<()> {
        let len = (*buf).len() as u32;
        let ptr = buf as *mut u8;
        let entry = opcode::Recv::new(types::Fd(fd), ptr, len)
            .build()
            .user_data(user_data);
        self.push(entry);
        Ok(())
    }

    unsafe fn send(&mut self, fd: RawFd, buf: *const [u8], user_data: u64) -> io::Result<()> {
        let len = (*buf).len() as u32;
        let ptr = buf as *const u8;
        let entry = opcode::Send::new(types::Fd(fd), ptr, len)
            .build()
            .user_data(user_data);
        self.push(entry);
        Ok(())
    }

    fn close(&mut self, fd: RawFd, user_data: u64) -> io::Result<()> {
        let entry = opcode::Close::new(types::Fd(fd))
            .build()
            .user_data(user_data);
        self.push(entry);
        Ok(())
    }

    fn cancel(&mut self, target_user_data: u64, user_data: u64) -> io::Result<()> {
        let entry = opcode::AsyncCancel::new(target_user_data)
            .build()
            .user_data(user_data);
        self.push(entry);
        Ok(())
    }

    fn submit(&mut self, wait_n: usize) -> io::Result<usize> {
        self.drain_backlog()?;
        match self.ring.submit_and_wait(wait_n) {
            Ok(n) => Ok(n),
            Err(ref err) if err.raw_os_error() == Some(libc::EBUSY) => Ok(0),
            Err(err) => Err(err),
        }
    }

    fn cqe(&mut self) -> io::Result<Cqe> {
        loop {
            self.ring.completion().sync();
            if let Some(cqe) = self.ring.completion().next() {
                return Ok(to_cqe(cqe));
            }
            self.submit(1)?;
        }
    }

    fn child(&self, entries: u32, flags: RingFlags) -> io::Result<Box<dyn CompletionRing>> {
        let mut ring = IoUringRing::new(entries)?;
        ring.share_backlog_policy = flags.share_backlog_policy;
        Ok(Box::new(ring))
    }
}

fn to_cqe(entry: cqueue::Entry) -> Cqe {
    Cqe {
        user_data: entry.user_data(),
        result: entry.result(),
    }
}

