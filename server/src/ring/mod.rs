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

//! A uniform completion-queue abstraction over two backends: `io_uring`
//! on Linux, and a portable `mio::Poll`-driven fallback everywhere else.
//!
//! Every op submitted carries a `user_data` tag the caller chooses —
//! normally a pointer to a `ServerEvent` living in the session/stream it
//! concerns. The ring itself doesn't interpret that value; it just hands
//! it back unchanged on the matching completion.

#[cfg(target_os = "linux")]
pub mod io_uring_ring;
pub mod poll_ring;

use std::fmt;
use std::os::fd::RawFd;

pub use poll_ring::PollRing;

#[cfg(target_os = "linux")]
pub use io_uring_ring::IoUringRing;

/// One completed operation. `result` follows the raw `io_uring`
/// convention: non-negative is a success value (bytes transferred, a new
/// fd, …), negative is `-errno`. The typed `as_*` decoders below turn
/// that into a `Result<_, RingError>` without the caller re-deriving the
/// errno mapping at every call site.
#[derive(Debug, Clone, Copy)]
pub struct Cqe {
    /// The tag supplied when the operation was submitted.
    pub user_data: u64,
    /// Raw result: `>= 0` on success, `-errno` on failure.
    pub result: i32,
}

impl Cqe {
    fn decode(self) -> Result<u32, RingError> {
        if self.result >= 0 {
            Ok(self.result as u32)
        } else {
            Err(RingError::from_errno(-self.result))
        }
    }

    /// Decodes a `recv` completion: bytes received, or the recv-specific
    /// error subset.
    pub fn as_recv(self) -> Result<u32, RingError> {
        self.decode()
    }

    /// Decodes an `accept` completion: the accepted fd, or the
    /// accept-specific error subset.
    pub fn as_accept(self) -> Result<RawFd, RingError> {
        self.decode().map(|v| v as RawFd)
    }

    /// Decodes a `send` completion: bytes sent.
    pub fn as_send(self) -> Result<u32, RingError> {
        self.decode()
    }

    /// Decodes a `close` completion.
    pub fn as_close(self) -> Result<(), RingError> {
        self.decode().map(|_| ())
    }

    /// Decodes a `cancel` completion. Succeeding means the target
    /// operation was found and cancelled; `NoEntity` means it had
    /// already completed.
    pub fn as_cancel(self) -> Result<(), RingError> {
        self.decode().map(|_| ())
    }
}

/// The error subset a completion can report, named after the `errno`
/// values the spec's typed decoders enumerate rather than a raw
/// `io::Error`, so callers can match on the cases that matter
/// (`Again`, `ConnReset`, …) without string-matching `Display` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// `EAGAIN`/`EWOULDBLOCK`: operation would block, retry later.
    Again,
    /// `ECONNREFUSED`.
    ConnRefused,
    /// `ECONNRESET`.
    ConnReset,
    /// `ENOTCONN`.
    NotConn,
    /// `ENOTSOCK`.
    NotSock,
    /// `ENOENT`: `cancel` target not found (already completed).
    NoEntity,
    /// `EINVAL`.
    Invalid,
    /// `EALREADY`: `cancel` target already being cancelled.
    Already,
    /// Any other errno, preserved verbatim.
    Other(i32),
}

impl RingError {
    fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EAGAIN | libc::EWOULDBLOCK => RingError::Again,
            libc::ECONNREFUSED => RingError::ConnRefused,
            libc::ECONNRESET => RingError::ConnReset,
            libc::ENOTCONN => RingError::NotConn,
            libc::ENOTSOCK => RingError::NotSock,
            libc::ENOENT => RingError::NoEntity,
            libc::EINVAL => RingError::Invalid,
            libc::EALREADY => RingError::Already,
            other => RingError::Other(other),
        }
    }
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::Again => write!(f, "operation would block"),
            RingError::ConnRefused => write!(f, "connection refused"),
            RingError::ConnReset => write!(f, "connection reset by peer"),
            RingError::NotConn => write!(f, "socket not connected"),
            RingError::NotSock => write!(f, "not a socket"),
            RingError::NoEntity => write!(f, "no matching operation"),
            RingError::Invalid => write!(f, "invalid argument"),
            RingError::Already => write!(f, "operation already in progress"),
            RingError::Other(errno) => write!(f, "errno {errno}"),
        }
    }
}

impl std::error::Error for RingError {}

/// Flags controlling how a child ring created with
/// [`CompletionRing::child`] behaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingFlags {
    /// Share the parent's backlog-retry policy (submit-queue-full
    /// requeues onto the same backlog as the parent instead of
    /// blocking the caller).
    pub share_backlog_policy: bool,
}

/// Backend-uniform completion ring surface. A `Session`'s stream submits
/// its own sends on a child ring (`from`) so a slow write never blocks
/// behind the server's accept/read ring.
///
/// `Send` because every ring ends up behind a `Mutex` inside a `Session`,
/// `Stream`, or `Dispatcher` shared across the dispatcher and worker
/// threads via `Arc`.
pub trait CompletionRing: Send {
    /// Submits a no-op, useful purely to wake a blocked `submit`/`cqe`
    /// call or to re-arm a tagged event without doing real I/O.
    fn nop(&mut self, user_data: u64) -> std::io::Result<()>;

    /// Submits an accept on `listener_fd`.
    fn accept(&mut self, listener_fd: RawFd, user_data: u64) -> std::io::Result<()>;

    /// Submits a receive into `buf` on `fd`.
    ///
    /// # Safety
    /// `buf` must stay valid and exclusively borrowed until the matching
    /// completion is observed via [`cqe`](Self::cqe) — the backend may
    /// hold onto the raw pointer until then.
    unsafe fn recv(&mut self, fd: RawFd, buf: *mut [u8], user_data: u64) -> std::io::Result<()>;

    /// Submits a send of `buf` on `fd`.
    ///
    /// # Safety
    /// `buf` must stay valid until the matching completion is observed.
    unsafe fn send(&mut self, fd: RawFd, buf: *const [u8], user_data: u64) -> std::io::Result<()>;

    /// Submits a close of `fd`.
    fn close(&mut self, fd: RawFd, user_data: u64) -> std::io::Result<()>;

    /// Submits a cancellation of the in-flight operation tagged
    /// `target_user_data`.
    fn cancel(&mut self, target_user_data: u64, user_data: u64) -> std::io::Result<()>;

    /// Publishes all pending submissions and blocks until at least
    /// `wait_n` of them have completed (0 means don't block).
    fn submit(&mut self, wait_n: usize) -> std::io::Result<usize>;

    /// Returns one completion, blocking if none is ready, driving the
    /// backend's own wait mechanism (`io_uring_enter` or `poll(2)`) as
    /// needed.
    fn cqe(&mut self) -> std::io::Result<Cqe>;

    /// Creates a child ring that shares this ring's backlog-retry
    /// policy but keeps an independent completion queue.
    fn child(&self, entries: u32, flags: RingFlags) -> std::io::Result<Box<dyn CompletionRing>>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_success_and_errno_completions() {
        let ok = Cqe {
            user_data: 7,
            result: 42,
        };
        assert_eq!(Ok(42), ok.as_recv());

        let again = Cqe {
            user_data: 7,
            result: -libc::EAGAIN,
        };
        assert_eq!(Err(RingError::Again), again.as_recv());

        let reset = Cqe {
            user_data: 7,
            result: -libc::ECONNRESET,
        };
        assert_eq!(Err(RingError::ConnReset), reset.as_recv());
    }

    #[test]
    fn cancel_not_found_reports_no_entity() {
        let cqe = Cqe {
            user_data: 1,
            result: -libc::ENOENT,
        };
        assert_eq!(Err(RingError::NoEntity), cqe.as_cancel());
    }
}
