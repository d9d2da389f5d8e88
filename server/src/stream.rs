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

//! The byte channel inside a session: parses incoming HTTP/1 requests,
//! queues decoded buffers, and writes responses on its own sub-ring.

use std::collections::VecDeque;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use flate2::write::GzEncoder;
use flate2::Compression;
use typed_arena::Arena;

use tracing::warn;

use parser::h1::chunked::{encode_chunk, encode_final_chunk};
use parser::h1::request::H1Request;
use parser::h1::response::ResponseHead;
use parser::h1::Status as ParseStatus;
use parser::Version;

use crate::buffer::RefSlice;
use crate::event::EventTable;
use crate::ring::{CompletionRing, PollRing};
use crate::session::Session;
use crate::sync::condvar::Condvar;
use crate::sync::lock::Mutex;
use crate::transaction::{Request, Response, Transaction};

/// A stream's lifecycle state, per SPEC_FULL.md's HTTP/2-flavored state
/// machine (only `Idle`/`Open`/`Closed` are reachable on HTTP/1 today;
/// the half-closed states are reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No request has started arriving yet.
    Idle,
    /// Actively receiving and/or responding to a request.
    Open,
    /// This side has finished sending; reserved for a future HTTP/2 revision.
    HalfClosedLocal,
    /// The peer has finished sending; reserved for a future HTTP/2 revision.
    HalfClosedRemote,
    /// Fully closed; eligible for removal once no transaction is in flight.
    Closed,
}

/// Optimization the caller picks for body reads: return as soon as any
/// byte is available, or keep pulling until the destination is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOptimization {
    /// Return as soon as at least one byte is available.
    Latency,
    /// Keep reading until the destination buffer is full or the body ends.
    Bandwidth,
}

struct ParseState {
    scratch: Vec<u8>,
}

/// The stream's single logical request/response channel.
pub struct Stream {
    state: Mutex<StreamState>,
    session: Weak<Session>,
    input: Mutex<VecDeque<RefSlice>>,
    parse: Mutex<ParseState>,
    keep_alive: AtomicBool,
    in_progress_transaction: AtomicBool,
    update: Condvar,
    sub_ring: Mutex<Box<dyn CompletionRing>>,
    events: Arc<EventTable>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Stream {
    /// Creates a new, idle stream owned by `session`.
    pub fn new(session: Weak<Session>, events: Arc<EventTable>) -> Arc<Self> {
        // A stream's sends go out on their own ring so a slow write
        // never blocks behind the server's accept/read ring.
        let sub_ring: Box<dyn CompletionRing> =
            Box::new(PollRing::new(16).expect("failed to create stream sub-ring"));

        Arc::new(Stream {
            state: Mutex::new(StreamState::Idle),
            session,
            input: Mutex::new(VecDeque::new()),
            parse: Mutex::new(ParseState { scratch: Vec::new() }),
            keep_alive: AtomicBool::new(true),
            in_progress_transaction: AtomicBool::new(false),
            update: Condvar::new(),
            sub_ring: Mutex::new(sub_ring),
            events,
        })
    }

    /// Whether this stream has reached `Closed`.
    pub fn is_closed(&self) -> bool {
        *self.state.lock() == StreamState::Closed
    }

    /// Whether a transaction is currently being handled; the dispatcher
    /// refuses to destroy a stream while this is set.
    pub fn has_in_progress_transaction(&self) -> bool {
        self.in_progress_transaction.load(Ordering::Acquire)
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.session.upgrade()
    }

    /// Appends newly-received bytes to the input queue and the parse
    /// scratch buffer.
    pub fn push_input(&self, slice: RefSlice) {
        slice.with_slice(|bytes| self.parse.lock().scratch.extend_from_slice(bytes));
        self.input.lock().push_back(slice);
        self.update.notify_all();
    }

    /// Runs the HTTP/1 request-line + header parser over whatever has
    /// accumulated in the scratch buffer. If a request is now complete,
    /// materializes a [`Transaction`] and leaves any residual bytes in
    /// the scratch buffer (and the input queue) for the next request.
    ///
    /// A malformed head is answered with a `400 Bad Request` and the
    /// stream is closed, rather than left to wait forever for bytes that
    /// will never resolve the parse error.
    pub fn try_complete_transaction(self: &Arc<Self>) -> Option<Transaction> {
        if self.in_progress_transaction.load(Ordering::Acquire) {
            return None;
        }

        let mut parse_state = self.parse.lock();
        let mut req = H1Request::new();
        let status = match req.parse(&parse_state.scratch) {
            Ok(status) => status,
            Err(_) => {
                drop(parse_state);
                self.reject_malformed_request();
                return None;
            }
        };

        let ParseStatus::Complete(consumed) = status else {
            return None;
        };

        *self.state.lock() = StreamState::Open;

        let method = req.method?;
        let target = req.target?.to_owned();
        let version = req.version?;
        let keep_alive = req.keep_alive();
        let headers = req
            .headers
            .iter()
            .map(|h| (h.name.to_owned(), h.value.to_vec()))
            .collect();

        parse_state.scratch.drain(..consumed);
        drop(parse_state);
        self.advance_input(consumed);

        self.keep_alive.store(keep_alive, Ordering::Release);
        self.in_progress_transaction.store(true, Ordering::Release);

        let request = Request {
            method,
            target,
            version,
            headers,
        };
        let response = Response::default_for(version);

        Some(Transaction::new(self.clone(), request, response, Arena::new()))
    }

    /// Drops `n` bytes from the front of the input queue — the head bytes
    /// `try_complete_transaction` just consumed out of `scratch` — splitting
    /// the front slice rather than discarding it whole when it extends past
    /// the head into the body or a pipelined next request.
    fn advance_input(&self, mut n: usize) {
        let mut queue = self.input.lock();
        while n > 0 {
            let Some(slice) = queue.pop_front() else {
                break;
            };
            let len = slice.len();
            if len <= n {
                n -= len;
            } else {
                queue.push_front(slice.slice(n, len));
                n = 0;
            }
        }
    }

    /// Writes a `400 Bad Request` and closes the stream in response to a
    /// genuine parse error, rather than leaving the connection waiting on
    /// bytes that will never arrive.
    fn reject_malformed_request(self: &Arc<Self>) {
        let head = ResponseHead::bad_request(Version::H1_1);
        if let Err(err) = self.write_response(&head) {
            warn!(%err, "failed to write 400 response for malformed request");
        }
        self.close();
    }

    /// Serializes the status line and headers and submits a send on
    /// the sub-ring, consuming its completion before returning.
    pub fn write_response(&self, response: &ResponseHead<'_>) -> std::io::Result<()> {
        let mut bytes = Vec::new();
        response.write_to(&mut bytes)?;
        self.write_slice(&bytes)
    }

    /// Schedules one send of `bytes` and waits for it to complete.
    pub fn write_slice(&self, bytes: &[u8]) -> std::io::Result<()> {
        let Some(session) = self.session() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "session has been destroyed",
            ));
        };

        let mut ring = self.sub_ring.lock();
        // SAFETY: `bytes` outlives this call, which both submits and
        // (via `flush`) waits for the completion before returning.
        unsafe { ring.send(session.fd(), bytes as *const [u8], 0)? };
        ring.submit(1)?;
        let cqe = ring.cqe()?;
        cqe.as_send()
            .map(|_| ())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    /// Submits any pending sends and drains as many completions as SQEs
    /// were posted.
    pub fn flush(&self) -> std::io::Result<()> {
        let mut ring = self.sub_ring.lock();
        let n = ring.submit(0)?;
        for _ in 0..n {
            ring.cqe()?;
        }
        Ok(())
    }

    /// Re-queues `slice` at the front of the input queue, for a reader
    /// that only consumed part of what [`read_buffer`](Self::read_buffer)
    /// handed back (e.g. a sized body ending mid-slice, with the
    /// remainder belonging to the next pipelined request).
    pub(crate) fn push_front(&self, slice: RefSlice) {
        self.input.lock().push_front(slice);
    }

    /// Returns the next queued input slice, waiting on the update
    /// condition if the queue is currently empty.
    pub fn read_buffer(&self) -> Option<RefSlice> {
        let mut queue = self.input.lock();
        loop {
            if let Some(slice) = queue.pop_front() {
                return Some(slice);
            }
            if self.is_closed() {
                return None;
            }
            queue = self.update.wait(queue);
        }
    }

    /// Called when a transaction is destroyed: re-arms a read if
    /// keep-alive is on, otherwise closes the stream.
    pub fn mark_response_end(self: &Arc<Self>) {
        self.in_progress_transaction.store(false, Ordering::Release);
        if self.keep_alive.load(Ordering::Acquire) {
            *self.state.lock() = StreamState::Idle;
        } else {
            self.close();
        }
    }

    /// Sets state to `Closed` and wakes any thread blocked in
    /// [`read_buffer`](Self::read_buffer).
    pub fn close(self: &Arc<Self>) {
        *self.state.lock() = StreamState::Closed;
        self.update.notify_all();
    }
}

/// A response body writer, one of the three modes SPEC_FULL.md §4.5
/// describes.
pub enum BodyWriter<'a> {
    /// `Content-Length: n`; writes are buffered and flushed in 64 KiB blocks.
    Sized {
        stream: &'a Stream,
        buffer: Vec<u8>,
        remaining: u64,
    },
    /// `Transfer-Encoding: chunked`; each flush emits one chunk, `close`
    /// emits the terminating `0\r\n\r\n`.
    Chunked { stream: &'a Stream, buffer: Vec<u8> },
    /// Chunked transfer-encoding wrapping a gzip compressor.
    CompressedChunked {
        stream: &'a Stream,
        encoder: GzEncoder<Vec<u8>>,
    },
}

impl std::fmt::Debug for BodyWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BodyWriter::Sized { .. } => "Sized",
            BodyWriter::Chunked { .. } => "Chunked",
            BodyWriter::CompressedChunked { .. } => "CompressedChunked",
        };
        f.debug_tuple("BodyWriter").field(&name).finish()
    }
}

const SIZED_FLUSH_THRESHOLD: usize = 64 * 1024;

impl<'a> BodyWriter<'a> {
    /// Writes `data` into the body, flushing a block once the sized
    /// mode's threshold or the chunked modes' natural boundary is hit.
    pub fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            BodyWriter::Sized {
                stream,
                buffer,
                remaining,
            } => {
                buffer.extend_from_slice(data);
                *remaining = remaining.saturating_sub(data.len() as u64);
                if buffer.len() >= SIZED_FLUSH_THRESHOLD {
                    stream.write_slice(buffer)?;
                    buffer.clear();
                }
                Ok(())
            }
            BodyWriter::Chunked { stream, buffer } => {
                buffer.clear();
                encode_chunk(data, buffer);
                stream.write_slice(buffer)
            }
            BodyWriter::CompressedChunked { encoder, .. } => {
                encoder.write_all(data)
            }
        }
    }

    /// Finalizes the body: flushes any buffered bytes (sized), or
    /// writes the terminating chunk (chunked / compressed-chunked).
    pub fn close(mut self) -> std::io::Result<()> {
        match &mut self {
            BodyWriter::Sized { stream, buffer, .. } => {
                if !buffer.is_empty() {
                    stream.write_slice(buffer)?;
                }
                stream.flush()
            }
            BodyWriter::Chunked { stream, buffer } => {
                buffer.clear();
                encode_final_chunk(buffer);
                stream.write_slice(buffer)?;
                stream.flush()
            }
            BodyWriter::CompressedChunked { stream, encoder } => {
                let compressed = std::mem::replace(encoder, GzEncoder::new(Vec::new(), Compression::default()))
                    .finish()?;
                let mut chunk = Vec::new();
                if !compressed.is_empty() {
                    encode_chunk(&compressed, &mut chunk);
                    stream.write_slice(&chunk)?;
                }
                chunk.clear();
                encode_final_chunk(&mut chunk);
                stream.write_slice(&chunk)?;
                stream.flush()
            }
        }
    }
}

/// A request body reader, mirroring the writer's `Sized`/`Chunked` split.
///
/// The chunked variant does not split a slice at the terminating chunk —
/// bytes belonging to a pipelined next request sharing the same slice as
/// the final `0\r\n\r\n` are consumed along with it rather than requeued.
#[derive(Debug)]
pub enum BodyReader<'a> {
    /// `Content-Length`-framed body.
    Sized { stream: &'a Stream, remaining: u64 },
    /// `Transfer-Encoding: chunked`-framed body.
    Chunked {
        stream: &'a Stream,
        decoder: parser::h1::chunked::ChunkedReader,
    },
}

impl<'a> BodyReader<'a> {
    /// Reads body bytes into `out`, honoring `optimisation`: `Latency`
    /// returns as soon as any byte is available, `Bandwidth` keeps
    /// pulling until `out` is full or the body ends.
    pub fn read(&mut self, out: &mut Vec<u8>, optimisation: ReadOptimization) -> std::io::Result<usize> {
        let start_len = out.len();
        match self {
            BodyReader::Sized { stream, remaining } => {
                while *remaining > 0 {
                    let Some(slice) = stream.read_buffer() else {
                        break;
                    };
                    let take = (slice.len() as u64).min(*remaining) as usize;
                    slice.with_slice(|b| out.extend_from_slice(&b[..take]));
                    *remaining -= take as u64;
                    if take < slice.len() {
                        // The tail belongs to whatever follows this body
                        // (the next pipelined request's head) — put it
                        // back rather than drop it.
                        stream.push_front(slice.slice(take, slice.len()));
                    }
                    if optimisation == ReadOptimization::Latency {
                        break;
                    }
                }
            }
            BodyReader::Chunked { stream, decoder } => {
                while !decoder.is_done() {
                    let Some(slice) = stream.read_buffer() else {
                        break;
                    };
                    slice.with_slice(|b| {
                        let _ = decoder.decode(b, out);
                    });
                    if optimisation == ReadOptimization::Latency {
                        break;
                    }
                }
            }
        }
        Ok(out.len() - start_len)
    }
}
