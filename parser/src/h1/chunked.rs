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

//! `Transfer-Encoding: chunked` framing (RFC 9112 Section 7.1).
//!
//! This module only moves bytes through the chunk grammar; it knows nothing
//! about sockets. `Stream`'s body reader/writer call into `encode_chunk`/
//! [`ChunkedReader`] and push the results onto the ring.

use std::io::Write;

use super::{ParseError, ParseResult, Status};

/// A chunk-size line longer than this is almost certainly not a legitimate
/// hex length (max realistic: 16 hex digits plus a short extension).
const MAX_CHUNK_SIZE_LINE: usize = 32;

#[derive(Debug)]
enum State {
    /// Accumulating the hex chunk-size line (and any chunk-extensions,
    /// which are ignored) up to its terminating newline.
    Size(Vec<u8>),
    /// Copying chunk-data bytes through to `out`; `usize` is how many
    /// remain in the current chunk.
    Data(usize),
    /// Consuming the CRLF that follows chunk data, before the next
    /// chunk-size line. `bool` tracks whether a `\r` has already been seen.
    DataCrlf(bool),
    /// Consuming trailer header lines (if any) up to the final blank line.
    Trailers(Vec<u8>),
    /// The terminating chunk and any trailers have been fully consumed.
    Done,
}

/// Writes one chunk (size line, data, trailing CRLF) to `out`.
pub fn encode_chunk(data: &[u8], out: &mut Vec<u8>) {
    write!(out, "{:x}\r\n", data.len()).expect("write to Vec<u8> cannot fail");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Writes the terminating zero-length chunk with no trailers.
pub fn encode_final_chunk(out: &mut Vec<u8>) {
    out.extend_from_slice(b"0\r\n\r\n");
}

fn parse_chunk_size(line: &[u8]) -> ParseResult<usize> {
    let hex = match line.iter().position(|&b| b == b';') {
        Some(i) => &line[..i],
        None => line,
    };
    if hex.is_empty() {
        return Err(ParseError::InvalidChunkSize);
    }
    let text = std::str::from_utf8(hex).map_err(|_| ParseError::InvalidChunkSize)?;
    usize::from_str_radix(text.trim(), 16).map_err(|_| ParseError::InvalidChunkSize)
}

/// Incremental decoder for a chunked body. Feed it each newly-received
/// slice via [`decode`](Self::decode); decoded content bytes are appended
/// to the caller's `out` buffer, while chunk-size lines, trailing CRLFs,
/// and trailers are consumed without being echoed.
#[derive(Debug)]
pub struct ChunkedReader {
    state: State,
}

impl Default for ChunkedReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedReader {
    /// Starts a new decoder at the beginning of a chunked body.
    pub fn new() -> Self {
        ChunkedReader {
            state: State::Size(Vec::new()),
        }
    }

    /// Whether the terminating chunk and trailers have been fully consumed.
    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Advances the decoder with `input`, appending any decoded content
    /// bytes to `out`. Returns [`Status::Complete`] once the terminating
    /// chunk and trailers have been consumed, or [`Status::Partial`] if
    /// `input` ran out mid-body (call again with the next slice).
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> ParseResult<Status<()>> {
        let mut pos = 0;
        loop {
            let state = std::mem::replace(&mut self.state, State::Done);
            match state {
                State::Done => {
                    self.state = State::Done;
                    return Ok(Status::Complete(()));
                }
                State::Size(mut scratch) => {
                    let mut newline_found = false;
                    while pos < input.len() {
                        let b = input[pos];
                        pos += 1;
                        if b == b'\n' {
                            newline_found = true;
                            break;
                        }
                        if scratch.len() >= MAX_CHUNK_SIZE_LINE {
                            return Err(ParseError::InvalidChunkSize);
                        }
                        scratch.push(b);
                    }
                    if !newline_found {
                        self.state = State::Size(scratch);
                        return Ok(Status::Partial);
                    }
                    if scratch.last() == Some(&b'\r') {
                        scratch.pop();
                    }
                    let size = parse_chunk_size(&scratch)?;
                    self.state = if size == 0 {
                        State::Trailers(Vec::new())
                    } else {
                        State::Data(size)
                    };
                }
                State::Data(remaining) => {
                    let available = input.len() - pos;
                    if available == 0 {
                        self.state = State::Data(remaining);
                        return Ok(Status::Partial);
                    }
                    let take = available.min(remaining);
                    out.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    let remaining = remaining - take;
                    self.state = State::Data(remaining);
                    if remaining != 0 {
                        return Ok(Status::Partial);
                    }
                    self.state = State::DataCrlf(false);
                }
                State::DataCrlf(mut seen_cr) => {
                    let mut terminated = false;
                    loop {
                        if pos >= input.len() {
                            break;
                        }
                        let b = input[pos];
                        pos += 1;
                        if b == b'\r' && !seen_cr {
                            seen_cr = true;
                            continue;
                        }
                        if b == b'\n' {
                            terminated = true;
                            break;
                        }
                        return Err(ParseError::InvalidChunkSize);
                    }
                    if !terminated {
                        self.state = State::DataCrlf(seen_cr);
                        return Ok(Status::Partial);
                    }
                    self.state = State::Size(Vec::new());
                }
                State::Trailers(mut scratch) => {
                    let mut done = false;
                    while pos < input.len() {
                        let b = input[pos];
                        pos += 1;
                        scratch.push(b);
                        if scratch == b"\r\n"
                            || scratch == b"\n"
                            || scratch.ends_with(b"\r\n\r\n")
                            || scratch.ends_with(b"\n\n")
                        {
                            done = true;
                            break;
                        }
                    }
                    self.state = if done {
                        State::Done
                    } else {
                        State::Trailers(scratch)
                    };
                    if !done {
                        return Ok(Status::Partial);
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod proptest_suite {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Whatever a sequence of `encode_chunk` calls (plus the final
        /// terminator) puts on the wire, `ChunkedReader` recovers byte for
        /// byte, however the input is sliced up for `decode`.
        #[test]
        fn decoder_recovers_whatever_the_encoder_wrote(
            // A zero-length chunk is indistinguishable on the wire from the
            // terminating chunk, so every generated chunk carries at least
            // one byte.
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..64), 0..8),
            split_at in 1usize..17,
        ) {
            let mut wire = Vec::new();
            for chunk in &chunks {
                encode_chunk(chunk, &mut wire);
            }
            encode_final_chunk(&mut wire);

            let expected: Vec<u8> = chunks.into_iter().flatten().collect();

            let mut reader = ChunkedReader::new();
            let mut out = Vec::new();
            let mut status = Status::Partial;
            for piece in wire.chunks(split_at.max(1)) {
                status = reader.decode(piece, &mut out).unwrap();
            }

            prop_assert_eq!(Status::Complete(()), status);
            prop_assert!(reader.is_done());
            prop_assert_eq!(expected, out);
        }
    }
}
