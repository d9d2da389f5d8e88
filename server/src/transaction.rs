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

//! One request/response exchange on a stream: the parsed request, the
//! response under construction, and a scratch arena a handler can use to
//! stage body fragments without per-call heap churn.

use std::sync::Arc;

use parser::h1::chunked::ChunkedReader;
use parser::h1::response::ResponseHead;
use parser::{Method, Status, Version};
use typed_arena::Arena;

use crate::stream::{BodyReader, BodyWriter, ReadOptimization, Stream};

/// A parsed HTTP/1 request head, owned independently of the buffer it was
/// parsed out of (the scratch buffer it borrowed from is reused for the
/// next request as soon as this is materialized).
#[derive(Debug, Clone)]
pub struct Request {
    /// The request's method.
    pub method: Method,
    /// The request target exactly as written on the wire.
    pub target: String,
    /// The request's declared HTTP version.
    pub version: Version,
    /// Header fields in wire order.
    pub headers: Vec<(String, Vec<u8>)>,
}

impl Request {
    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// The request's declared body length, per `Content-Length`.
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.trim().parse().ok())
    }

    /// Whether `Transfer-Encoding` names `chunked` as its final coding.
    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| {
                v.split(|&b| b == b',').any(|tok| {
                    std::str::from_utf8(tok)
                        .map(|s| s.trim().eq_ignore_ascii_case("chunked"))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }
}

/// A response under construction. Serialized into a [`ResponseHead`] only
/// when [`Transaction::write_response`] is called, so a handler is free to
/// change the status or add headers right up until then.
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP version the response is framed under (mirrors the
    /// request's, since this core doesn't upgrade protocols mid-stream).
    pub version: Version,
    /// The status line's code.
    pub status: Status,
    /// Header fields, in the order they'll be written.
    pub headers: Vec<(String, Vec<u8>)>,
}

impl Response {
    /// A bare `200 OK` with no headers, framed under `version`.
    pub fn default_for(version: Version) -> Self {
        Response {
            version,
            status: Status::Ok,
            headers: Vec::new(),
        }
    }

    /// Appends a header field.
    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.headers.push((name.into(), value.into()));
    }

    fn to_head(&self) -> ResponseHead<'_> {
        let mut head = ResponseHead::new(self.version, self.status);
        for (name, value) in &self.headers {
            head.push_header(name, value);
        }
        head
    }
}

/// One request/response exchange. Destroying it (via
/// [`deinit`](Self::deinit)) hands the stream back to keep-alive or
/// closes it, per the request's negotiated persistence.
pub struct Transaction {
    stream: Arc<Stream>,
    /// The parsed request this transaction is responding to.
    pub request: Request,
    /// The response being built up.
    pub response: Response,
    arena: Arena<u8>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("request", &self.request)
            .field("response", &self.response)
            .finish()
    }
}

impl Transaction {
    /// Builds a transaction around an already-parsed request and a
    /// default response, owning `arena` for the handler's body-staging
    /// needs.
    pub fn new(stream: Arc<Stream>, request: Request, response: Response, arena: Arena<u8>) -> Self {
        Transaction {
            stream,
            request,
            response,
            arena,
        }
    }

    /// Discards whatever the handler has built up so far and starts a
    /// fresh response at `status`, e.g. after a handler decides midway
    /// through that the request can't be served as planned.
    pub fn reset_response(&mut self, status: Status) {
        self.response = Response {
            version: self.response.version,
            status,
            headers: Vec::new(),
        };
    }

    /// Copies `data` into the transaction's arena, returning a slice
    /// living as long as the transaction — lets a handler stage a body
    /// fragment without a one-off heap allocation per call.
    pub fn alloc_body(&self, data: &[u8]) -> &[u8] {
        self.arena.alloc_extend(data.iter().copied())
    }

    /// Serializes and sends the status line and headers accumulated in
    /// [`response`](Self::response).
    pub fn write_response(&self) -> std::io::Result<()> {
        let head = self.response.to_head();
        self.stream.write_response(&head)
    }

    /// Writes the response head with a `Content-Length: size` framing
    /// and returns a writer for the body.
    pub fn write_body_start(&mut self, size: u64, content_type: &str) -> std::io::Result<BodyWriter<'_>> {
        self.response.push_header("Content-Length", size.to_string().into_bytes());
        self.response.push_header("Content-Type", content_type.as_bytes().to_vec());
        self.write_response()?;
        Ok(BodyWriter::Sized {
            stream: &self.stream,
            buffer: Vec::new(),
            remaining: size,
        })
    }

    /// Writes the response head with `Transfer-Encoding: chunked` framing
    /// and returns a writer for the body, for bodies whose size isn't
    /// known up front.
    pub fn write_body_start_chunked(&mut self, content_type: &str) -> std::io::Result<BodyWriter<'_>> {
        self.response.push_header("Transfer-Encoding", b"chunked".to_vec());
        self.response.push_header("Content-Type", content_type.as_bytes().to_vec());
        self.write_response()?;
        Ok(BodyWriter::Chunked {
            stream: &self.stream,
            buffer: Vec::new(),
        })
    }

    /// Writes the response head with `Transfer-Encoding: chunked` framing
    /// plus `Content-Encoding: gzip`, compressing the body on the fly as
    /// the handler writes to it.
    pub fn write_body_start_compressed(&mut self, content_type: &str) -> std::io::Result<BodyWriter<'_>> {
        self.response.push_header("Transfer-Encoding", b"chunked".to_vec());
        self.response.push_header("Content-Encoding", b"gzip".to_vec());
        self.response.push_header("Content-Type", content_type.as_bytes().to_vec());
        self.write_response()?;
        Ok(BodyWriter::CompressedChunked {
            stream: &self.stream,
            encoder: flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default()),
        })
    }

    /// Writes the response head with `Content-Length: 0` and no body, for
    /// statuses that carry no content.
    pub fn write_body_no_content(&mut self) -> std::io::Result<()> {
        self.response.push_header("Content-Length", b"0".to_vec());
        self.write_response()
    }

    /// A reader over the request body, framed per whichever of
    /// `Content-Length`/`Transfer-Encoding: chunked` the request declared
    /// (chunked wins if both are present, matching framing precedence).
    pub fn body_reader(&self, optimise: ReadOptimization) -> BodyReader<'_> {
        let _ = optimise;
        if self.request.is_chunked() {
            BodyReader::Chunked {
                stream: &self.stream,
                decoder: ChunkedReader::new(),
            }
        } else {
            BodyReader::Sized {
                stream: &self.stream,
                remaining: self.request.content_length().unwrap_or(0),
            }
        }
    }

    /// Ends the transaction, re-arming the stream for another request if
    /// the connection is being kept alive.
    pub fn deinit(self) {
        self.stream.mark_response_end();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn response_default_for_is_200_with_no_headers() {
        let r = Response::default_for(Version::H1_1);
        assert_eq!(Status::Ok, r.status);
        assert!(r.headers.is_empty());
    }

    #[test]
    fn request_content_length_parses_decimal_header() {
        let req = Request {
            method: Method::Post,
            target: "/".to_string(),
            version: Version::H1_1,
            headers: vec![("Content-Length".to_string(), b"42".to_vec())],
        };
        assert_eq!(Some(42), req.content_length());
    }

    #[test]
    fn request_is_chunked_detects_transfer_encoding() {
        let req = Request {
            method: Method::Post,
            target: "/".to_string(),
            version: Version::H1_1,
            headers: vec![("Transfer-Encoding".to_string(), b"chunked".to_vec())],
        };
        assert!(req.is_chunked());
    }
}
