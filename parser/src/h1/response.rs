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

//! Response head serialization.
//!
//! This only renders the status line and header block into a caller-owned
//! buffer; body framing (sized, chunked, compressed-chunked) and the actual
//! write to the wire live with the session/stream machinery that owns the
//! ring, not here.

use std::io::{self, Write};

use super::request::Header;
use crate::status::Status;
use crate::version::Version;

/// A response head under construction: status line plus header fields, in
/// the order they will be written.
#[derive(Debug)]
pub struct ResponseHead<'a> {
    version: Version,
    status: Status,
    headers: Vec<Header<'a>>,
}

impl<'a> ResponseHead<'a> {
    /// Starts a new response head with no headers set.
    pub fn new(version: Version, status: Status) -> Self {
        ResponseHead {
            version,
            status,
            headers: Vec::new(),
        }
    }

    /// Appends a header field, in wire order.
    pub fn push_header(&mut self, name: &'a str, value: &'a [u8]) -> &mut Self {
        self.headers.push(Header { name, value });
        self
    }

    /// The status this head will report.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Serializes the status line and headers, terminated by the blank
    /// line that ends a request/response head, per RFC 9112 Section 4.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write!(w, "{} {}\r\n", self.version, self.status)?;
        for header in &self.headers {
            w.write_all(header.name.as_bytes())?;
            w.write_all(b": ")?;
            w.write_all(header.value)?;
            w.write_all(b"\r\n")?;
        }
        w.write_all(b"\r\n")
    }

    /// A minimal `400 Bad Request` head with no body, used when the parser
    /// rejects a malformed request before a `Stream` exists to route it
    /// elsewhere.
    pub fn bad_request(version: Version) -> Self {
        let mut head = ResponseHead::new(version, Status::BadRequest);
        head.push_header("Content-Length", b"0");
        head.push_header("Connection", b"close");
        head
    }

    /// A `429 Too Many Requests` head, used by the dispatcher when the
    /// worker pool's queue is saturated.
    pub fn too_many_requests(version: Version) -> Self {
        let mut head = ResponseHead::new(version, Status::TooManyRequests);
        head.push_header("Content-Length", b"0");
        head.push_header("Connection", b"close");
        head
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn writes_status_line_and_headers() {
        let mut head = ResponseHead::new(Version::H1_1, Status::Ok);
        head.push_header("Content-Length", b"5");
        head.push_header("Content-Type", b"text/plain");

        let mut out = Vec::new();
        head.write_to(&mut out).unwrap();

        assert_eq!(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nContent-Type: text/plain\r\n\r\n" as &[u8],
            out.as_slice()
        );
    }

    #[test]
    fn bad_request_has_no_body_and_closes() {
        let mut out = Vec::new();
        ResponseHead::bad_request(Version::H1_1).write_to(&mut out).unwrap();
        assert_eq!(
            b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n" as &[u8],
            out.as_slice()
        );
    }

    #[test]
    fn too_many_requests_reports_429() {
        let head = ResponseHead::too_many_requests(Version::H1_1);
        assert_eq!(Status::TooManyRequests, head.status());
    }
}
