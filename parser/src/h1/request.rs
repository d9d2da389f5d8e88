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

//! HTTP/1.1 Request

use core::str::from_utf8_unchecked;

use super::tokens::{is_header_name_token, is_header_value_token, is_request_target_token};
use super::{discard_newline, discard_whitespace, ParseError, ParseResult, Status};
use crate::method::Method;
use crate::raw_request::RawRequest;
use crate::version::Version;

/// Headers beyond this count cause parsing to fail with
/// [`ParseError::TooManyHeaders`] rather than grow `Vec` allocations
/// without bound for a hostile peer.
const MAX_HEADERS: usize = 128;

/// A single parsed header field. Both name and value borrow directly from
/// the caller's input buffer — no per-header allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'a> {
    /// Field name, lowercased comparison is done via `eq_ignore_ascii_case`
    /// rather than at parse time, since most requests carry only a handful
    /// of headers and are looked up by name at most a few times.
    pub name: &'a str,
    /// Field value with leading/trailing optional whitespace already
    /// trimmed.
    pub value: &'a [u8],
}

/// Incremental HTTP/1.x request parser.
///
/// `parse` is called with the full contents of the session's read buffer
/// every time more bytes arrive; on [`Status::Partial`] the caller should
/// accumulate more data and call `parse` again with the same logical
/// buffer. State from a prior `Partial` call is not retained — this keeps
/// lifetimes simple at the cost of a full header rescan per call, which is
/// the same trade a fixed-size request line makes in practice (handful of
/// headers, few hundred bytes).
///
/// IETF RFC 9112.
#[derive(Debug, Default)]
pub struct H1Request<'buf> {
    /// Parsed request method.
    pub method: Option<Method>,
    /// Request target, exactly as it appeared on the wire (not decoded).
    pub target: Option<&'buf str>,
    /// Request's declared HTTP version.
    pub version: Option<Version>,
    /// Parsed header fields, in wire order.
    pub headers: Vec<Header<'buf>>,
    /// Set when the request line had no `HTTP/x.x` token at all — an
    /// HTTP/0.9-style simple request (`GET /path\r\n`), which by
    /// definition carries no headers and whose response closes the
    /// connection rather than being framed.
    pub simple_request: bool,
}

impl<'buf> H1Request<'buf> {
    /// Creates a new, empty HTTP/1.1 request parser.
    pub fn new() -> Self {
        H1Request {
            method: None,
            target: None,
            version: None,
            headers: Vec::new(),
            simple_request: false,
        }
    }

    fn reset(&mut self) {
        self.method = None;
        self.target = None;
        self.version = None;
        self.headers.clear();
        self.simple_request = false;
    }

    /// Attempts to parse a full request head (request line + headers) out
    /// of `buf`. Returns the number of bytes consumed on
    /// [`Status::Complete`]; returns [`Status::Partial`] if `buf` does not
    /// yet contain a complete head.
    ///
    /// # Example
    /// ```
    /// # use parser::{Method, Version};
    /// # use parser::h1::{ParseError, Status};
    /// # use parser::h1::request::H1Request;
    /// # fn main() -> Result<(), ParseError> {
    /// let mut req = H1Request::new();
    /// let status = req.parse(b"GET / HTTP/1.1\r\nHost: example.org\r\n\r\n")?;
    /// assert!(matches!(status, Status::Complete(_)));
    /// assert_eq!(Some(Method::Get), req.method);
    /// assert_eq!(Some("/"), req.target);
    /// assert_eq!(Some(Version::H1_1), req.version);
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(&mut self, buf: &'buf [u8]) -> ParseResult<Status<usize>> {
        self.reset();
        let mut req = RawRequest::new(buf);

        // A request line starting with `/` carries no method token at all —
        // an HTTP/0.9-style simple request with an implied GET (RFC 9112
        // appendix-cited convention, also honored by most servers).
        if req.peek() == Some(b'/') {
            return match self.set_implied_get_target(&mut req)? {
                Some(()) => Ok(Status::Complete(buf.len() - req.as_ref().len())),
                None => Ok(Status::Partial),
            };
        }

        if self.set_method(&mut req)?.is_none() {
            return Ok(Status::Partial);
        }
        if self.set_target(&mut req)?.is_none() {
            return Ok(Status::Partial);
        }
        if self.set_version(&mut req)?.is_none() {
            return Ok(Status::Partial);
        }

        if !self.simple_request {
            loop {
                match self.parse_header(&mut req)? {
                    Some(true) => continue,
                    Some(false) => break,
                    None => return Ok(Status::Partial),
                }
            }
        }

        Ok(Status::Complete(buf.len() - req.as_ref().len()))
    }

    fn set_method(&mut self, buf: &mut RawRequest<'buf>) -> ParseResult<Option<()>> {
        loop {
            match buf.next() {
                Some(&b' ') => {
                    let slice = buf.slice_skip(1).map_err(|_| ParseError::Method)?;
                    self.method = Some(Method::try_from(slice)?);
                    return Ok(Some(()));
                }
                Some(&b) if super::tokens::is_method_token(b) => {}
                Some(_) => return Err(ParseError::Method),
                None => return Ok(None),
            }
        }
    }

    /// Parses a bare-path request line (`/path\r\n`, no method token) as a
    /// simple request with an implied `GET` and no headers.
    fn set_implied_get_target(&mut self, buf: &mut RawRequest<'buf>) -> ParseResult<Option<()>> {
        loop {
            match buf.peek() {
                Some(b'\r') | Some(b'\n') => break,
                Some(b) if is_request_target_token(b) => {
                    buf.next();
                }
                Some(_) => return Err(ParseError::Target),
                None => return Ok(None),
            }
        }

        let slice = buf.slice();
        // SAFETY: every byte accepted by is_request_target_token is < 0x80.
        self.target = Some(unsafe { from_utf8_unchecked(slice) });
        self.method = Some(Method::Get);
        self.version = Some(Version::H1_0);
        self.simple_request = true;

        match discard_newline(buf) {
            Ok(()) => Ok(Some(())),
            Err(ParseError::NewLine) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_target(&mut self, buf: &mut RawRequest<'buf>) -> ParseResult<Option<()>> {
        loop {
            match buf.next() {
                Some(&b' ') => {
                    let slice = buf.slice_skip(1).map_err(|_| ParseError::Target)?;
                    // SAFETY: every byte accepted by is_request_target_token is < 0x80.
                    self.target = Some(unsafe { from_utf8_unchecked(slice) });
                    return Ok(Some(()));
                }
                Some(&b) if is_request_target_token(b) => {}
                Some(_) => return Err(ParseError::Target),
                None => return Ok(None),
            }
        }
    }

    fn set_version(&mut self, buf: &mut RawRequest<'buf>) -> ParseResult<Option<()>> {
        match buf.peek() {
            None => return Ok(None),
            Some(b'\r') | Some(b'\n') => {
                // HTTP/0.9-style simple request: method and target only.
                self.version = Some(Version::H1_0);
                self.simple_request = true;
                return match discard_newline(buf) {
                    Ok(()) => Ok(Some(())),
                    Err(ParseError::NewLine) => Ok(None),
                    Err(e) => Err(e),
                };
            }
            _ => {}
        }

        loop {
            match buf.peek() {
                Some(b'\r') | Some(b'\n') => break,
                Some(_) => {
                    buf.next();
                }
                None => return Ok(None),
            }
        }

        let slice = buf.slice();
        self.version = Some(Version::try_from(slice)?);

        match discard_newline(buf) {
            Ok(()) => Ok(Some(())),
            Err(ParseError::NewLine) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn parse_header(&mut self, buf: &mut RawRequest<'buf>) -> ParseResult<Option<bool>> {
        match buf.peek() {
            None => return Ok(None),
            Some(b'\r') | Some(b'\n') => {
                return match discard_newline(buf) {
                    Ok(()) => Ok(Some(false)),
                    Err(ParseError::NewLine) => Ok(None),
                    Err(e) => Err(e),
                };
            }
            _ => {}
        }

        loop {
            match buf.next() {
                Some(&b':') => break,
                Some(&b) if is_header_name_token(b) => {}
                Some(_) => return Err(ParseError::HeaderName),
                None => return Ok(None),
            }
        }
        let name = buf.slice_skip(1).map_err(|_| ParseError::HeaderName)?;
        // SAFETY: every byte accepted by is_header_name_token is < 0x80.
        let name = unsafe { from_utf8_unchecked(name) };

        discard_whitespace(buf);

        loop {
            match buf.peek() {
                Some(b'\r') | Some(b'\n') => break,
                Some(b) if is_header_value_token(b) => {
                    buf.next();
                }
                Some(_) => return Err(ParseError::HeaderValue),
                None => return Ok(None),
            }
        }

        let mut value = buf.slice();
        while let Some((&last, rest)) = value.split_last() {
            if last == b' ' || last == b'\t' {
                value = rest;
            } else {
                break;
            }
        }

        match discard_newline(buf) {
            Ok(()) => {}
            Err(ParseError::NewLine) => return Ok(None),
            Err(e) => return Err(e),
        }

        if self.headers.len() >= MAX_HEADERS {
            return Err(ParseError::TooManyHeaders);
        }
        self.headers.push(Header { name, value });
        Ok(Some(true))
    }

    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&'buf [u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value)
    }

    /// The request's declared body length, per `Content-Length`.
    ///
    /// Per framing precedence (spec §6), callers must check
    /// [`is_chunked`](Self::is_chunked) first — a `Transfer-Encoding:
    /// chunked` header wins over any `Content-Length` present alongside it.
    pub fn content_length(&self) -> ParseResult<Option<u64>> {
        match self.header("content-length") {
            None => Ok(None),
            Some(v) => std::str::from_utf8(v)
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Some)
                .ok_or(ParseError::InvalidContentLength),
        }
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

    /// Whether the connection should persist after this request/response
    /// exchange, applying HTTP/1.1's keep-alive-by-default and HTTP/1.0's
    /// close-by-default rules, both overridable by an explicit
    /// `Connection` header.
    pub fn keep_alive(&self) -> bool {
        if self.simple_request {
            return false;
        }

        match self.header("connection").and_then(|v| std::str::from_utf8(v).ok()) {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => matches!(self.version, Some(Version::H1_1)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let mut req = H1Request::new();
        let input: &[u8] = b"GET / HTTP/1.1\r\nHost: example.org\r\n\r\n";
        let status = req.parse(input).unwrap();
        assert_eq!(Status::Complete(input.len()), status);
        assert_eq!(Some(Method::Get), req.method);
        assert_eq!(Some("/"), req.target);
        assert_eq!(Some(Version::H1_1), req.version);
        assert_eq!(Some(b"example.org" as &[u8]), req.header("host"));
    }

    #[test]
    fn reports_partial_on_truncated_request_line() {
        let mut req = H1Request::new();
        assert_eq!(Ok(Status::Partial), req.parse(b"GET / HTTP/1."));
    }

    #[test]
    fn reports_partial_on_truncated_headers() {
        let mut req = H1Request::new();
        assert_eq!(
            Ok(Status::Partial),
            req.parse(b"GET / HTTP/1.1\r\nHost: example.org\r\n")
        );
    }

    #[test]
    fn rejects_invalid_method_byte() {
        let mut req = H1Request::new();
        assert_eq!(Err(ParseError::Method), req.parse(b"G;T / HTTP/1.1\r\n\r\n"));
    }

    #[test]
    fn parses_http_0_9_style_simple_request() {
        let mut req = H1Request::new();
        let status = req.parse(b"GET /index.html\r\n").unwrap();
        assert!(matches!(status, Status::Complete(_)));
        assert!(req.simple_request);
        assert_eq!(Some(Method::Get), req.method);
        assert!(req.headers.is_empty());
        assert!(!req.keep_alive());
    }

    #[test]
    fn parses_bare_path_request_line_as_implied_get() {
        let mut req = H1Request::new();
        let status = req.parse(b"/index.html\r\n").unwrap();
        assert!(matches!(status, Status::Complete(_)));
        assert!(req.simple_request);
        assert_eq!(Some(Method::Get), req.method);
        assert_eq!(Some("/index.html"), req.target);
        assert_eq!(Some(Version::H1_0), req.version);
        assert!(req.headers.is_empty());
        assert!(!req.keep_alive());
    }

    #[test]
    fn chunked_transfer_encoding_is_detected() {
        let mut req = H1Request::new();
        req.parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n")
            .unwrap();
        assert!(req.is_chunked());
    }

    #[test]
    fn content_length_parses_as_u64() {
        let mut req = H1Request::new();
        req.parse(b"POST / HTTP/1.1\r\nContent-Length: 42\r\n\r\n")
            .unwrap();
        assert_eq!(Ok(Some(42)), req.content_length());
    }

    #[test]
    fn invalid_content_length_is_rejected() {
        let mut req = H1Request::new();
        req.parse(b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n")
            .unwrap();
        assert_eq!(Err(ParseError::InvalidContentLength), req.content_length());
    }

    #[test]
    fn connection_close_overrides_http_1_1_default() {
        let mut req = H1Request::new();
        req.parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
            .unwrap();
        assert!(!req.keep_alive());
    }

    #[test]
    fn http_1_0_defaults_to_close_without_keep_alive_header() {
        let mut req = H1Request::new();
        req.parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.keep_alive());
    }

    #[test]
    fn http_1_0_honors_explicit_keep_alive() {
        let mut req = H1Request::new();
        req.parse(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();
        assert!(req.keep_alive());
    }
}

#[cfg(test)]
mod proptest_suite {
    use super::*;
    use proptest::prelude::*;

    fn method_str() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just("GET"),
            Just("HEAD"),
            Just("POST"),
            Just("PUT"),
            Just("DELETE"),
            Just("CONNECT"),
            Just("OPTIONS"),
            Just("TRACE"),
        ]
    }

    fn token() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9-]{0,15}"
    }

    fn header_value() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 ]{0,31}".prop_map(|s| s.trim().to_string())
    }

    proptest! {
        /// A request line plus headers built from a safe alphabet always
        /// parses as `Complete`, with every field equal to what was written,
        /// whatever valid combination of method/target/headers/version is
        /// generated.
        #[test]
        fn well_formed_request_round_trips(
            method in method_str(),
            target in token().prop_map(|t| format!("/{t}")),
            use_http_1_1 in any::<bool>(),
            headers in proptest::collection::vec((token(), header_value()), 0..8),
        ) {
            let version_str = if use_http_1_1 { "HTTP/1.1" } else { "HTTP/1.0" };
            let mut wire = format!("{method} {target} {version_str}\r\n");
            for (name, value) in &headers {
                wire.push_str(&format!("{name}: {value}\r\n"));
            }
            wire.push_str("\r\n");

            let mut req = H1Request::new();
            let status = req.parse(wire.as_bytes()).unwrap();

            prop_assert_eq!(Status::Complete(wire.len()), status);
            prop_assert_eq!(Method::try_from(method.as_bytes()).unwrap(), req.method.unwrap());
            prop_assert_eq!(target.as_str(), req.target.unwrap());
            prop_assert_eq!(
                if use_http_1_1 { Version::H1_1 } else { Version::H1_0 },
                req.version.unwrap()
            );
            prop_assert_eq!(headers.len(), req.headers.len());
            for ((name, value), header) in headers.iter().zip(req.headers.iter()) {
                prop_assert!(name.eq_ignore_ascii_case(header.name));
                prop_assert_eq!(value.as_bytes(), header.value);
            }
        }
    }
}
