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

//! H1 parser implementation

use core::fmt::Display;

use crate::raw_request::RawRequest;

pub mod chunked;
pub mod cookie;
pub mod request;
pub mod response;
pub mod tokens;

/// Represents possible failures while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Invalid byte in method.
    Method,
    /// Invalid byte in target.
    Target,
    /// Invalid or unsupported HTTP version.
    Version,
    /// Invalid byte in header name.
    HeaderName,
    /// Invalid byte in header value.
    HeaderValue,
    /// Invalid or missing new line.
    NewLine,
    /// Invalid whitespace.
    Whitespace,
    /// More headers were present than the caller's header slice could hold.
    TooManyHeaders,
    /// `Content-Length` header value did not parse as a non-negative integer.
    InvalidContentLength,
    /// Chunk size line was not a valid hexadecimal length.
    InvalidChunkSize,
}

impl ParseError {
    fn description_str(&self) -> &'static str {
        match *self {
            ParseError::Method => "invalid token in method",
            ParseError::Target => "invalid token in target",
            ParseError::Version => "invalid or unsupported version",
            ParseError::HeaderName => "invalid token in header name",
            ParseError::HeaderValue => "invalid token in header value",
            ParseError::NewLine => "invalid or missing new line",
            ParseError::Whitespace => "invalid whitespace",
            ParseError::TooManyHeaders => "too many headers",
            ParseError::InvalidContentLength => "invalid content-length",
            ParseError::InvalidChunkSize => "invalid chunk size",
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description_str())
    }
}

impl std::error::Error for ParseError {}

/// Result whose Err variant is `ParseError`
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Outcome of an incremental parse: either the caller's buffer held a
/// complete unit and `T` describes how much of it was consumed, or more
/// bytes must arrive before progress can be made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status<T> {
    /// Parsing completed; `T` carries the parsed value (and typically how
    /// many bytes of input it consumed).
    Complete(T),
    /// Not enough bytes were available to complete this unit.
    Partial,
}

/// Consumes whitespace characters from `buf`.
/// Whitespace is defined by RFC 9110 Secion 5.6.3 by ABNF
/// ```abnf
/// OWS = *( SP / HTAB )
/// ```
#[inline]
pub fn discard_whitespace(buf: &mut RawRequest<'_>) {
    buf.take_until(|b| b != b' ' && b != b'\t');
}

/// Consumes whitespace characters from `buf`. Requires that at least one whitespace character is
/// encountered.
/// Whitespace is defined by RFC 9110 Secion 5.6.3 by ABNF
/// ```abnf
/// RWS = 1*( SP / HTAB )
/// ```
#[inline]
pub fn discard_required_whitespace(buf: &mut RawRequest<'_>) -> ParseResult<()> {
    let pos = buf.pos();

    buf.take_until(|b| b != b' ' && b != b'\t');
    if pos == buf.pos() {
        return Err(ParseError::Whitespace);
    }

    Ok(())
}

/// Consumes `buf` to the end of a new-line character sequence `b"\r\n"`, or
/// a lone `b"\n"` (accepted leniently, as most HTTP/1.1 implementations do).
#[inline]
pub fn discard_newline(buf: &mut RawRequest<'_>) -> ParseResult<()> {
    loop {
        match buf.next() {
            Some(&b'\n') => {
                buf.slice();
                return Ok(());
            }
            Some(&b'\r') => {
                if buf.peek() == Some(b'\n') {
                    buf.next();
                    buf.slice();
                    return Ok(());
                }
            }
            Some(_) => {}
            None => return Err(ParseError::NewLine),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn discard_newline_accepts_crlf() {
        let mut buf = RawRequest::new(b"\r\nrest");
        assert!(discard_newline(&mut buf).is_ok());
        assert_eq!(b"rest", buf.as_ref());
    }

    #[test]
    fn discard_newline_errors_without_terminator() {
        let mut buf = RawRequest::new(b"no newline here");
        assert_eq!(Err(ParseError::NewLine), discard_newline(&mut buf));
    }
}
