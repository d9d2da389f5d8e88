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

//! `Set-Cookie` serialization (RFC 6265 Section 4.1).
//!
//! Each [`SetCookie`] renders as one `Set-Cookie` header field; emitting
//! several cookies means pushing several separate header lines, not
//! folding them onto one (RFC 6265 forbids combining `Set-Cookie` values
//! with a comma the way other header fields allow).

use std::io::{self, Write};

/// `SameSite` attribute value. `Lax` is the default and, matching most
/// browsers' own default, is not written out explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    /// Cookie withheld on cross-site requests entirely.
    Strict,
    /// Default: cookie sent on top-level navigations, withheld otherwise.
    Lax,
    /// Cookie sent on all requests, including cross-site (requires `Secure`).
    None,
}

/// A single `Set-Cookie` response header under construction.
#[derive(Debug, Clone)]
pub struct SetCookie<'a> {
    name: &'a str,
    value: &'a str,
    domain: Option<&'a str>,
    path: Option<&'a str>,
    secure: bool,
    http_only: bool,
    same_site: SameSite,
}

impl<'a> SetCookie<'a> {
    /// Starts a cookie with no attributes set beyond the default
    /// `SameSite=Lax`.
    pub fn new(name: &'a str, value: &'a str) -> Self {
        SetCookie {
            name,
            value,
            domain: None,
            path: None,
            secure: false,
            http_only: false,
            same_site: SameSite::Lax,
        }
    }

    /// Sets the `Domain` attribute.
    pub fn domain(mut self, domain: &'a str) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Sets the `Path` attribute.
    pub fn path(mut self, path: &'a str) -> Self {
        self.path = Some(path);
        self
    }

    /// Marks the cookie `Secure`.
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Marks the cookie `HttpOnly`.
    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    /// Overrides the default `SameSite=Lax`.
    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// Writes this cookie's `Set-Cookie` header *value* (not including the
    /// `Set-Cookie:` field name) to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write!(w, "{}={}", self.name, self.value)?;
        if let Some(domain) = self.domain {
            write!(w, "; Domain={domain}")?;
        }
        if let Some(path) = self.path {
            write!(w, "; Path={path}")?;
        }
        if self.secure {
            write!(w, "; Secure")?;
        }
        if self.http_only {
            write!(w, "; HttpOnly")?;
        }
        match self.same_site {
            SameSite::Lax => {}
            SameSite::Strict => write!(w, "; SameSite=Strict")?,
            SameSite::None => write!(w, "; SameSite=None")?,
        }
        Ok(())
    }

    /// Convenience wrapper around [`write_to`](Self::write_to) that
    /// allocates the header value directly.
    pub fn to_header_value(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out).expect("write to Vec<u8> cannot fail");
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn minimal_cookie_omits_default_same_site() {
        let cookie = SetCookie::new("session", "abc123");
        assert_eq!(b"session=abc123" as &[u8], cookie.to_header_value().as_slice());
    }

    #[test]
    fn full_cookie_emits_all_attributes_in_order() {
        let cookie = SetCookie::new("session", "abc123")
            .domain("example.org")
            .path("/")
            .secure()
            .http_only()
            .same_site(SameSite::Strict);

        assert_eq!(
            b"session=abc123; Domain=example.org; Path=/; Secure; HttpOnly; SameSite=Strict" as &[u8],
            cookie.to_header_value().as_slice()
        );
    }

    #[test]
    fn same_site_none_is_written_explicitly() {
        let cookie = SetCookie::new("a", "b").same_site(SameSite::None);
        assert_eq!(b"a=b; SameSite=None" as &[u8], cookie.to_header_value().as_slice());
    }
}
