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

//! Representation of the requested HTTP version

use std::fmt::Display;

use crate::h1::ParseError;

/// Representation of the requested HTTP version.
///
/// H2 and H3 are recognized during the request line so that a session can
/// reject them with `UnsupportedVersion` rather than attempt to parse an
/// HTTP/1 head out of a different wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// HTTP/1.0
    H1_0,
    /// HTTP/1.1
    H1_1,
    /// HTTP/2
    H2,
    /// HTTP/3
    H3,
}

impl Version {
    /// Whether this core's request/stream machinery can drive the version.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::H1_0 | Self::H1_1)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::H1_0 => "HTTP/1.0",
            Self::H1_1 => "HTTP/1.1",
            Self::H2 => "HTTP/2",
            Self::H3 => "HTTP/3",
        })
    }
}

impl TryFrom<&[u8]> for Version {
    type Error = ParseError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value {
            b"HTTP/1.0" => Ok(Self::H1_0),
            b"HTTP/1.1" => Ok(Self::H1_1),
            b"HTTP/2" | b"HTTP/2.0" => Ok(Self::H2),
            b"HTTP/3" | b"HTTP/3.0" => Ok(Self::H3),
            _ => Err(ParseError::Version),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Version;

    #[test]
    fn try_from_parses_http_1x() {
        assert_eq!(Ok(Version::H1_0), Version::try_from(b"HTTP/1.0" as &[u8]));
        assert_eq!(Ok(Version::H1_1), Version::try_from(b"HTTP/1.1" as &[u8]));
    }

    #[test]
    fn unsupported_versions_are_recognized_but_flagged() {
        let h2 = Version::try_from(b"HTTP/2" as &[u8]).unwrap();
        assert_eq!(Version::H2, h2);
        assert!(!h2.is_supported());
        assert!(Version::H1_1.is_supported());
    }

    #[test]
    fn try_from_rejects_garbage() {
        assert!(Version::try_from(b"HTTP/0.9" as &[u8]).is_err());
    }
}
