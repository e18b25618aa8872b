//! Protocol versions and their duplex capability.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wire protocol version an exchange runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "1.0")]
    Http10,
    #[serde(rename = "1.1")]
    Http11,
    #[serde(rename = "2")]
    Http2,
}

impl ProtocolVersion {
    /// Whether request and response streams can progress independently.
    ///
    /// HTTP/1.0 has neither persistent connections nor chunked request
    /// bodies, so a streamed request cannot overlap a streamed response.
    pub fn supports_independent_streams(self) -> bool {
        !matches!(self, ProtocolVersion::Http10)
    }

    /// Whether exchanges on this version are full duplex without opting in.
    ///
    /// HTTP/2 streams are always bidirectional; HTTP/1.1 receivers must
    /// enable duplex mode explicitly.
    pub fn duplex_by_default(self) -> bool {
        matches!(self, ProtocolVersion::Http2)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Http10 => f.write_str("HTTP/1.0"),
            ProtocolVersion::Http11 => f.write_str("HTTP/1.1"),
            ProtocolVersion::Http2 => f.write_str("HTTP/2"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = match trimmed.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("http/") => &trimmed[5..],
            _ => trimmed,
        };
        match bare {
            "1.0" => Ok(ProtocolVersion::Http10),
            "1.1" => Ok(ProtocolVersion::Http11),
            "2" | "2.0" => Ok(ProtocolVersion::Http2),
            _ => Err(format!("unknown protocol version: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http10_lacks_independent_streams() {
        assert!(!ProtocolVersion::Http10.supports_independent_streams());
        assert!(ProtocolVersion::Http11.supports_independent_streams());
        assert!(ProtocolVersion::Http2.supports_independent_streams());
    }

    #[test]
    fn only_http2_is_duplex_by_default() {
        assert!(!ProtocolVersion::Http10.duplex_by_default());
        assert!(!ProtocolVersion::Http11.duplex_by_default());
        assert!(ProtocolVersion::Http2.duplex_by_default());
    }

    #[test]
    fn parse_accepts_bare_and_prefixed_forms() {
        assert_eq!("1.1".parse(), Ok(ProtocolVersion::Http11));
        assert_eq!("HTTP/1.0".parse(), Ok(ProtocolVersion::Http10));
        assert_eq!("http/2".parse(), Ok(ProtocolVersion::Http2));
        assert_eq!(" 2.0 ".parse(), Ok(ProtocolVersion::Http2));
        assert!("3".parse::<ProtocolVersion>().is_err());
        assert!("".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for version in [
            ProtocolVersion::Http10,
            ProtocolVersion::Http11,
            ProtocolVersion::Http2,
        ] {
            assert_eq!(version.to_string().parse(), Ok(version));
        }
    }

    #[test]
    fn serde_uses_short_names() {
        let json = serde_json::to_string(&ProtocolVersion::Http11).unwrap();
        assert_eq!(json, "\"1.1\"");
        let parsed: ProtocolVersion = serde_json::from_str("\"2\"").unwrap();
        assert_eq!(parsed, ProtocolVersion::Http2);
    }
}
