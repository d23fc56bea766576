//! Destination URI
//!
//! The scheme selects the transport implementation; everything after it is
//! interpreted by that transport.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Parsed destination address, e.g. `tcp://10.0.0.5:7070` or `log://audit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uri {
    raw: String,
    scheme: String,
}

impl Uri {
    /// Parse a URI, requiring a non-empty scheme.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::missing_field("uri"));
        }
        let scheme = match raw.split_once(':') {
            Some((scheme, _)) if !scheme.is_empty() => scheme,
            _ => {
                return Err(ValidationError::invalid_field(
                    "uri",
                    format!("'{raw}' has no scheme"),
                ))
            }
        };
        if !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        {
            return Err(ValidationError::invalid_field(
                "uri",
                format!("'{scheme}' is not a valid scheme"),
            ));
        }
        Ok(Self {
            raw: raw.to_string(),
            scheme: scheme.to_ascii_lowercase(),
        })
    }

    /// Full URI as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Lowercased scheme
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Transport-specific remainder, with the `scheme://` or `scheme:`
    /// prefix stripped (e.g. `10.0.0.5:7070` for `tcp://10.0.0.5:7070`)
    pub fn target(&self) -> &str {
        let rest = &self.raw[self.scheme.len() + 1..];
        rest.strip_prefix("//").unwrap_or(rest)
    }

    /// URI extended by a sub-destination path
    pub fn join(&self, path: &str) -> String {
        let base = self.raw.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for Uri {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Uri> for String {
    fn from(uri: Uri) -> Self {
        uri.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scheme_and_target() {
        let uri = Uri::parse("tcp://127.0.0.1:7070").unwrap();
        assert_eq!(uri.scheme(), "tcp");
        assert_eq!(uri.target(), "127.0.0.1:7070");
    }

    #[test]
    fn test_scheme_is_lowercased() {
        let uri = Uri::parse("TCP://host:1").unwrap();
        assert_eq!(uri.scheme(), "tcp");
        assert_eq!(uri.as_str(), "TCP://host:1");
    }

    #[test]
    fn test_missing_scheme_rejected() {
        assert!(matches!(
            Uri::parse("no-scheme-here"),
            Err(ValidationError::InvalidField { .. })
        ));
        assert!(matches!(
            Uri::parse("   "),
            Err(ValidationError::MissingField { .. })
        ));
    }

    #[test]
    fn test_join_normalizes_slashes() {
        let uri = Uri::parse("mock://x/").unwrap();
        assert_eq!(uri.join("/y"), "mock://x/y");
        assert_eq!(uri.join("y"), "mock://x/y");
    }
}
