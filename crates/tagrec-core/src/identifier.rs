//! Tag identifiers and their canonical form
//!
//! Every comparison and every storage key uses the canonical form: a
//! whitespace-trimmed, upper-cased string. Raw tag bytes are rendered as two
//! uppercase hex digits per byte before that.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A tag identifier in canonical form.
///
/// Can only be built through normalization, so two values are equal iff
/// their canonical forms are equal. Deserialization normalizes as well.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(raw: &str) -> Self {
        normalize_str(raw)
    }
}

impl From<String> for Identifier {
    fn from(raw: String) -> Self {
        normalize_str(&raw)
    }
}

/// Payload of one tag detection event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawIdentifier {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<&str> for RawIdentifier {
    fn from(raw: &str) -> Self {
        RawIdentifier::Text(raw.to_string())
    }
}

impl From<String> for RawIdentifier {
    fn from(raw: String) -> Self {
        RawIdentifier::Text(raw)
    }
}

impl From<Vec<u8>> for RawIdentifier {
    fn from(raw: Vec<u8>) -> Self {
        RawIdentifier::Bytes(raw)
    }
}

impl From<&[u8]> for RawIdentifier {
    fn from(raw: &[u8]) -> Self {
        RawIdentifier::Bytes(raw.to_vec())
    }
}

/// Normalize any raw identifier to its canonical form
pub fn normalize(raw: &RawIdentifier) -> Identifier {
    match raw {
        RawIdentifier::Text(text) => normalize_str(text),
        RawIdentifier::Bytes(bytes) => normalize_bytes(bytes),
    }
}

/// Trim surrounding whitespace and upper-case
pub fn normalize_str(raw: &str) -> Identifier {
    Identifier(raw.trim().to_uppercase())
}

/// Render each byte as two uppercase hex digits, in input order
pub fn normalize_bytes(raw: &[u8]) -> Identifier {
    Identifier(hex::encode_upper(raw))
}

/// Key of the remote record holding the expected identifiers (a receipt ID).
///
/// Always trimmed, never blank and never a `.` or `..` path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    /// Returns `None` for a blank key or a dot segment
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_case_and_whitespace_insensitive() {
        assert_eq!(normalize_str(" ab12 "), normalize_str("AB12"));
        assert_eq!(normalize_str("\t0a1b2c\n").as_str(), "0A1B2C");
    }

    #[test]
    fn test_bytes_render_as_uppercase_hex() {
        assert_eq!(normalize_bytes(&[0x0A]).as_str(), "0A");
        assert_eq!(normalize_bytes(&[0x04, 0xA2, 0xFF, 0x00]).as_str(), "04A2FF00");
        assert_eq!(normalize_bytes(&[]).as_str(), "");
    }

    #[test]
    fn test_bytes_and_text_agree() {
        let from_tag = normalize(&RawIdentifier::from(vec![0x0A, 0x1B, 0x2C]));
        let from_record = normalize(&RawIdentifier::from(" 0a1b2c"));
        assert_eq!(from_tag, from_record);
    }

    #[test]
    fn test_record_key_rejects_blank() {
        assert!(RecordKey::parse("").is_none());
        assert!(RecordKey::parse("   ").is_none());
        assert_eq!(RecordKey::parse(" R1 ").unwrap().as_str(), "R1");
    }

    #[test]
    fn test_record_key_rejects_dot_segments() {
        assert!(RecordKey::parse(".").is_none());
        assert!(RecordKey::parse(" .. ").is_none());
        assert_eq!(RecordKey::parse("...").unwrap().as_str(), "...");
        assert_eq!(RecordKey::parse("R.1").unwrap().as_str(), "R.1");
    }

    #[test]
    fn test_deserialize_normalizes() {
        let id: Identifier = serde_json::from_str("\" ab \"").unwrap();
        assert_eq!(id, Identifier::from("AB"));
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"AB\"");
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(raw in any::<String>()) {
            let once = normalize_str(&raw);
            let twice = normalize_str(once.as_str());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_bytes_normalize_is_idempotent(raw in proptest::collection::vec(any::<u8>(), 0..16)) {
            let once = normalize_bytes(&raw);
            prop_assert_eq!(normalize_str(once.as_str()), once.clone());
            prop_assert_eq!(once.as_str().len(), raw.len() * 2);
        }

        #[test]
        fn prop_surrounding_whitespace_ignored(core in "[0-9a-fA-F]{1,12}", pad in "[ \t\r\n]{0,4}") {
            let padded = format!("{pad}{core}{pad}");
            prop_assert_eq!(normalize_str(&padded), normalize_str(&core.to_uppercase()));
        }
    }
}
