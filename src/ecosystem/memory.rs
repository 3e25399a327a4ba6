use crate::error::{ResizerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Memory ceiling in bytes, written as `"500M"`, `"1G"`, `"512K"` or a plain
/// byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawMemorySize", into = "String")]
pub struct MemorySize(u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMemorySize {
    Bytes(u64),
    Text(String),
}

impl MemorySize {
    pub fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    /// Parse a size string: digits followed by an optional `K`, `M` or `G`
    /// unit and an optional trailing `B`. Units are binary multiples.
    pub fn parse(s: &str) -> Result<Self> {
        let upper = s.trim().to_uppercase();
        let trimmed = upper.strip_suffix('B').unwrap_or(&upper);

        let (num_str, multiplier) = if let Some(n) = trimmed.strip_suffix('G') {
            (n, GIB)
        } else if let Some(n) = trimmed.strip_suffix('M') {
            (n, MIB)
        } else if let Some(n) = trimmed.strip_suffix('K') {
            (n, KIB)
        } else {
            (trimmed, 1)
        };

        if num_str.is_empty() || !num_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ResizerError::InvalidMemorySize(s.to_string()));
        }

        let num: u64 = num_str
            .parse()
            .map_err(|_| ResizerError::InvalidMemorySize(s.to_string()))?;

        num.checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| ResizerError::InvalidMemorySize(format!("{} (overflow)", s)))
    }
}

impl FromStr for MemorySize {
    type Err = ResizerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<RawMemorySize> for MemorySize {
    type Error = ResizerError;

    fn try_from(raw: RawMemorySize) -> Result<Self> {
        match raw {
            RawMemorySize::Bytes(bytes) => Ok(Self(bytes)),
            RawMemorySize::Text(text) => Self::parse(&text),
        }
    }
}

impl From<MemorySize> for String {
    fn from(size: MemorySize) -> Self {
        size.to_string()
    }
}

impl fmt::Display for MemorySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes != 0 && bytes % GIB == 0 {
            write!(f, "{}G", bytes / GIB)
        } else if bytes != 0 && bytes % MIB == 0 {
            write!(f, "{}M", bytes / MIB)
        } else if bytes != 0 && bytes % KIB == 0 {
            write!(f, "{}K", bytes / KIB)
        } else {
            write!(f, "{}", bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(MemorySize::parse("500M").unwrap().bytes(), 500 * MIB);
        assert_eq!(MemorySize::parse("1G").unwrap().bytes(), GIB);
        assert_eq!(MemorySize::parse("64k").unwrap().bytes(), 64 * KIB);
        assert_eq!(MemorySize::parse("256MB").unwrap().bytes(), 256 * MIB);
        assert_eq!(MemorySize::parse("4096").unwrap().bytes(), 4096);
        assert_eq!(MemorySize::parse("4096B").unwrap().bytes(), 4096);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "M", "500X", "-5M", "5.5M", "five hundred", "500 M"] {
            assert!(
                matches!(MemorySize::parse(bad), Err(ResizerError::InvalidMemorySize(_))),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_parse_overflow() {
        assert!(MemorySize::parse("99999999999999G").is_err());
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(MemorySize::parse("500M").unwrap().to_string(), "500M");
        assert_eq!(MemorySize::parse("1024M").unwrap().to_string(), "1G");
        assert_eq!(MemorySize::from_bytes(1000).to_string(), "1000");
    }

    #[test]
    fn test_deserialize_string_or_integer() {
        #[derive(Deserialize)]
        struct Holder {
            limit: MemorySize,
        }

        let from_text: Holder = serde_json::from_str(r#"{"limit": "500M"}"#).unwrap();
        assert_eq!(from_text.limit.bytes(), 500 * MIB);

        let from_int: Holder = serde_json::from_str(r#"{"limit": 2048}"#).unwrap();
        assert_eq!(from_int.limit.bytes(), 2048);

        assert!(serde_json::from_str::<Holder>(r#"{"limit": "lots"}"#).is_err());
    }
}
