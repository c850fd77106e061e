use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Store-wide monotonic mutation token.
///
/// Every mutation of any object in a store is stamped with a fresh
/// `ResourceVersion` strictly greater than all previously issued ones. On the
/// wire and on disk it is an opaque decimal string; the empty string and `"0"`
/// both denote the zero/unset sentinel.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceVersion(u64);

impl ResourceVersion {
    /// The zero/unset sentinel.
    pub const ZERO: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Parse the string encoding. Empty input yields [`ResourceVersion::ZERO`].
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::ZERO);
        }
        if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TypeError::InvalidResourceVersion(s.to_string()));
        }
        trimmed
            .parse::<u64>()
            .map(Self)
            .map_err(|_| TypeError::InvalidResourceVersion(s.to_string()))
    }
}

impl fmt::Debug for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rv({})", self.0)
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceVersion {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for ResourceVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for ResourceVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_zero() {
            serializer.serialize_str("")
        } else {
            serializer.collect_str(self)
        }
    }
}

impl<'de> Deserialize<'de> for ResourceVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_and_zero_are_the_sentinel() {
        assert_eq!(ResourceVersion::parse("").unwrap(), ResourceVersion::ZERO);
        assert_eq!(ResourceVersion::parse("0").unwrap(), ResourceVersion::ZERO);
        assert!(ResourceVersion::ZERO.is_zero());
    }

    #[test]
    fn rejects_non_decimal() {
        assert!(ResourceVersion::parse("abc").is_err());
        assert!(ResourceVersion::parse("-5").is_err());
        assert!(ResourceVersion::parse("1e3").is_err());
        assert!(ResourceVersion::parse("99999999999999999999999").is_err());
    }

    #[test]
    fn display_is_decimal() {
        assert_eq!(ResourceVersion::new(105).to_string(), "105");
        assert_eq!(format!("{:?}", ResourceVersion::new(7)), "rv(7)");
    }

    #[test]
    fn serde_uses_string_encoding() {
        let json = serde_json::to_string(&ResourceVersion::new(42)).unwrap();
        assert_eq!(json, "\"42\"");
        let zero = serde_json::to_string(&ResourceVersion::ZERO).unwrap();
        assert_eq!(zero, "\"\"");
        let parsed: ResourceVersion = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(parsed, ResourceVersion::new(42));
    }

    proptest! {
        #[test]
        fn string_order_matches_numeric_order(a in 1u64.., b in 1u64..) {
            let ra = ResourceVersion::parse(&a.to_string()).unwrap();
            let rb = ResourceVersion::parse(&b.to_string()).unwrap();
            prop_assert_eq!(ra.cmp(&rb), a.cmp(&b));
        }
    }
}
