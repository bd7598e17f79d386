//! HLC timestamp values and their wire format.
//!
//! The wire format is `<physicalTime>:<counter>:<nodeId>`. The counter is
//! written zero-padded to five digits so that encoded timestamps sharing a
//! physical time sort lexicographically in the same order as the values
//! themselves. Parsing accepts any valid integer width.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::node_id::NodeId;

/// Largest logical counter value before the clock borrows a millisecond.
pub const MAX_COUNTER: u16 = u16::MAX;

/// Errors raised when an encoded timestamp is malformed.
///
/// These are fatal: a timestamp that fails to parse is corrupt and must not
/// be retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HlcParseError {
    #[error("Invalid HLC timestamp '{0}': expected <physicalTime>:<counter>:<nodeId>")]
    FieldCount(String),

    #[error("Invalid HLC physical time: '{0}'")]
    PhysicalTime(String),

    #[error("Invalid HLC counter (expected 0-65535): '{0}'")]
    Counter(String),

    #[error("Invalid HLC node ID '{0}': expected exactly 8 characters")]
    NodeId(String),
}

/// A hybrid logical clock timestamp.
///
/// Ordering is lexicographic over `(physical_time, counter, node_id)`, which
/// is exactly the derived ordering given the field declaration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HlcTimestamp {
    physical_time: u64,
    counter: u16,
    node_id: NodeId,
}

impl HlcTimestamp {
    pub fn new(physical_time: u64, counter: u16, node_id: NodeId) -> Self {
        Self {
            physical_time,
            counter,
            node_id,
        }
    }

    /// Milliseconds since the Unix epoch.
    pub fn physical_time(&self) -> u64 {
        self.physical_time
    }

    pub fn counter(&self) -> u16 {
        self.counter
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Three-way comparison; equivalent to `Ord::cmp`.
    pub fn compare(&self, other: &HlcTimestamp) -> Ordering {
        self.cmp(other)
    }

    /// Parses the wire format.
    pub fn parse(s: &str) -> Result<Self, HlcParseError> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != 3 {
            return Err(HlcParseError::FieldCount(s.to_string()));
        }

        let physical_time = parse_digits(fields[0])
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| HlcParseError::PhysicalTime(fields[0].to_string()))?;

        let counter = parse_digits(fields[1])
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|c| *c <= MAX_COUNTER as u32)
            .ok_or_else(|| HlcParseError::Counter(fields[1].to_string()))?;

        let node_id = NodeId::new(fields[2])?;

        Ok(Self {
            physical_time,
            counter: counter as u16,
            node_id,
        })
    }
}

/// Only plain ASCII digits are accepted; `str::parse` would also take a
/// leading `+`.
fn parse_digits(field: &str) -> Option<&str> {
    if !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit()) {
        Some(field)
    } else {
        None
    }
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:05}:{}",
            self.physical_time, self.counter, self.node_id
        )
    }
}

impl FromStr for HlcTimestamp {
    type Err = HlcParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for HlcTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HlcTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(pt: u64, counter: u16, node: &str) -> HlcTimestamp {
        HlcTimestamp::new(pt, counter, NodeId::new(node).unwrap())
    }

    #[test]
    fn test_display_format() {
        let t = ts(1_700_000_000_123, 7, "abc12345");
        assert_eq!(t.to_string(), "1700000000123:00007:abc12345");
    }

    #[test]
    fn test_parse_roundtrip() {
        for t in [
            ts(0, 0, "00000000"),
            ts(1_700_000_000_123, 1, "abc12345"),
            ts(u64::MAX, MAX_COUNTER, "zzzzzzzz"),
        ] {
            let parsed = HlcTimestamp::parse(&t.to_string()).unwrap();
            assert_eq!(parsed, t);
        }
    }

    #[test]
    fn test_parse_accepts_unpadded_counter() {
        let t = HlcTimestamp::parse("1000:3:abc12345").unwrap();
        assert_eq!(t, ts(1000, 3, "abc12345"));
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        assert!(matches!(
            HlcTimestamp::parse("1000:3"),
            Err(HlcParseError::FieldCount(_))
        ));
        assert!(matches!(
            HlcTimestamp::parse("1000:3:abc12345:x"),
            Err(HlcParseError::FieldCount(_))
        ));
        assert!(matches!(
            HlcTimestamp::parse(""),
            Err(HlcParseError::FieldCount(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_physical_time() {
        for bad in ["-1:0:abc12345", "+1:0:abc12345", "x:0:abc12345", ":0:abc12345"] {
            assert!(
                matches!(HlcTimestamp::parse(bad), Err(HlcParseError::PhysicalTime(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_bad_counter() {
        for bad in ["1:65536:abc12345", "1:-1:abc12345", "1:one:abc12345"] {
            assert!(
                matches!(HlcTimestamp::parse(bad), Err(HlcParseError::Counter(_))),
                "{bad}"
            );
        }
        assert!(HlcTimestamp::parse("1:65535:abc12345").is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_node_id() {
        assert!(matches!(
            HlcTimestamp::parse("1:0:abc"),
            Err(HlcParseError::NodeId(_))
        ));
        assert!(matches!(
            HlcTimestamp::parse("1:0:abc123456"),
            Err(HlcParseError::NodeId(_))
        ));
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = ts(100, 5, "bbbbbbbb");
        let b = ts(101, 0, "aaaaaaaa");
        let c = ts(101, 1, "aaaaaaaa");
        let d = ts(101, 1, "bbbbbbbb");

        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
        assert_eq!(a.compare(&d), Ordering::Less);
        assert_eq!(d.compare(&a), Ordering::Greater);
        assert_eq!(c.compare(&c.clone()), Ordering::Equal);
    }

    #[test]
    fn test_compare_is_antisymmetric_and_transitive() {
        let nodes = ["aaaaaaaa", "bbbbbbbb"];
        let mut all = Vec::new();
        for pt in [1u64, 2] {
            for counter in [0u16, 1] {
                for node in nodes {
                    all.push(ts(pt, counter, node));
                }
            }
        }

        for a in &all {
            for b in &all {
                assert_eq!(a.compare(b), b.compare(a).reverse());
                for c in &all {
                    if a.compare(b) == Ordering::Less && b.compare(c) == Ordering::Less {
                        assert_eq!(a.compare(c), Ordering::Less);
                    }
                }
            }
        }
    }

    #[test]
    fn test_encoded_order_matches_value_order() {
        let a = ts(1_700_000_000_000, 9, "abc12345");
        let b = ts(1_700_000_000_000, 10, "abc12345");
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn test_serde_as_string() {
        let t = ts(42, 1, "abc12345");
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"42:00001:abc12345\"");
        let back: HlcTimestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<HlcTimestamp>("\"42:1\"").is_err());
    }
}
