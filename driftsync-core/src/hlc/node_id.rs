//! Node identifiers for HLC timestamps.
//!
//! A node ID is exactly eight characters and never contains `:` (the field
//! separator of the wire format). Derived IDs are the first four bytes of a
//! SHA-256 digest rendered as lowercase hex.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::timestamp::HlcParseError;

/// Length of every node ID, in characters.
pub const NODE_ID_LEN: usize = 8;

/// Identity of a clock instance, used to break ties between equal
/// `(physical_time, counter)` pairs on different nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(String);

impl NodeId {
    /// Validates and wraps an existing node ID.
    pub fn new(id: impl Into<String>) -> Result<Self, HlcParseError> {
        let id = id.into();
        if id.chars().count() != NODE_ID_LEN || id.contains(':') {
            return Err(HlcParseError::NodeId(id));
        }
        Ok(Self(id))
    }

    /// Derives a node ID for this process from the host name, the process ID
    /// and a high-resolution start marker.
    pub fn derive() -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        let marker = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        Self::from_material(&host, std::process::id(), marker)
    }

    fn from_material(host: &str, pid: u32, marker: u128) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update(b":");
        hasher.update(pid.to_le_bytes());
        hasher.update(b":");
        hasher.update(marker.to_le_bytes());
        let hash = hasher.finalize();

        Self(hash[..4].iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = HlcParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_eight_chars() {
        let id = NodeId::new("abc12345").unwrap();
        assert_eq!(id.as_str(), "abc12345");
        assert_eq!(id.to_string(), "abc12345");
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(NodeId::new("abc1234").is_err());
        assert!(NodeId::new("abc123456").is_err());
        assert!(NodeId::new("").is_err());
    }

    #[test]
    fn test_new_rejects_separator() {
        assert!(NodeId::new("abc:1234").is_err());
    }

    #[test]
    fn test_derive_is_valid() {
        let id = NodeId::derive();
        assert_eq!(id.as_str().len(), NODE_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_same_material_same_id() {
        let a = NodeId::from_material("host-a", 42, 1_700_000_000_000_000_000);
        let b = NodeId::from_material("host-a", 42, 1_700_000_000_000_000_000);
        let c = NodeId::from_material("host-a", 43, 1_700_000_000_000_000_000);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_serde_validates() {
        let id: NodeId = serde_json::from_str("\"abc12345\"").unwrap();
        assert_eq!(id.as_str(), "abc12345");
        assert!(serde_json::from_str::<NodeId>("\"short\"").is_err());
    }
}
