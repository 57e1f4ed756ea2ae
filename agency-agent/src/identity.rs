// ABOUTME: AgentId - the 128-bit identity assigned to an agent before its process is launched.
// ABOUTME: Used as the registry key and sent raw (16 bytes, unframed) during the handshake.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Number of raw bytes an agent writes to identify itself on the rendezvous pipe
pub const ID_LEN: usize = 16;

/// Globally unique, immutable agent identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Allocate a fresh random identity
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Build an identity from a raw handshake buffer.
    ///
    /// Returns `None` unless the slice is exactly [`ID_LEN`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; ID_LEN] = bytes.try_into().ok()?;
        Some(Self::from_bytes(raw))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        self.0.as_bytes()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_bytes_round_trip() {
        let id = AgentId::new();
        let restored = AgentId::from_slice(id.as_bytes()).unwrap();
        assert_eq!(id, restored);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(AgentId::from_slice(&[0u8; 15]).is_none());
        assert!(AgentId::from_slice(&[0u8; 17]).is_none());
    }

    #[test]
    fn test_display_parses_back() {
        let id = AgentId::new();
        let parsed: AgentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
