// ABOUTME: Transport error type shared by framing, connections and the handshake.
// ABOUTME: Every variant is fatal to the connection it occurred on.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("pipe I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pipe closed by peer")]
    Closed,

    #[error("short read: expected {expected} bytes but the peer disconnected after {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("timed out after {timeout:?} connecting to pipe '{name}'")]
    Timeout { name: String, timeout: Duration },

    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("protocol version mismatch: local {local}, peer {peer}")]
    VersionMismatch { local: u16, peer: u16 },

    #[error("invalid agent identity of {0} bytes")]
    InvalidIdentity(usize),
}

impl TransportError {
    /// True when the peer went away cleanly between frames
    pub fn is_closed(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}
