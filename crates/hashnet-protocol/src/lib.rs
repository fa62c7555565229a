//! Hashnet Protocol -- wire frames, route labels, payload messages.
//!
//! Frames travel between directly linked peers:
//!   route label (fixed width) + 1-byte extension length + extension + JSON payload.
//! Route labels are bit-packed hop fields, consumed one field per hop.

pub mod bitbuffer;
pub mod frame;
pub mod messages;
pub mod route;

pub use bitbuffer::BitBuffer;
pub use frame::Frame;
pub use messages::*;
pub use route::{route_label_bits, RouteLabel, WireLabel};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a peer identity in bytes.
pub const PEER_ID_LEN: usize = 32;

/// Default width of the wire route label in bytes.
pub const DEFAULT_ROUTE_LABEL_SIZE: usize = 8;

/// Default bound on live connections per peer.
pub const DEFAULT_MAX_CONNECTIONS: usize = 15;

/// Largest extension block a frame can carry (length is a single byte).
pub const MAX_EXTENSION_LEN: usize = u8::MAX as usize;

/// Built-in procedure: echoes the caller's timestamp with our identity.
pub const PROC_PING: &str = "ping";

/// Built-in procedure: lists our live connections as one-hop route labels.
pub const PROC_DISCOVERY_CONNECTION: &str = "discovery.connection";

/// Built-in procedure: lists registered procedure names.
pub const PROC_DISCOVERY_PROCEDURE: &str = "discovery.procedure";

/// Peer identity: 32 opaque bytes, hex on the wire and in logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    pub fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh random identity.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|e| ProtocolError::InvalidPeerId(e.to_string()))?;
        let bytes: [u8; PEER_ID_LEN] = raw.try_into().map_err(|v: Vec<u8>| {
            ProtocolError::InvalidPeerId(format!(
                "expected {PEER_ID_LEN} bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame too short: {len} bytes (need at least {need})")]
    FrameTooShort { len: usize, need: usize },
    #[error("extension truncated: declared {declared} bytes, {available} available")]
    ExtensionTruncated { declared: usize, available: usize },
    #[error("extension too large: {0} bytes (max {MAX_EXTENSION_LEN})")]
    ExtensionTooLarge(usize),
    #[error("route label too long: {bits} bits (max {max})")]
    LabelTooLong { bits: usize, max: usize },
    #[error("invalid route label: {0}")]
    InvalidLabel(String),
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
