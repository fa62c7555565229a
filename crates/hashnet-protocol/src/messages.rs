//! Payload types carried inside frames.
//!
//! Every payload is an `Envelope`: target procedure, argument, and an
//! optional callback procedure the receiver answers on. Built-in procedure
//! results have typed shapes below.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{PeerId, RouteLabel};

// ============================================================================
// Envelope
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Target procedure name.
    #[serde(rename = "fn")]
    pub procedure: String,
    /// Call argument.
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Transient response procedure to call back with the result.
    #[serde(rename = "cb", default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl Envelope {
    pub fn call(procedure: impl Into<String>, data: Value, callback: Option<String>) -> Self {
        Self {
            procedure: procedure.into(),
            data: Some(data),
            callback,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Argument, `null` when absent.
    pub fn data_or_null(&self) -> Value {
        self.data.clone().unwrap_or(Value::Null)
    }
}

// ============================================================================
// Built-in procedure results
// ============================================================================

/// Result of `ping`: the caller's timestamp echoed back with our identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub timestamp: u64,
    pub id: PeerId,
}

/// One row of `discovery.connection`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub id: Option<PeerId>,
    /// One-hop label selecting this connection on the answering peer.
    #[serde(rename = "routeLabel")]
    pub route_label: RouteLabel,
    /// Round-trip time in milliseconds, unset until the first probe returns.
    pub rtt: Option<u64>,
}
