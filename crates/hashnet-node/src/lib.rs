//! Hashnet Node -- overlay peer with source-routed RPC.
//!
//! A `Peer` owns a bounded table of direct links (slots), forwards frames
//! along bit-packed route labels, dispatches procedure calls, probes link
//! RTTs and finds least-latency multi-hop routes on demand.

pub mod config;
pub mod connection;
pub mod discovery;
pub mod hook;
pub mod peer;
pub mod procedure;
pub mod token;
pub mod transport;

pub use config::PeerConfig;
pub use connection::{ConnectionInfo, Slot};
pub use discovery::Route;
pub use hook::Hook;
pub use peer::{Call, Peer, PeerEvent};
pub use procedure::Handler;
pub use transport::{Link, StreamTransport, Transport, TransportEvent};

pub use hashnet_protocol::PeerId;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("no path found to peer {0}")]
    NoPath(PeerId),
    #[error("peer is shut down")]
    Shutdown,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("protocol error: {0}")]
    Protocol(#[from] hashnet_protocol::ProtocolError),
}

/// Admission refused. Where the link survives it is handed back so the
/// caller can decide whether to destroy it.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("connection table full ({max} slots)")]
    Full { max: usize, link: Link },
    #[error("peer is shut down")]
    Shutdown(Link),
    /// An `add-connection` hook panicked; the link it held was dropped.
    #[error("add-connection hook failed")]
    HookFailed,
}

impl AdmissionError {
    pub fn into_link(self) -> Option<Link> {
        match self {
            AdmissionError::Full { link, .. } | AdmissionError::Shutdown(link) => Some(link),
            AdmissionError::HookFailed => None,
        }
    }
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
