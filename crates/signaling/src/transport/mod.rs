//! Per-peer transport lifecycle
//!
//! A transport is one ICE/DTLS-secured media connection between a peer and
//! the router. Each peer holds at most one send-side and one receive-side
//! transport.

mod manager;

pub use manager::{Transport, TransportDescriptor, TransportManager};

use serde::{Deserialize, Serialize};

/// Direction of a transport relative to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    /// Peer publishes media over this transport
    Send,
    /// Peer receives media over this transport
    Recv,
}

impl std::fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportDirection::Send => write!(f, "send"),
            TransportDirection::Recv => write!(f, "recv"),
        }
    }
}

/// Transport connection state machine: `Created → Connecting → Connected →
/// Closed`. `Closed` is terminal; transitions out of it are illegal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    /// Allocated in the engine, no DTLS handshake yet
    Created,
    /// Connect issued, waiting for the engine ack
    Connecting,
    /// Secure channel established
    Connected,
    /// Torn down; rejects all further operations
    Closed,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportState::Created => write!(f, "created"),
            TransportState::Connecting => write!(f, "connecting"),
            TransportState::Connected => write!(f, "connected"),
            TransportState::Closed => write!(f, "closed"),
        }
    }
}
