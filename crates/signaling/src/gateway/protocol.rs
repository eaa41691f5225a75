//! Wire protocol for the signaling channel
//!
//! JSON over WebSocket. Every client request carries a numeric `id` and gets
//! exactly one correlated response (`result`) or error (`error`); server →
//! peer notifications are id-less `event` messages.

use serde::{Deserialize, Serialize};

use crate::capabilities::{MediaKind, RtpCapabilities, RtpParameters};
use crate::engine::{ConsumerId, DtlsParameters, ProducerId, TransportId};
use crate::session::{PeerId, SessionEvent};
use crate::transport::TransportDirection;

/// Inbound request envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalRequest {
    /// Correlation id chosen by the client
    pub id: u64,

    /// Request body
    #[serde(flatten)]
    pub body: RequestBody,
}

/// Request bodies, one per signaling operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", content = "params", rename_all = "kebab-case")]
pub enum RequestBody {
    /// Idempotent router creation; responds with router capabilities
    CreateRoom,

    /// Allocate a transport in the given direction
    CreateTransport {
        /// Publish (`send`) or subscribe (`recv`) side
        direction: TransportDirection,
    },

    /// Complete the DTLS handshake for a transport
    ConnectTransport {
        /// Transport to connect
        transport_id: TransportId,
        /// Remote DTLS parameters
        dtls_parameters: DtlsParameters,
    },

    /// Publish a stream
    Produce {
        /// Send-transport carrying the stream
        transport_id: TransportId,
        /// Media kind
        kind: MediaKind,
        /// Stream encoding
        rtp_parameters: RtpParameters,
        /// Opaque application metadata
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_data: Option<serde_json::Value>,
    },

    /// Subscribe to an existing producer
    Consume {
        /// Receive-transport to deliver over
        transport_id: TransportId,
        /// Producer to subscribe to
        producer_id: ProducerId,
        /// The subscriber's capabilities
        rtp_capabilities: RtpCapabilities,
    },

    /// Resume packet flow for a consumer
    ConsumerResume {
        /// Consumer to resume
        consumer_id: ConsumerId,
    },

    /// Pause packet flow for a consumer
    ConsumerPause {
        /// Consumer to pause
        consumer_id: ConsumerId,
    },

    /// Close a consumer
    ConsumerClose {
        /// Consumer to close
        consumer_id: ConsumerId,
    },
}

impl RequestBody {
    /// Wire method name, for logging
    pub fn method_name(&self) -> &'static str {
        match self {
            RequestBody::CreateRoom => "create-room",
            RequestBody::CreateTransport { .. } => "create-transport",
            RequestBody::ConnectTransport { .. } => "connect-transport",
            RequestBody::Produce { .. } => "produce",
            RequestBody::Consume { .. } => "consume",
            RequestBody::ConsumerResume { .. } => "consumer-resume",
            RequestBody::ConsumerPause { .. } => "consumer-pause",
            RequestBody::ConsumerClose { .. } => "consumer-close",
        }
    }
}

/// Successful response envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseOk {
    /// Correlation id of the request
    pub id: u64,

    /// Operation result
    pub result: serde_json::Value,
}

/// Error response envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseErr {
    /// Correlation id of the request
    pub id: u64,

    /// Error details
    pub error: ErrorBody,
}

/// Error details carried in an error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// Wire error code (see [`crate::error::codes`])
    pub code: i32,

    /// Human-readable message
    pub message: String,
}

/// Result of `create-room`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateRoomResult {
    /// Router capabilities
    pub rtp_capabilities: RtpCapabilities,
}

/// Result of `produce`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProduceResult {
    /// Id of the new producer
    pub producer_id: ProducerId,
}

/// Server → peer notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Sent once per connection, before any request
    ConnectionEstablished {
        /// Generated peer id
        peer_id: PeerId,
        /// Whether a live producer already exists
        producer_exists: bool,
    },

    /// A producer the peer owns was closed
    ProducerClosed {
        /// Closed producer
        producer_id: ProducerId,
    },

    /// A consumer the peer owns was closed
    ConsumerClosed {
        /// Closed consumer
        consumer_id: ConsumerId,
    },

    /// A transport the peer owns was closed
    TransportClosed {
        /// Closed transport
        transport_id: TransportId,
    },
}

impl From<SessionEvent> for ServerEvent {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::ProducerClosed { producer_id } => {
                ServerEvent::ProducerClosed { producer_id }
            }
            SessionEvent::ConsumerClosed { consumer_id } => {
                ServerEvent::ConsumerClosed { consumer_id }
            }
            SessionEvent::TransportClosed { transport_id } => {
                ServerEvent::TransportClosed { transport_id }
            }
        }
    }
}
