//! Producer/consumer lifecycle
//!
//! Producers are published streams on send-transports; consumers are
//! subscriptions to a producer delivered over receive-transports. Consumers
//! are created paused and only flow after an explicit resume.

mod manager;

pub use manager::ProducerConsumerManager;

use serde::{Deserialize, Serialize};

use crate::capabilities::{MediaKind, RtpParameters};
use crate::engine::{ConsumerId, ProducerId, TransportId};
use crate::session::PeerId;

/// Server-side record of one published stream
#[derive(Debug, Clone)]
pub struct Producer {
    /// Producer id
    pub id: ProducerId,

    /// Publishing peer
    pub peer_id: PeerId,

    /// Send-transport carrying the stream
    pub transport_id: TransportId,

    /// Media kind
    pub kind: MediaKind,

    /// Encoding of the published stream
    pub rtp_parameters: RtpParameters,

    /// Terminal once set
    pub closed: bool,
}

/// Server-side record of one subscription
#[derive(Debug, Clone)]
pub struct Consumer {
    /// Consumer id
    pub id: ConsumerId,

    /// Subscribing peer
    pub peer_id: PeerId,

    /// Receive-transport delivering the stream
    pub transport_id: TransportId,

    /// Producer this consumer references
    pub producer_id: ProducerId,

    /// Media kind
    pub kind: MediaKind,

    /// Negotiated encoding for the subscriber
    pub rtp_parameters: RtpParameters,

    /// Consumers start paused and must be explicitly resumed
    pub paused: bool,

    /// Terminal once set
    pub closed: bool,
}

impl Consumer {
    /// Whether packets flow to the subscriber
    pub fn flowing(&self) -> bool {
        !self.paused && !self.closed
    }
}

/// Parameters handed to the subscribing peer after a successful consume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerDescriptor {
    /// Consumer id
    pub id: ConsumerId,

    /// Producer being consumed
    pub producer_id: ProducerId,

    /// Media kind
    pub kind: MediaKind,

    /// Negotiated encoding
    pub rtp_parameters: RtpParameters,

    /// Always true at creation
    pub paused: bool,
}

/// Entities closed by one cascading teardown, each exactly once; used to
/// emit the corresponding `*-closed` events to affected peers
#[derive(Debug, Default)]
pub struct CascadeReport {
    /// Producers transitioned to closed by this cascade
    pub producers: Vec<Producer>,

    /// Consumers transitioned to closed by this cascade
    pub consumers: Vec<Consumer>,
}

impl CascadeReport {
    /// Whether the cascade closed anything
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty() && self.consumers.is_empty()
    }
}
