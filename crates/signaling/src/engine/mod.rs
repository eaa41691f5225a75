//! Media engine boundary
//!
//! The engine performs the actual packet forwarding and lives outside this
//! crate's responsibility; everything here talks to it through the
//! [`MediaEngineAdapter`] trait. [`local::LocalMediaEngine`] is the in-process
//! implementation used by the server binary and the test suite.

pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::capabilities::{MediaKind, RtpCapabilities, RtpCodecCapability, RtpParameters};
use crate::Result;

/// Router identifier
pub type RouterId = String;
/// Transport identifier
pub type TransportId = String;
/// Producer identifier
pub type ProducerId = String;
/// Consumer identifier
pub type ConsumerId = String;

/// ICE negotiation parameters for one transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceParameters {
    /// ICE username fragment
    pub username_fragment: String,

    /// ICE password
    pub password: String,

    /// Whether the server side is ICE-lite
    pub ice_lite: bool,
}

/// Candidate transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// UDP candidate
    Udp,
    /// TCP candidate
    Tcp,
}

/// One ICE candidate advertised to the remote peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate foundation
    pub foundation: String,

    /// Candidate priority
    pub priority: u32,

    /// Advertised IP
    pub ip: String,

    /// Advertised port
    pub port: u16,

    /// Transport protocol
    pub protocol: TransportProtocol,

    /// Candidate type; always "host" for a relay server
    pub candidate_type: String,
}

/// DTLS role of one side of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    /// Role decided during negotiation
    Auto,
    /// DTLS client
    Client,
    /// DTLS server
    Server,
}

/// Certificate fingerprint used during the DTLS handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    /// Digest algorithm, e.g. "sha-256"
    pub algorithm: String,

    /// Colon-separated hex digest
    pub value: String,
}

/// DTLS handshake parameters for one side of a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtlsParameters {
    /// DTLS role
    pub role: DtlsRole,

    /// Certificate fingerprints, strongest first
    pub fingerprints: Vec<DtlsFingerprint>,
}

impl DtlsParameters {
    /// Primary fingerprint; the identity compared across duplicate connect
    /// attempts.
    pub fn primary_fingerprint(&self) -> Option<&str> {
        self.fingerprints.first().map(|f| f.value.as_str())
    }
}

/// Options for engine transport allocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportOptions {
    /// IP the engine listens on
    pub listen_ip: String,

    /// IP announced in candidates (NAT setups)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<String>,

    /// Allocate UDP candidates
    pub enable_udp: bool,

    /// Allocate TCP candidates
    pub enable_tcp: bool,

    /// Prefer UDP over TCP
    pub prefer_udp: bool,
}

/// Handle to the router created inside the engine
#[derive(Debug, Clone)]
pub struct RouterHandle {
    /// Router id
    pub id: RouterId,

    /// Codec set the router was created with
    pub capabilities: RtpCapabilities,
}

/// Connection parameters for a freshly allocated engine transport; handed to
/// the remote peer so it can establish the secure channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineTransport {
    /// Transport id
    pub id: TransportId,

    /// ICE parameters
    pub ice_parameters: IceParameters,

    /// ICE candidates
    pub ice_candidates: Vec<IceCandidate>,

    /// Server-side DTLS parameters
    pub dtls_parameters: DtlsParameters,
}

/// Handle to a producer created inside the engine
#[derive(Debug, Clone)]
pub struct EngineProducer {
    /// Producer id
    pub id: ProducerId,

    /// Media kind
    pub kind: MediaKind,
}

/// Handle to a consumer created inside the engine
#[derive(Debug, Clone)]
pub struct EngineConsumer {
    /// Consumer id
    pub id: ConsumerId,

    /// Producer this consumer subscribes to
    pub producer_id: ProducerId,

    /// Media kind
    pub kind: MediaKind,

    /// Negotiated RTP parameters for the receiving peer
    pub rtp_parameters: RtpParameters,

    /// Whether the consumer was created paused
    pub paused: bool,
}

/// Asynchronous interface to the external media engine
///
/// Every call is a suspension point; issuing one never blocks other peers'
/// signaling. Implementations must be safe to share across tasks.
#[async_trait]
pub trait MediaEngineAdapter: Send + Sync {
    /// Create a router for the given codec set
    async fn create_router(&self, codecs: Vec<RtpCodecCapability>) -> Result<RouterHandle>;

    /// Allocate a transport under `router_id`
    async fn create_transport(
        &self,
        router_id: &str,
        options: &TransportOptions,
    ) -> Result<EngineTransport>;

    /// Complete the DTLS handshake for a transport
    async fn connect_transport(&self, transport_id: &str, dtls: &DtlsParameters) -> Result<()>;

    /// Create a producer on a transport
    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<EngineProducer>;

    /// Whether a receiver with `capabilities` can consume `producer_id`
    async fn can_consume(
        &self,
        router_id: &str,
        producer_id: &str,
        capabilities: &RtpCapabilities,
    ) -> Result<bool>;

    /// Create a consumer on a transport for an existing producer
    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<EngineConsumer>;

    /// Pause packet flow for a consumer
    async fn pause_consumer(&self, consumer_id: &str) -> Result<()>;

    /// Resume packet flow for a consumer
    async fn resume_consumer(&self, consumer_id: &str) -> Result<()>;

    /// Close a producer
    async fn close_producer(&self, producer_id: &str) -> Result<()>;

    /// Close a consumer
    async fn close_consumer(&self, consumer_id: &str) -> Result<()>;

    /// Close a transport
    async fn close_transport(&self, transport_id: &str) -> Result<()>;

    /// Watch that flips to true when the engine worker dies. Worker death is
    /// unrecoverable for the signaling domain.
    fn died(&self) -> watch::Receiver<bool>;
}
