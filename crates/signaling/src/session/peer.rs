//! Peer registry and per-peer event delivery

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::{ConsumerId, ProducerId, TransportId};
use crate::transport::TransportDirection;
use crate::{Error, Result};

/// Peer identifier
pub type PeerId = String;

/// Unsolicited state-change notification delivered to one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A producer the peer owns was closed by a cascade
    ProducerClosed {
        /// Closed producer
        producer_id: ProducerId,
    },
    /// A consumer the peer owns was closed by a cascade
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

/// One signaling connection
#[derive(Debug, Clone)]
pub struct Peer {
    /// Peer id
    pub id: PeerId,

    /// The peer's send-transport, if created
    pub send_transport: Option<TransportId>,

    /// The peer's receive-transport, if created
    pub recv_transport: Option<TransportId>,

    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Registry of connected peers, keyed by generated id
pub struct PeerRegistry {
    max_peers: u32,
    peers: RwLock<HashMap<PeerId, Peer>>,
}

impl PeerRegistry {
    /// Create a registry admitting at most `max_peers` concurrent peers
    pub fn new(max_peers: u32) -> Self {
        Self {
            max_peers,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Admit a new peer; `events` receives its unsolicited notifications
    pub async fn register(&self, events: mpsc::UnboundedSender<SessionEvent>) -> Result<PeerId> {
        let mut peers = self.peers.write().await;

        if peers.len() >= self.max_peers as usize {
            return Err(Error::InvalidState(format!(
                "peer limit reached ({})",
                self.max_peers
            )));
        }

        let id = Uuid::new_v4().to_string();
        peers.insert(
            id.clone(),
            Peer {
                id: id.clone(),
                send_transport: None,
                recv_transport: None,
                events,
            },
        );
        info!(peer_id = %id, "peer registered");

        Ok(id)
    }

    /// Remove a peer, returning its record
    pub async fn remove(&self, peer_id: &str) -> Option<Peer> {
        self.peers.write().await.remove(peer_id)
    }

    /// Snapshot of one peer record
    pub async fn get(&self, peer_id: &str) -> Result<Peer> {
        self.peers
            .read()
            .await
            .get(peer_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("unknown peer: {peer_id}")))
    }

    /// Record a freshly created transport in the peer's direction slot.
    ///
    /// Each peer holds at most one transport per direction; a second create
    /// for an occupied slot is `InvalidState`.
    pub async fn set_transport(
        &self,
        peer_id: &str,
        direction: TransportDirection,
        transport_id: TransportId,
    ) -> Result<()> {
        let mut peers = self.peers.write().await;
        let peer = peers
            .get_mut(peer_id)
            .ok_or_else(|| Error::NotFound(format!("unknown peer: {peer_id}")))?;

        let slot = match direction {
            TransportDirection::Send => &mut peer.send_transport,
            TransportDirection::Recv => &mut peer.recv_transport,
        };
        if slot.is_some() {
            return Err(Error::InvalidState(format!(
                "peer {peer_id} already has a {direction} transport"
            )));
        }
        *slot = Some(transport_id);
        Ok(())
    }

    /// Whether the peer's slot for `direction` is free
    pub async fn slot_free(&self, peer_id: &str, direction: TransportDirection) -> Result<bool> {
        let peer = self.get(peer_id).await?;
        Ok(match direction {
            TransportDirection::Send => peer.send_transport.is_none(),
            TransportDirection::Recv => peer.recv_transport.is_none(),
        })
    }

    /// Free whichever slot holds `transport_id`, if the peer still exists
    pub async fn clear_transport(&self, peer_id: &str, transport_id: &str) {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(peer_id) {
            if peer.send_transport.as_deref() == Some(transport_id) {
                peer.send_transport = None;
            }
            if peer.recv_transport.as_deref() == Some(transport_id) {
                peer.recv_transport = None;
            }
        }
    }

    /// Deliver an event to one peer. Best-effort: a disconnected peer's
    /// channel is simply gone.
    pub async fn notify(&self, peer_id: &str, event: SessionEvent) {
        let peers = self.peers.read().await;
        if let Some(peer) = peers.get(peer_id) {
            if peer.events.send(event).is_err() {
                debug!(peer_id, "dropping event for disconnecting peer");
            }
        }
    }

    /// Number of connected peers
    pub async fn count(&self) -> usize {
        self.peers.read().await.len()
    }
}
