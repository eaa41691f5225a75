//! Top-level orchestrator for the routing domain

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch, OnceCell};
use tracing::{debug, info, warn};

use super::peer::{PeerId, PeerRegistry, SessionEvent};
use crate::capabilities::{CapabilityRegistry, MediaKind, RtpCapabilities, RtpParameters};
use crate::config::SignalingConfig;
use crate::engine::{MediaEngineAdapter, ProducerId, RouterHandle};
use crate::media::{CascadeReport, Consumer, ConsumerDescriptor, ProducerConsumerManager};
use crate::transport::{Transport, TransportDescriptor, TransportDirection, TransportManager};
use crate::{Error, Result};

/// Greeting data for a freshly registered peer
#[derive(Debug, Clone)]
pub struct PeerWelcome {
    /// Generated peer id
    pub peer_id: PeerId,

    /// Whether any live producer already exists in the domain
    pub producer_exists: bool,
}

/// Owns the router and dispatches peer requests to the managers
///
/// All state lives for the process lifetime only; there is no persistent
/// storage.
pub struct SessionCoordinator {
    engine: Arc<dyn MediaEngineAdapter>,
    config: SignalingConfig,
    router: OnceCell<RouterHandle>,
    peers: PeerRegistry,
    transports: TransportManager,
    media: ProducerConsumerManager,
}

impl SessionCoordinator {
    /// Create a coordinator over `engine`
    pub fn new(engine: Arc<dyn MediaEngineAdapter>, config: SignalingConfig) -> Arc<Self> {
        Arc::new(Self {
            transports: TransportManager::new(
                Arc::clone(&engine),
                config.engine.transport_options(),
            ),
            media: ProducerConsumerManager::new(Arc::clone(&engine)),
            peers: PeerRegistry::new(config.max_peers),
            router: OnceCell::new(),
            engine,
            config,
        })
    }

    /// Watch that flips to true when the engine worker dies; the server
    /// binary terminates the process after [`Self::fatal_grace`]
    pub fn fatal_watch(&self) -> watch::Receiver<bool> {
        self.engine.died()
    }

    /// Grace period between engine death and process termination
    pub fn fatal_grace(&self) -> Duration {
        Duration::from_millis(self.config.fatal_grace_ms)
    }

    fn ensure_live(&self) -> Result<()> {
        if *self.engine.died().borrow() {
            return Err(Error::EngineFatal(
                "engine worker has died; signaling is shutting down".to_string(),
            ));
        }
        Ok(())
    }

    /// Admit a new signaling connection
    pub async fn register_peer(
        &self,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<PeerWelcome> {
        self.ensure_live()?;
        let peer_id = self.peers.register(events).await?;
        Ok(PeerWelcome {
            peer_id,
            producer_exists: self.media.producer_exists().await,
        })
    }

    /// Tear down a disconnected peer: its transports close with the full
    /// cascade, notifying every other affected peer.
    ///
    /// In-flight engine calls are not cancelled; the teardown runs after
    /// them.
    pub async fn deregister_peer(&self, peer_id: &str) {
        let Some(_peer) = self.peers.remove(peer_id).await else {
            return;
        };
        info!(peer_id, "peer disconnected, tearing down its transports");

        for transport in self.transports.peer_transports(peer_id).await {
            if let Err(err) = self.close_transport(&transport.id).await {
                warn!(peer_id, transport_id = %transport.id, error = %err, "transport teardown failed");
            }
        }
    }

    /// Create the router on first call; subsequent calls return the existing
    /// capabilities. Safe under concurrent first calls: exactly one router is
    /// ever created.
    pub async fn ensure_router(&self) -> Result<RtpCapabilities> {
        self.ensure_live()?;
        let router = self
            .router
            .get_or_try_init(|| async {
                let handle = self
                    .engine
                    .create_router(CapabilityRegistry::router_codecs())
                    .await?;
                info!(router_id = %handle.id, "router created");
                Ok::<_, Error>(handle)
            })
            .await?;
        Ok(router.capabilities.clone())
    }

    /// Capabilities of the existing router; `NotReady` before the first
    /// `ensure_router`
    pub fn router_capabilities(&self) -> Result<RtpCapabilities> {
        self.router
            .get()
            .map(|r| r.capabilities.clone())
            .ok_or_else(|| Error::NotReady("router has not been created".to_string()))
    }

    fn router_id(&self) -> Result<String> {
        self.router
            .get()
            .map(|r| r.id.clone())
            .ok_or_else(|| Error::NotReady("router has not been created".to_string()))
    }

    /// Allocate a transport for `peer_id` in `direction`
    pub async fn create_transport(
        &self,
        peer_id: &str,
        direction: TransportDirection,
    ) -> Result<TransportDescriptor> {
        self.ensure_live()?;
        let router_id = self.router_id()?;

        if !self.peers.slot_free(peer_id, direction).await? {
            return Err(Error::InvalidState(format!(
                "peer {peer_id} already has a {direction} transport"
            )));
        }

        let descriptor = self.transports.create(&router_id, peer_id, direction).await?;

        if let Err(err) = self
            .peers
            .set_transport(peer_id, direction, descriptor.id.clone())
            .await
        {
            // The peer vanished (or raced a duplicate) while the engine call
            // was in flight; release the fresh allocation.
            if let Err(close_err) = self.close_transport(&descriptor.id).await {
                debug!(transport_id = %descriptor.id, error = %close_err, "cleanup of orphaned transport failed");
            }
            return Err(err);
        }

        Ok(descriptor)
    }

    /// Complete the DTLS handshake for one of `peer_id`'s transports
    pub async fn connect_transport(
        &self,
        peer_id: &str,
        transport_id: &str,
        dtls: &crate::engine::DtlsParameters,
    ) -> Result<()> {
        self.ensure_live()?;
        self.owned_transport(peer_id, transport_id).await?;
        self.transports.connect(transport_id, dtls).await
    }

    /// Publish a stream on `peer_id`'s send-transport
    pub async fn produce(
        &self,
        peer_id: &str,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Option<Value>,
    ) -> Result<ProducerId> {
        self.ensure_live()?;
        let transport = self.owned_transport(peer_id, transport_id).await?;

        if let Some(data) = &app_data {
            debug!(peer_id, %data, "producer app data");
        }

        self.media.produce(&transport, kind, rtp_parameters).await
    }

    /// Subscribe `peer_id` to an existing producer over its receive-transport
    pub async fn consume(
        &self,
        peer_id: &str,
        transport_id: &str,
        producer_id: &str,
        capabilities: &RtpCapabilities,
    ) -> Result<ConsumerDescriptor> {
        self.ensure_live()?;
        let router_id = self.router_id()?;
        let transport = self.owned_transport(peer_id, transport_id).await?;

        self.media
            .consume(&transport, &router_id, producer_id, capabilities)
            .await
    }

    /// Resume packet flow for one of `peer_id`'s consumers
    pub async fn resume_consumer(&self, peer_id: &str, consumer_id: &str) -> Result<()> {
        self.ensure_live()?;
        self.owned_consumer(peer_id, consumer_id).await?;
        self.media.resume_consumer(consumer_id).await
    }

    /// Pause packet flow for one of `peer_id`'s consumers
    pub async fn pause_consumer(&self, peer_id: &str, consumer_id: &str) -> Result<()> {
        self.ensure_live()?;
        self.owned_consumer(peer_id, consumer_id).await?;
        self.media.pause_consumer(consumer_id).await
    }

    /// Close one of `peer_id`'s consumers. The requester gets the ack; no
    /// separate event is emitted to it.
    pub async fn close_consumer(&self, peer_id: &str, consumer_id: &str) -> Result<()> {
        self.ensure_live()?;
        self.owned_consumer(peer_id, consumer_id).await?;
        self.media.close_consumer(consumer_id).await?;
        Ok(())
    }

    /// Close a producer, cascading to every consumer referencing it and
    /// notifying their owners.
    pub async fn close_producer(&self, producer_id: &str) -> Result<()> {
        let report = self.media.close_producer(producer_id).await?;
        self.emit_cascade(&report).await;
        Ok(())
    }

    /// Close a transport and everything bound to it.
    ///
    /// Shared teardown path for explicit closes, peer disconnect, and an
    /// engine-reported DTLS closure. Idempotent: a second close is a no-op.
    pub async fn close_transport(&self, transport_id: &str) -> Result<()> {
        let Some(transport) = self.transports.mark_closed(transport_id).await? else {
            return Ok(());
        };

        let report = self.media.close_for_transport(transport_id).await;

        // Teardown must survive a dying engine; the engine-side close is
        // best-effort.
        if let Err(err) = self.engine.close_transport(transport_id).await {
            debug!(transport_id, error = %err, "engine close_transport failed during teardown");
        }

        self.peers.clear_transport(&transport.peer_id, transport_id).await;
        self.emit_cascade(&report).await;
        self.peers
            .notify(
                &transport.peer_id,
                SessionEvent::TransportClosed {
                    transport_id: transport.id.clone(),
                },
            )
            .await;
        info!(transport_id, peer_id = %transport.peer_id, "transport closed");
        Ok(())
    }

    /// Whether any live producer exists
    pub async fn producer_exists(&self) -> bool {
        self.media.producer_exists().await
    }

    /// Whether packets flow for a consumer
    pub async fn consumer_flowing(&self, consumer_id: &str) -> Result<bool> {
        self.media
            .consumer(consumer_id)
            .await
            .map(|c| c.flowing())
            .ok_or_else(|| Error::NotFound(format!("unknown consumer: {consumer_id}")))
    }

    /// Number of connected peers
    pub async fn peer_count(&self) -> usize {
        self.peers.count().await
    }

    async fn owned_transport(&self, peer_id: &str, transport_id: &str) -> Result<Transport> {
        self.peers.get(peer_id).await?;
        let transport = self.transports.get(transport_id).await?;
        if transport.peer_id != peer_id {
            // Do not leak other peers' transport ids.
            return Err(Error::NotFound(format!(
                "unknown transport: {transport_id}"
            )));
        }
        Ok(transport)
    }

    async fn owned_consumer(&self, peer_id: &str, consumer_id: &str) -> Result<Consumer> {
        self.media
            .consumer(consumer_id)
            .await
            .filter(|c| c.peer_id == peer_id)
            .ok_or_else(|| Error::NotFound(format!("unknown consumer: {consumer_id}")))
    }

    async fn emit_cascade(&self, report: &CascadeReport) {
        for producer in &report.producers {
            self.peers
                .notify(
                    &producer.peer_id,
                    SessionEvent::ProducerClosed {
                        producer_id: producer.id.clone(),
                    },
                )
                .await;
        }
        for consumer in &report.consumers {
            self.peers
                .notify(
                    &consumer.peer_id,
                    SessionEvent::ConsumerClosed {
                        consumer_id: consumer.id.clone(),
                    },
                )
                .await;
        }
    }
}
