//! Transport registry and connection state machine

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{TransportDirection, TransportState};
use crate::engine::{
    DtlsParameters, IceCandidate, IceParameters, MediaEngineAdapter, TransportId,
    TransportOptions,
};
use crate::session::PeerId;
use crate::{Error, Result};

/// Server-side record of one transport
#[derive(Debug, Clone)]
pub struct Transport {
    /// Transport id
    pub id: TransportId,

    /// Owning peer
    pub peer_id: PeerId,

    /// Direction relative to the peer
    pub direction: TransportDirection,

    /// Connection state
    pub state: TransportState,

    /// Primary DTLS fingerprint of the remote side, recorded on the first
    /// connect attempt and compared against retries
    pub remote_fingerprint: Option<String>,
}

/// Connection parameters returned to the requesting peer after allocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportDescriptor {
    /// Transport id
    pub id: TransportId,

    /// ICE parameters
    pub ice_parameters: IceParameters,

    /// ICE candidates
    pub ice_candidates: Vec<IceCandidate>,

    /// Server-side DTLS parameters
    pub dtls_parameters: DtlsParameters,
}

/// Owns the lifecycle of every transport in the routing domain
pub struct TransportManager {
    engine: Arc<dyn MediaEngineAdapter>,
    options: TransportOptions,
    transports: RwLock<HashMap<TransportId, Transport>>,
}

impl TransportManager {
    /// Create a new transport manager talking to `engine`
    pub fn new(engine: Arc<dyn MediaEngineAdapter>, options: TransportOptions) -> Self {
        Self {
            engine,
            options,
            transports: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a transport for `peer_id` under `router_id`.
    ///
    /// Engine failure surfaces as `EngineUnavailable`; the caller answers the
    /// one requesting peer with it instead of aborting the connection.
    pub async fn create(
        &self,
        router_id: &str,
        peer_id: &str,
        direction: TransportDirection,
    ) -> Result<TransportDescriptor> {
        let allocated = self.engine.create_transport(router_id, &self.options).await?;

        let transport = Transport {
            id: allocated.id.clone(),
            peer_id: peer_id.to_string(),
            direction,
            state: TransportState::Created,
            remote_fingerprint: None,
        };

        self.transports
            .write()
            .await
            .insert(allocated.id.clone(), transport);
        info!(transport_id = %allocated.id, peer_id, %direction, "transport created");

        Ok(TransportDescriptor {
            id: allocated.id,
            ice_parameters: allocated.ice_parameters,
            ice_candidates: allocated.ice_candidates,
            dtls_parameters: allocated.dtls_parameters,
        })
    }

    /// Drive `Created|Connecting → Connected` with the peer's DTLS
    /// parameters.
    ///
    /// A duplicate connect with the same primary fingerprint is an idempotent
    /// no-op; a connect with a different fingerprint than a previous attempt
    /// is a `ProtocolViolation`. Connecting a closed transport is
    /// `InvalidState`.
    pub async fn connect(&self, transport_id: &str, dtls: &DtlsParameters) -> Result<()> {
        let fingerprint = dtls
            .primary_fingerprint()
            .ok_or_else(|| {
                Error::ProtocolViolation("connect without a DTLS fingerprint".to_string())
            })?
            .to_string();

        {
            let mut transports = self.transports.write().await;
            let transport = transports
                .get_mut(transport_id)
                .ok_or_else(|| Error::NotFound(format!("unknown transport: {transport_id}")))?;

            match transport.state {
                TransportState::Closed => {
                    return Err(Error::InvalidState(format!(
                        "transport {transport_id} is closed"
                    )));
                }
                TransportState::Connected => {
                    return if transport.remote_fingerprint.as_deref() == Some(&*fingerprint) {
                        debug!(transport_id, "duplicate connect ignored");
                        Ok(())
                    } else {
                        Err(Error::ProtocolViolation(format!(
                            "connect for transport {transport_id} with a different DTLS fingerprint"
                        )))
                    };
                }
                TransportState::Created | TransportState::Connecting => {
                    if let Some(previous) = &transport.remote_fingerprint {
                        if previous != &fingerprint {
                            return Err(Error::ProtocolViolation(format!(
                                "connect for transport {transport_id} with a different DTLS fingerprint"
                            )));
                        }
                    }
                    transport.state = TransportState::Connecting;
                    transport.remote_fingerprint = Some(fingerprint.clone());
                }
            }
        }

        // Suspension point: the engine ack completes the transition.
        match self.engine.connect_transport(transport_id, dtls).await {
            Ok(()) => {
                let mut transports = self.transports.write().await;
                if let Some(transport) = transports.get_mut(transport_id) {
                    if transport.state == TransportState::Connecting {
                        transport.state = TransportState::Connected;
                        info!(transport_id, "transport connected");
                    }
                }
                Ok(())
            }
            Err(err) => {
                // The attempt never took effect in the engine; allow a clean
                // retry with any parameters.
                let mut transports = self.transports.write().await;
                if let Some(transport) = transports.get_mut(transport_id) {
                    if transport.state == TransportState::Connecting {
                        transport.state = TransportState::Created;
                        transport.remote_fingerprint = None;
                    }
                }
                Err(err)
            }
        }
    }

    /// Snapshot of one transport record
    pub async fn get(&self, transport_id: &str) -> Result<Transport> {
        self.transports
            .read()
            .await
            .get(transport_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("unknown transport: {transport_id}")))
    }

    /// Transition a transport to `Closed`.
    ///
    /// Returns the record when this call performed the transition, `None`
    /// when the transport was already closed (idempotent). The caller owns
    /// the cascade to dependent producers/consumers.
    pub async fn mark_closed(&self, transport_id: &str) -> Result<Option<Transport>> {
        let mut transports = self.transports.write().await;
        let transport = transports
            .get_mut(transport_id)
            .ok_or_else(|| Error::NotFound(format!("unknown transport: {transport_id}")))?;

        if transport.state == TransportState::Closed {
            return Ok(None);
        }

        transport.state = TransportState::Closed;
        Ok(Some(transport.clone()))
    }

    /// All transports owned by `peer_id`
    pub async fn peer_transports(&self, peer_id: &str) -> Vec<Transport> {
        self.transports
            .read()
            .await
            .values()
            .filter(|t| t.peer_id == peer_id)
            .cloned()
            .collect()
    }
}
