//! Producer/consumer registry and cascade logic

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{CascadeReport, Consumer, ConsumerDescriptor, Producer};
use crate::capabilities::{MediaKind, RtpCapabilities, RtpParameters};
use crate::engine::{ConsumerId, MediaEngineAdapter, ProducerId};
use crate::transport::{Transport, TransportDirection, TransportState};
use crate::{Error, Result};

/// Owns every producer and consumer in the routing domain and the
/// cross-references between them
pub struct ProducerConsumerManager {
    engine: Arc<dyn MediaEngineAdapter>,
    producers: RwLock<HashMap<ProducerId, Producer>>,
    consumers: RwLock<HashMap<ConsumerId, Consumer>>,
}

impl ProducerConsumerManager {
    /// Create a new manager talking to `engine`
    pub fn new(engine: Arc<dyn MediaEngineAdapter>) -> Self {
        Self {
            engine,
            producers: RwLock::new(HashMap::new()),
            consumers: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a stream on `transport`.
    ///
    /// The transport must be a connected send-transport; `InvalidState`
    /// otherwise.
    pub async fn produce(
        &self,
        transport: &Transport,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId> {
        if transport.state != TransportState::Connected {
            return Err(Error::InvalidState(format!(
                "produce requires a connected transport, transport {} is {}",
                transport.id, transport.state
            )));
        }
        if transport.direction != TransportDirection::Send {
            return Err(Error::InvalidState(format!(
                "produce requires a send transport, transport {} is {}",
                transport.id, transport.direction
            )));
        }

        let handle = self
            .engine
            .produce(&transport.id, kind, &rtp_parameters)
            .await?;

        let producer = Producer {
            id: handle.id.clone(),
            peer_id: transport.peer_id.clone(),
            transport_id: transport.id.clone(),
            kind,
            rtp_parameters,
            closed: false,
        };
        self.producers
            .write()
            .await
            .insert(handle.id.clone(), producer);
        info!(producer_id = %handle.id, peer_id = %transport.peer_id, %kind, "producer created");

        Ok(handle.id)
    }

    /// Subscribe `transport`'s peer to `producer_id`.
    ///
    /// Unknown or closed producer → `NotFound`; capability mismatch →
    /// `CannotConsume` with no consumer created. The consumer starts paused.
    pub async fn consume(
        &self,
        transport: &Transport,
        router_id: &str,
        producer_id: &str,
        capabilities: &RtpCapabilities,
    ) -> Result<ConsumerDescriptor> {
        if transport.state != TransportState::Connected {
            return Err(Error::InvalidState(format!(
                "consume requires a connected transport, transport {} is {}",
                transport.id, transport.state
            )));
        }
        if transport.direction != TransportDirection::Recv {
            return Err(Error::InvalidState(format!(
                "consume requires a receive transport, transport {} is {}",
                transport.id, transport.direction
            )));
        }

        // Holding the read guard across the engine calls keeps
        // close_producer (a writer) from racing the consumer into existence
        // after its producer is gone.
        let producers = self.producers.read().await;
        match producers.get(producer_id) {
            None => {
                return Err(Error::NotFound(format!(
                    "unknown producer: {producer_id}"
                )))
            }
            Some(p) if p.closed => {
                return Err(Error::NotFound(format!(
                    "producer {producer_id} is closed"
                )))
            }
            Some(_) => {}
        }

        if !self
            .engine
            .can_consume(router_id, producer_id, capabilities)
            .await?
        {
            debug!(producer_id, "capability mismatch, cannot consume");
            return Err(Error::CannotConsume(format!(
                "peer capabilities are incompatible with producer {producer_id}"
            )));
        }

        let handle = self
            .engine
            .consume(&transport.id, producer_id, capabilities, true)
            .await?;

        let consumer = Consumer {
            id: handle.id.clone(),
            peer_id: transport.peer_id.clone(),
            transport_id: transport.id.clone(),
            producer_id: producer_id.to_string(),
            kind: handle.kind,
            rtp_parameters: handle.rtp_parameters.clone(),
            paused: true,
            closed: false,
        };
        self.consumers
            .write()
            .await
            .insert(handle.id.clone(), consumer);
        drop(producers);
        info!(
            consumer_id = %handle.id,
            producer_id,
            peer_id = %transport.peer_id,
            "consumer created (paused)"
        );

        Ok(ConsumerDescriptor {
            id: handle.id,
            producer_id: producer_id.to_string(),
            kind: handle.kind,
            rtp_parameters: handle.rtp_parameters,
            paused: true,
        })
    }

    /// Resume packet flow for a consumer. No-op when already active.
    pub async fn resume_consumer(&self, consumer_id: &str) -> Result<()> {
        let mut consumers = self.consumers.write().await;
        let consumer = consumers
            .get_mut(consumer_id)
            .ok_or_else(|| Error::NotFound(format!("unknown consumer: {consumer_id}")))?;

        if consumer.closed {
            return Err(Error::InvalidState(format!(
                "consumer {consumer_id} is closed"
            )));
        }
        if !consumer.paused {
            return Ok(());
        }

        self.engine.resume_consumer(consumer_id).await?;
        consumer.paused = false;
        debug!(consumer_id, "consumer resumed");
        Ok(())
    }

    /// Pause packet flow for a consumer. No-op when already paused.
    pub async fn pause_consumer(&self, consumer_id: &str) -> Result<()> {
        let mut consumers = self.consumers.write().await;
        let consumer = consumers
            .get_mut(consumer_id)
            .ok_or_else(|| Error::NotFound(format!("unknown consumer: {consumer_id}")))?;

        if consumer.closed {
            return Err(Error::InvalidState(format!(
                "consumer {consumer_id} is closed"
            )));
        }
        if consumer.paused {
            return Ok(());
        }

        self.engine.pause_consumer(consumer_id).await?;
        consumer.paused = true;
        debug!(consumer_id, "consumer paused");
        Ok(())
    }

    /// Close a consumer. Terminal; a second close returns `None` and has no
    /// additional effect.
    pub async fn close_consumer(&self, consumer_id: &str) -> Result<Option<Consumer>> {
        let mut consumers = self.consumers.write().await;
        let consumer = consumers
            .get_mut(consumer_id)
            .ok_or_else(|| Error::NotFound(format!("unknown consumer: {consumer_id}")))?;

        if consumer.closed {
            return Ok(None);
        }

        if let Err(err) = self.engine.close_consumer(consumer_id).await {
            warn!(consumer_id, error = %err, "engine close_consumer failed during teardown");
        }
        consumer.closed = true;
        info!(consumer_id, "consumer closed");
        Ok(Some(consumer.clone()))
    }

    /// Close a producer and cascade-close every consumer referencing it.
    pub async fn close_producer(&self, producer_id: &str) -> Result<CascadeReport> {
        let mut report = CascadeReport::default();

        let mut producers = self.producers.write().await;
        let producer = producers
            .get_mut(producer_id)
            .ok_or_else(|| Error::NotFound(format!("unknown producer: {producer_id}")))?;

        if producer.closed {
            return Ok(report);
        }

        if let Err(err) = self.engine.close_producer(producer_id).await {
            warn!(producer_id, error = %err, "engine close_producer failed during teardown");
        }
        producer.closed = true;
        report.producers.push(producer.clone());
        info!(producer_id, "producer closed");
        drop(producers);

        let mut consumers = self.consumers.write().await;
        for consumer in consumers.values_mut() {
            if consumer.closed || consumer.producer_id != producer_id {
                continue;
            }
            if let Err(err) = self.engine.close_consumer(&consumer.id).await {
                warn!(consumer_id = %consumer.id, error = %err, "engine close_consumer failed during teardown");
            }
            consumer.closed = true;
            report.consumers.push(consumer.clone());
            info!(consumer_id = %consumer.id, producer_id, "consumer closed with its producer");
        }

        Ok(report)
    }

    /// Close everything bound to a transport: its producers (cascading into
    /// their consumers, wherever those live) and its consumers.
    pub async fn close_for_transport(&self, transport_id: &str) -> CascadeReport {
        let mut report = CascadeReport::default();
        let mut closed_producers: HashSet<ProducerId> = HashSet::new();

        let mut producers = self.producers.write().await;
        for producer in producers.values_mut() {
            if producer.closed || producer.transport_id != transport_id {
                continue;
            }
            if let Err(err) = self.engine.close_producer(&producer.id).await {
                warn!(producer_id = %producer.id, error = %err, "engine close_producer failed during teardown");
            }
            producer.closed = true;
            closed_producers.insert(producer.id.clone());
            report.producers.push(producer.clone());
            info!(producer_id = %producer.id, transport_id, "producer closed with its transport");
        }
        drop(producers);

        let mut consumers = self.consumers.write().await;
        for consumer in consumers.values_mut() {
            if consumer.closed {
                continue;
            }
            if consumer.transport_id != transport_id
                && !closed_producers.contains(&consumer.producer_id)
            {
                continue;
            }
            if let Err(err) = self.engine.close_consumer(&consumer.id).await {
                warn!(consumer_id = %consumer.id, error = %err, "engine close_consumer failed during teardown");
            }
            consumer.closed = true;
            report.consumers.push(consumer.clone());
            info!(consumer_id = %consumer.id, transport_id, "consumer closed in transport teardown");
        }

        report
    }

    /// Whether any live producer exists
    pub async fn producer_exists(&self) -> bool {
        self.producers.read().await.values().any(|p| !p.closed)
    }

    /// Snapshot of one producer record
    pub async fn producer(&self, producer_id: &str) -> Option<Producer> {
        self.producers.read().await.get(producer_id).cloned()
    }

    /// Snapshot of one consumer record
    pub async fn consumer(&self, consumer_id: &str) -> Option<Consumer> {
        self.consumers.read().await.get(consumer_id).cloned()
    }

    /// Number of consumer records, closed ones included
    pub async fn consumer_count(&self) -> usize {
        self.consumers.read().await.len()
    }
}
