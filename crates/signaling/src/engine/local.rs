//! In-process media engine worker
//!
//! Emulates the external routing engine behind [`MediaEngineAdapter`]: it
//! allocates ids and RTC ports, tracks router/transport/producer/consumer
//! state and answers consumability queries with the codec-intersection rules
//! from [`crate::capabilities`]. Packet forwarding itself is out of scope.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    ConsumerId, DtlsFingerprint, DtlsParameters, DtlsRole, EngineConsumer, EngineProducer,
    EngineTransport, IceCandidate, IceParameters, MediaEngineAdapter, ProducerId, RouterHandle,
    RouterId, TransportId, TransportOptions, TransportProtocol,
};
use crate::capabilities::{MediaKind, RtpCapabilities, RtpCodecCapability, RtpParameters};
use crate::config::EngineConfig;
use crate::{Error, Result};

const UDP_CANDIDATE_PRIORITY: u32 = 1_076_558_079;
const TCP_CANDIDATE_PRIORITY: u32 = 1_076_302_079;

struct LocalTransport {
    router_id: RouterId,
    port: u16,
    connected: bool,
    remote_dtls: Option<DtlsParameters>,
}

struct LocalProducer {
    transport_id: TransportId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    closed: bool,
}

struct LocalConsumer {
    transport_id: TransportId,
    producer_id: ProducerId,
    kind: MediaKind,
    paused: bool,
    closed: bool,
}

#[derive(Default)]
struct EngineState {
    routers: HashMap<RouterId, RtpCapabilities>,
    transports: HashMap<TransportId, LocalTransport>,
    producers: HashMap<ProducerId, LocalProducer>,
    consumers: HashMap<ConsumerId, LocalConsumer>,
    used_ports: BTreeSet<u16>,
}

/// In-process engine worker
pub struct LocalMediaEngine {
    worker_id: String,
    rtc_min_port: u16,
    rtc_max_port: u16,
    state: RwLock<EngineState>,
    died_tx: watch::Sender<bool>,
}

impl LocalMediaEngine {
    /// Start the worker. Fails when the configured RTC port range is
    /// unusable; worker startup failure is fatal to the process.
    pub fn spawn(config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let worker_id = Uuid::new_v4().to_string();
        info!(
            worker_id = %worker_id,
            rtc_min_port = config.rtc_min_port,
            rtc_max_port = config.rtc_max_port,
            "media engine worker started"
        );

        let (died_tx, _) = watch::channel(false);

        Ok(Self {
            worker_id,
            rtc_min_port: config.rtc_min_port,
            rtc_max_port: config.rtc_max_port,
            state: RwLock::new(EngineState::default()),
            died_tx,
        })
    }

    /// Worker identifier
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Number of routers created in this worker
    pub async fn router_count(&self) -> usize {
        self.state.read().await.routers.len()
    }

    /// Simulate unexpected worker death. All subsequent adapter calls fail
    /// with `EngineFatal` and the `died` watch flips.
    pub fn kill(&self, reason: &str) {
        warn!(worker_id = %self.worker_id, reason, "media engine worker died");
        self.died_tx.send_replace(true);
    }

    fn ensure_alive(&self) -> Result<()> {
        if *self.died_tx.borrow() {
            return Err(Error::EngineFatal("engine worker has died".to_string()));
        }
        Ok(())
    }

    fn allocate_port(&self, state: &mut EngineState) -> Result<u16> {
        for port in self.rtc_min_port..=self.rtc_max_port {
            if state.used_ports.insert(port) {
                return Ok(port);
            }
        }
        Err(Error::EngineUnavailable(format!(
            "no free port in RTC range {}-{}",
            self.rtc_min_port, self.rtc_max_port
        )))
    }

    fn random_string(len: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }

    fn generate_fingerprint() -> DtlsFingerprint {
        let cert: [u8; 32] = rand::thread_rng().gen();
        let digest = Sha256::digest(cert);
        let raw = hex::encode_upper(digest);
        let value = raw
            .as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect::<Vec<_>>()
            .join(":");

        DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value,
        }
    }

    fn build_candidates(options: &TransportOptions, port: u16) -> Vec<IceCandidate> {
        let ip = options
            .announced_ip
            .clone()
            .unwrap_or_else(|| options.listen_ip.clone());
        let mut candidates = Vec::new();

        if options.enable_udp {
            candidates.push(IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: if options.prefer_udp {
                    UDP_CANDIDATE_PRIORITY
                } else {
                    TCP_CANDIDATE_PRIORITY
                },
                ip: ip.clone(),
                port,
                protocol: TransportProtocol::Udp,
                candidate_type: "host".to_string(),
            });
        }

        if options.enable_tcp {
            candidates.push(IceCandidate {
                foundation: "tcpcandidate".to_string(),
                priority: if options.prefer_udp {
                    TCP_CANDIDATE_PRIORITY
                } else {
                    UDP_CANDIDATE_PRIORITY
                },
                ip,
                port,
                protocol: TransportProtocol::Tcp,
                candidate_type: "host".to_string(),
            });
        }

        candidates
    }
}

#[async_trait]
impl MediaEngineAdapter for LocalMediaEngine {
    async fn create_router(&self, codecs: Vec<RtpCodecCapability>) -> Result<RouterHandle> {
        self.ensure_alive()?;

        let id = Uuid::new_v4().to_string();
        let capabilities = RtpCapabilities { codecs };

        let mut state = self.state.write().await;
        state.routers.insert(id.clone(), capabilities.clone());
        info!(router_id = %id, "router created");

        Ok(RouterHandle { id, capabilities })
    }

    async fn create_transport(
        &self,
        router_id: &str,
        options: &TransportOptions,
    ) -> Result<EngineTransport> {
        self.ensure_alive()?;

        let mut state = self.state.write().await;
        if !state.routers.contains_key(router_id) {
            return Err(Error::EngineUnavailable(format!(
                "unknown router: {router_id}"
            )));
        }

        let port = self.allocate_port(&mut state)?;
        let id = Uuid::new_v4().to_string();

        state.transports.insert(
            id.clone(),
            LocalTransport {
                router_id: router_id.to_string(),
                port,
                connected: false,
                remote_dtls: None,
            },
        );
        debug!(transport_id = %id, port, "engine transport allocated");

        Ok(EngineTransport {
            id,
            ice_parameters: IceParameters {
                username_fragment: Self::random_string(8),
                password: Self::random_string(22),
                ice_lite: true,
            },
            ice_candidates: Self::build_candidates(options, port),
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![Self::generate_fingerprint()],
            },
        })
    }

    async fn connect_transport(&self, transport_id: &str, dtls: &DtlsParameters) -> Result<()> {
        self.ensure_alive()?;

        let mut state = self.state.write().await;
        let transport = state.transports.get_mut(transport_id).ok_or_else(|| {
            Error::EngineUnavailable(format!("unknown transport: {transport_id}"))
        })?;

        transport.connected = true;
        transport.remote_dtls = Some(dtls.clone());
        debug!(transport_id, "engine transport connected");
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<EngineProducer> {
        self.ensure_alive()?;

        let mut state = self.state.write().await;
        if !state.transports.contains_key(transport_id) {
            return Err(Error::EngineUnavailable(format!(
                "unknown transport: {transport_id}"
            )));
        }

        let id = Uuid::new_v4().to_string();
        state.producers.insert(
            id.clone(),
            LocalProducer {
                transport_id: transport_id.to_string(),
                kind,
                rtp_parameters: rtp_parameters.clone(),
                closed: false,
            },
        );
        debug!(producer_id = %id, %kind, "engine producer created");

        Ok(EngineProducer { id, kind })
    }

    async fn can_consume(
        &self,
        router_id: &str,
        producer_id: &str,
        capabilities: &RtpCapabilities,
    ) -> Result<bool> {
        self.ensure_alive()?;

        let state = self.state.read().await;
        if !state.routers.contains_key(router_id) {
            return Err(Error::EngineUnavailable(format!(
                "unknown router: {router_id}"
            )));
        }

        Ok(state
            .producers
            .get(producer_id)
            .filter(|p| !p.closed)
            .map(|p| capabilities.can_consume(&p.rtp_parameters))
            .unwrap_or(false))
    }

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<EngineConsumer> {
        self.ensure_alive()?;

        let mut state = self.state.write().await;
        if !state.transports.contains_key(transport_id) {
            return Err(Error::EngineUnavailable(format!(
                "unknown transport: {transport_id}"
            )));
        }

        let (kind, negotiated) = {
            let producer = state
                .producers
                .get(producer_id)
                .filter(|p| !p.closed)
                .ok_or_else(|| {
                    Error::EngineUnavailable(format!("unknown producer: {producer_id}"))
                })?;

            let negotiated = capabilities.intersect(&producer.rtp_parameters);
            if negotiated.codecs.is_empty() {
                return Err(Error::EngineUnavailable(format!(
                    "no compatible codecs for producer {producer_id}"
                )));
            }
            (producer.kind, negotiated)
        };

        let id = Uuid::new_v4().to_string();
        state.consumers.insert(
            id.clone(),
            LocalConsumer {
                transport_id: transport_id.to_string(),
                producer_id: producer_id.to_string(),
                kind,
                paused,
                closed: false,
            },
        );
        debug!(consumer_id = %id, producer_id, "engine consumer created");

        Ok(EngineConsumer {
            id,
            producer_id: producer_id.to_string(),
            kind,
            rtp_parameters: negotiated,
            paused,
        })
    }

    async fn pause_consumer(&self, consumer_id: &str) -> Result<()> {
        self.ensure_alive()?;

        let mut state = self.state.write().await;
        let consumer = state.consumers.get_mut(consumer_id).ok_or_else(|| {
            Error::EngineUnavailable(format!("unknown consumer: {consumer_id}"))
        })?;
        consumer.paused = true;
        Ok(())
    }

    async fn resume_consumer(&self, consumer_id: &str) -> Result<()> {
        self.ensure_alive()?;

        let mut state = self.state.write().await;
        let consumer = state.consumers.get_mut(consumer_id).ok_or_else(|| {
            Error::EngineUnavailable(format!("unknown consumer: {consumer_id}"))
        })?;
        consumer.paused = false;
        Ok(())
    }

    async fn close_producer(&self, producer_id: &str) -> Result<()> {
        self.ensure_alive()?;

        let mut state = self.state.write().await;
        if let Some(producer) = state.producers.get_mut(producer_id) {
            producer.closed = true;
        }
        Ok(())
    }

    async fn close_consumer(&self, consumer_id: &str) -> Result<()> {
        self.ensure_alive()?;

        let mut state = self.state.write().await;
        if let Some(consumer) = state.consumers.get_mut(consumer_id) {
            consumer.closed = true;
        }
        Ok(())
    }

    async fn close_transport(&self, transport_id: &str) -> Result<()> {
        self.ensure_alive()?;

        let mut state = self.state.write().await;
        if let Some(transport) = state.transports.remove(transport_id) {
            state.used_ports.remove(&transport.port);
        }
        Ok(())
    }

    fn died(&self) -> watch::Receiver<bool> {
        self.died_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityRegistry;

    fn engine() -> LocalMediaEngine {
        LocalMediaEngine::spawn(&EngineConfig::default()).unwrap()
    }

    fn engine_with_ports(min: u16, max: u16) -> LocalMediaEngine {
        let config = EngineConfig {
            rtc_min_port: min,
            rtc_max_port: max,
            ..EngineConfig::default()
        };
        LocalMediaEngine::spawn(&config).unwrap()
    }

    fn options() -> TransportOptions {
        EngineConfig::default().transport_options()
    }

    fn video_parameters() -> RtpParameters {
        RtpParameters {
            codecs: CapabilityRegistry::router_codecs()
                .into_iter()
                .filter(|c| c.kind == MediaKind::Video)
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_spawn_rejects_bad_port_range() {
        let config = EngineConfig {
            rtc_min_port: 3000,
            rtc_max_port: 2000,
            ..EngineConfig::default()
        };
        assert!(LocalMediaEngine::spawn(&config).is_err());
    }

    #[tokio::test]
    async fn test_router_echoes_codecs() {
        let engine = engine();
        let router = engine
            .create_router(CapabilityRegistry::router_codecs())
            .await
            .unwrap();
        assert_eq!(router.capabilities, CapabilityRegistry::router_capabilities());
    }

    #[tokio::test]
    async fn test_transport_allocation_exhausts_port_range() {
        let engine = engine_with_ports(40_000, 40_000);
        let router = engine
            .create_router(CapabilityRegistry::router_codecs())
            .await
            .unwrap();

        let first = engine.create_transport(&router.id, &options()).await;
        assert!(first.is_ok());

        let second = engine.create_transport(&router.id, &options()).await;
        assert!(matches!(second, Err(Error::EngineUnavailable(_))));

        // Closing the first transport releases its port.
        engine.close_transport(&first.unwrap().id).await.unwrap();
        assert!(engine.create_transport(&router.id, &options()).await.is_ok());
    }

    #[tokio::test]
    async fn test_transport_has_candidates_and_fingerprint() {
        let engine = engine();
        let router = engine
            .create_router(CapabilityRegistry::router_codecs())
            .await
            .unwrap();
        let transport = engine.create_transport(&router.id, &options()).await.unwrap();

        assert_eq!(transport.ice_candidates.len(), 2);
        assert!(transport.ice_parameters.ice_lite);
        let fingerprint = transport.dtls_parameters.primary_fingerprint().unwrap();
        // 32 digest bytes as colon-separated hex pairs
        assert_eq!(fingerprint.len(), 32 * 3 - 1);
    }

    #[tokio::test]
    async fn test_can_consume_unknown_producer_is_false() {
        let engine = engine();
        let router = engine
            .create_router(CapabilityRegistry::router_codecs())
            .await
            .unwrap();

        let ok = engine
            .can_consume(&router.id, "nope", &CapabilityRegistry::router_capabilities())
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_consume_negotiates_codec_subset() {
        let engine = engine();
        let router = engine
            .create_router(CapabilityRegistry::router_codecs())
            .await
            .unwrap();
        let transport = engine.create_transport(&router.id, &options()).await.unwrap();

        let producer = engine
            .produce(&transport.id, MediaKind::Video, &video_parameters())
            .await
            .unwrap();

        let consumer = engine
            .consume(
                &transport.id,
                &producer.id,
                &CapabilityRegistry::router_capabilities(),
                true,
            )
            .await
            .unwrap();

        assert!(consumer.paused);
        assert_eq!(consumer.kind, MediaKind::Video);
        assert_eq!(consumer.rtp_parameters.codecs.len(), 1);
        assert_eq!(consumer.rtp_parameters.codecs[0].mime_type, "video/VP8");
    }

    #[tokio::test]
    async fn test_kill_flips_watch_and_rejects_calls() {
        let engine = engine();
        let mut died = engine.died();
        assert!(!*died.borrow());

        engine.kill("test");

        assert!(died.changed().await.is_ok());
        assert!(*died.borrow());

        let result = engine.create_router(CapabilityRegistry::router_codecs()).await;
        assert!(matches!(result, Err(Error::EngineFatal(_))));
    }
}
