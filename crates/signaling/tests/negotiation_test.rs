//! Integration tests for the session negotiation protocol
//!
//! Drives the coordinator directly, the way the gateway does, and checks the
//! state-machine and cascade guarantees end to end.

use std::sync::Arc;

use relaycast_signaling::engine::local::LocalMediaEngine;
use relaycast_signaling::engine::{DtlsFingerprint, DtlsParameters, DtlsRole};
use relaycast_signaling::{
    CapabilityRegistry, Error, MediaKind, RtpCapabilities, RtpParameters, SessionCoordinator,
    SessionEvent, SignalingConfig, TransportDirection,
};
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .try_init();
}

fn setup() -> (Arc<LocalMediaEngine>, Arc<SessionCoordinator>) {
    init_tracing();
    let config = SignalingConfig::default();
    let engine = Arc::new(LocalMediaEngine::spawn(&config.engine).expect("engine spawns"));
    let coordinator = SessionCoordinator::new(engine.clone(), config);
    (engine, coordinator)
}

struct TestPeer {
    id: String,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

async fn connect_peer(coordinator: &Arc<SessionCoordinator>) -> TestPeer {
    let (tx, rx) = mpsc::unbounded_channel();
    let welcome = coordinator.register_peer(tx).await.expect("peer registers");
    TestPeer {
        id: welcome.peer_id,
        events: rx,
    }
}

fn dtls(fingerprint: &str) -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: fingerprint.to_string(),
        }],
    }
}

fn video_parameters() -> RtpParameters {
    RtpParameters {
        codecs: CapabilityRegistry::router_codecs()
            .into_iter()
            .filter(|c| c.kind == MediaKind::Video)
            .collect(),
    }
}

fn audio_only_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: CapabilityRegistry::router_codecs()
            .into_iter()
            .filter(|c| c.kind == MediaKind::Audio)
            .collect(),
    }
}

/// Drive one peer through create-transport → connect → produce.
async fn publish_video(
    coordinator: &Arc<SessionCoordinator>,
    peer: &TestPeer,
    fingerprint: &str,
) -> (String, String) {
    let transport = coordinator
        .create_transport(&peer.id, TransportDirection::Send)
        .await
        .expect("send transport");
    coordinator
        .connect_transport(&peer.id, &transport.id, &dtls(fingerprint))
        .await
        .expect("connect");
    let producer_id = coordinator
        .produce(&peer.id, &transport.id, MediaKind::Video, video_parameters(), None)
        .await
        .expect("produce");
    (transport.id, producer_id)
}

async fn subscribe(
    coordinator: &Arc<SessionCoordinator>,
    peer: &TestPeer,
    producer_id: &str,
) -> relaycast_signaling::media::ConsumerDescriptor {
    let transport = coordinator
        .create_transport(&peer.id, TransportDirection::Recv)
        .await
        .expect("recv transport");
    coordinator
        .connect_transport(&peer.id, &transport.id, &dtls("BB"))
        .await
        .expect("connect");
    coordinator
        .consume(
            &peer.id,
            &transport.id,
            producer_id,
            &CapabilityRegistry::router_capabilities(),
        )
        .await
        .expect("consume")
}

#[tokio::test]
async fn produce_before_connect_fails_with_invalid_state() {
    let (_engine, coordinator) = setup();
    coordinator.ensure_router().await.unwrap();
    let peer = connect_peer(&coordinator).await;

    let transport = coordinator
        .create_transport(&peer.id, TransportDirection::Send)
        .await
        .unwrap();

    // No connect yet.
    let err = coordinator
        .produce(&peer.id, &transport.id, MediaKind::Video, video_parameters(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn consumers_start_paused_and_flow_only_after_resume() {
    let (_engine, coordinator) = setup();
    coordinator.ensure_router().await.unwrap();
    let publisher = connect_peer(&coordinator).await;
    let subscriber = connect_peer(&coordinator).await;

    let (_, producer_id) = publish_video(&coordinator, &publisher, "AA").await;
    let consumer = subscribe(&coordinator, &subscriber, &producer_id).await;

    assert!(consumer.paused);
    assert_eq!(consumer.producer_id, producer_id);
    assert!(!coordinator.consumer_flowing(&consumer.id).await.unwrap());

    coordinator
        .resume_consumer(&subscriber.id, &consumer.id)
        .await
        .unwrap();
    assert!(coordinator.consumer_flowing(&consumer.id).await.unwrap());

    coordinator
        .pause_consumer(&subscriber.id, &consumer.id)
        .await
        .unwrap();
    assert!(!coordinator.consumer_flowing(&consumer.id).await.unwrap());
}

#[tokio::test]
async fn closing_a_producer_closes_each_consumer_exactly_once() {
    let (_engine, coordinator) = setup();
    coordinator.ensure_router().await.unwrap();
    let publisher = connect_peer(&coordinator).await;
    let mut subscriber_b = connect_peer(&coordinator).await;
    let mut subscriber_c = connect_peer(&coordinator).await;

    let (_, producer_id) = publish_video(&coordinator, &publisher, "AA").await;
    let consumer_b = subscribe(&coordinator, &subscriber_b, &producer_id).await;
    let consumer_c = subscribe(&coordinator, &subscriber_c, &producer_id).await;

    coordinator.close_producer(&producer_id).await.unwrap();

    assert_eq!(
        subscriber_b.events.try_recv().ok(),
        Some(SessionEvent::ConsumerClosed {
            consumer_id: consumer_b.id.clone()
        })
    );
    assert_eq!(
        subscriber_c.events.try_recv().ok(),
        Some(SessionEvent::ConsumerClosed {
            consumer_id: consumer_c.id.clone()
        })
    );

    // Idempotent double close: no additional events, no error.
    coordinator.close_producer(&producer_id).await.unwrap();
    assert!(subscriber_b.events.try_recv().is_err());
    assert!(subscriber_c.events.try_recv().is_err());

    // The closed consumers reject resume.
    let err = coordinator
        .resume_consumer(&subscriber_b.id, &consumer_b.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn closing_a_transport_cascades_to_everything_bound_to_it() {
    let (_engine, coordinator) = setup();
    coordinator.ensure_router().await.unwrap();
    let mut publisher = connect_peer(&coordinator).await;
    let mut subscriber = connect_peer(&coordinator).await;

    let (send_transport, producer_id) = publish_video(&coordinator, &publisher, "AA").await;
    let consumer = subscribe(&coordinator, &subscriber, &producer_id).await;

    coordinator.close_transport(&send_transport).await.unwrap();

    // Publisher sees its producer and transport go.
    assert_eq!(
        publisher.events.try_recv().ok(),
        Some(SessionEvent::ProducerClosed {
            producer_id: producer_id.clone()
        })
    );
    assert_eq!(
        publisher.events.try_recv().ok(),
        Some(SessionEvent::TransportClosed {
            transport_id: send_transport.clone()
        })
    );

    // Subscriber's consumer dies with the producer.
    assert_eq!(
        subscriber.events.try_recv().ok(),
        Some(SessionEvent::ConsumerClosed {
            consumer_id: consumer.id.clone()
        })
    );

    // Second close is a no-op.
    coordinator.close_transport(&send_transport).await.unwrap();
    assert!(publisher.events.try_recv().is_err());
}

#[tokio::test]
async fn concurrent_ensure_router_creates_exactly_one_router() {
    let (engine, coordinator) = setup();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        tasks.push(tokio::spawn(async move {
            coordinator.ensure_router().await
        }));
    }

    let mut responses = Vec::new();
    for task in tasks {
        responses.push(task.await.unwrap().unwrap());
    }

    assert_eq!(engine.router_count().await, 1);
    for capabilities in &responses {
        assert_eq!(capabilities, &responses[0]);
    }
}

#[tokio::test]
async fn router_capabilities_before_creation_is_not_ready() {
    let (_engine, coordinator) = setup();
    assert!(matches!(
        coordinator.router_capabilities().unwrap_err(),
        Error::NotReady(_)
    ));

    coordinator.ensure_router().await.unwrap();
    assert_eq!(
        coordinator.router_capabilities().unwrap(),
        CapabilityRegistry::router_capabilities()
    );
}

#[tokio::test]
async fn incompatible_capabilities_yield_cannot_consume() {
    let (_engine, coordinator) = setup();
    coordinator.ensure_router().await.unwrap();
    let publisher = connect_peer(&coordinator).await;
    let subscriber = connect_peer(&coordinator).await;

    let (_, producer_id) = publish_video(&coordinator, &publisher, "AA").await;

    let transport = coordinator
        .create_transport(&subscriber.id, TransportDirection::Recv)
        .await
        .unwrap();
    coordinator
        .connect_transport(&subscriber.id, &transport.id, &dtls("BB"))
        .await
        .unwrap();

    let err = coordinator
        .consume(
            &subscriber.id,
            &transport.id,
            &producer_id,
            &audio_only_capabilities(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CannotConsume(_)));

    // Not fatal: the same peer can retry with full capabilities.
    let consumer = coordinator
        .consume(
            &subscriber.id,
            &transport.id,
            &producer_id,
            &CapabilityRegistry::router_capabilities(),
        )
        .await
        .unwrap();
    assert!(consumer.paused);
}

#[tokio::test]
async fn publish_subscribe_scenario_end_to_end() {
    let (_engine, coordinator) = setup();
    let publisher = connect_peer(&coordinator).await;
    let subscriber = connect_peer(&coordinator).await;

    coordinator.ensure_router().await.unwrap();
    assert!(!coordinator.producer_exists().await);

    // Peer A publishes.
    let (_, producer_id) = publish_video(&coordinator, &publisher, "AA").await;
    assert!(coordinator.producer_exists().await);

    // Peer B subscribes to A's stream.
    let consumer = subscribe(&coordinator, &subscriber, &producer_id).await;
    assert_eq!(consumer.producer_id, producer_id);
    assert_eq!(consumer.kind, MediaKind::Video);
    assert!(consumer.paused);
    assert!(!coordinator.consumer_flowing(&consumer.id).await.unwrap());

    coordinator
        .resume_consumer(&subscriber.id, &consumer.id)
        .await
        .unwrap();
    assert!(coordinator.consumer_flowing(&consumer.id).await.unwrap());
}

#[tokio::test]
async fn consume_before_any_producer_is_not_found() {
    let (_engine, coordinator) = setup();
    coordinator.ensure_router().await.unwrap();
    let subscriber = connect_peer(&coordinator).await;

    let transport = coordinator
        .create_transport(&subscriber.id, TransportDirection::Recv)
        .await
        .unwrap();
    coordinator
        .connect_transport(&subscriber.id, &transport.id, &dtls("BB"))
        .await
        .unwrap();

    let err = coordinator
        .consume(
            &subscriber.id,
            &transport.id,
            "no-producer-yet",
            &CapabilityRegistry::router_capabilities(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn duplicate_connect_is_idempotent_but_mismatch_is_a_violation() {
    let (_engine, coordinator) = setup();
    coordinator.ensure_router().await.unwrap();
    let peer = connect_peer(&coordinator).await;

    let transport = coordinator
        .create_transport(&peer.id, TransportDirection::Send)
        .await
        .unwrap();

    coordinator
        .connect_transport(&peer.id, &transport.id, &dtls("AA"))
        .await
        .unwrap();
    // Same fingerprint: fine.
    coordinator
        .connect_transport(&peer.id, &transport.id, &dtls("AA"))
        .await
        .unwrap();
    // Different fingerprint: protocol violation.
    let err = coordinator
        .connect_transport(&peer.id, &transport.id, &dtls("BB"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ProtocolViolation(_)));
}

#[tokio::test]
async fn peer_disconnect_tears_down_its_transports() {
    let (_engine, coordinator) = setup();
    coordinator.ensure_router().await.unwrap();
    let publisher = connect_peer(&coordinator).await;
    let mut subscriber = connect_peer(&coordinator).await;

    let (_, producer_id) = publish_video(&coordinator, &publisher, "AA").await;
    let consumer = subscribe(&coordinator, &subscriber, &producer_id).await;

    coordinator.deregister_peer(&publisher.id).await;
    assert_eq!(coordinator.peer_count().await, 1);

    // The subscriber is told its consumer died with the publisher.
    assert_eq!(
        subscriber.events.try_recv().ok(),
        Some(SessionEvent::ConsumerClosed {
            consumer_id: consumer.id.clone()
        })
    );
    assert!(!coordinator.producer_exists().await);
}

#[tokio::test]
async fn one_transport_per_direction_per_peer() {
    let (_engine, coordinator) = setup();
    coordinator.ensure_router().await.unwrap();
    let peer = connect_peer(&coordinator).await;

    coordinator
        .create_transport(&peer.id, TransportDirection::Send)
        .await
        .unwrap();
    let err = coordinator
        .create_transport(&peer.id, TransportDirection::Send)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    // The other direction still works.
    coordinator
        .create_transport(&peer.id, TransportDirection::Recv)
        .await
        .unwrap();
}

#[tokio::test]
async fn transport_close_frees_the_direction_slot() {
    let (_engine, coordinator) = setup();
    coordinator.ensure_router().await.unwrap();
    let peer = connect_peer(&coordinator).await;

    let transport = coordinator
        .create_transport(&peer.id, TransportDirection::Send)
        .await
        .unwrap();
    coordinator.close_transport(&transport.id).await.unwrap();

    // A replacement can be created.
    coordinator
        .create_transport(&peer.id, TransportDirection::Send)
        .await
        .unwrap();
}

#[tokio::test]
async fn engine_death_rejects_all_further_requests() {
    let (engine, coordinator) = setup();
    coordinator.ensure_router().await.unwrap();
    let peer = connect_peer(&coordinator).await;

    let mut fatal = coordinator.fatal_watch();
    assert!(!*fatal.borrow());

    engine.kill("simulated crash");
    assert!(fatal.changed().await.is_ok());
    assert!(*fatal.borrow());

    // Termination is scheduled within the configured grace period.
    assert_eq!(coordinator.fatal_grace().as_millis(), 2_000);

    let err = coordinator.ensure_router().await.unwrap_err();
    assert!(matches!(err, Error::EngineFatal(_)));
    let err = coordinator
        .create_transport(&peer.id, TransportDirection::Send)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EngineFatal(_)));

    // New peers are refused as well.
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(matches!(
        coordinator.register_peer(tx).await.unwrap_err(),
        Error::EngineFatal(_)
    ));
}

#[tokio::test]
async fn peers_cannot_touch_each_others_entities() {
    let (_engine, coordinator) = setup();
    coordinator.ensure_router().await.unwrap();
    let publisher = connect_peer(&coordinator).await;
    let subscriber = connect_peer(&coordinator).await;
    let intruder = connect_peer(&coordinator).await;

    let (send_transport, producer_id) = publish_video(&coordinator, &publisher, "AA").await;
    let consumer = subscribe(&coordinator, &subscriber, &producer_id).await;

    // Another peer referencing the transport or consumer gets NotFound, not
    // access.
    let err = coordinator
        .connect_transport(&intruder.id, &send_transport, &dtls("CC"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = coordinator
        .resume_consumer(&intruder.id, &consumer.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
