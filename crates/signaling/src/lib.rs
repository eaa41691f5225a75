//! Session negotiation core for the Relaycast media relay
//!
//! This crate is the control-plane/signaling layer of an SFU: it mediates
//! between browser peers and the media engine that does the actual packet
//! forwarding. Peers talk JSON over WebSocket; the coordinator turns their
//! requests into correctly-sequenced engine calls and keeps both sides'
//! state consistent.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  Browser peers                                            │
//! │  ↓ (JSON over WebSocket)                                  │
//! │  SignalingServer / per-connection handler (gateway)       │
//! │  ↓                                                        │
//! │  SessionCoordinator (session)                             │
//! │  ├─ PeerRegistry (per-peer event channels)                │
//! │  ├─ TransportManager (transport)                          │
//! │  └─ ProducerConsumerManager (media)                       │
//! │     ↓                                                     │
//! │  MediaEngineAdapter (engine) → media engine worker        │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! State changes flow back the same path in reverse as unsolicited events
//! (`producer-closed`, `consumer-closed`, `transport-closed`).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use relaycast_signaling::engine::local::LocalMediaEngine;
//! use relaycast_signaling::{SessionCoordinator, SignalingConfig, SignalingServer};
//!
//! # async fn example() -> relaycast_signaling::Result<()> {
//! let config = SignalingConfig::default();
//! config.validate()?;
//!
//! let engine = Arc::new(LocalMediaEngine::spawn(&config.engine)?);
//! let coordinator = SessionCoordinator::new(engine, config.clone());
//!
//! let handle = SignalingServer::new(coordinator, config.bind_addr)
//!     .start()
//!     .await?;
//! println!("listening on {}", handle.local_addr());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod capabilities;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod media;
pub mod session;
pub mod transport;

pub use capabilities::{CapabilityRegistry, MediaKind, RtpCapabilities, RtpParameters};
pub use config::{EngineConfig, SignalingConfig};
pub use error::{Error, Result};
pub use gateway::{SignalingServer, SignalingServerHandle};
pub use session::{PeerWelcome, SessionCoordinator, SessionEvent};
pub use transport::{TransportDescriptor, TransportDirection, TransportState};
