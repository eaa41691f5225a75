//! Signaling gateway
//!
//! The transport-agnostic request/response/event channel to each peer: wire
//! protocol types, the WebSocket server, and the per-connection handler that
//! maps each inbound message to exactly one coordinator call.

pub mod protocol;

mod handler;
mod server;

pub use server::{SignalingServer, SignalingServerHandle};
