//! Session coordination
//!
//! The [`SessionCoordinator`] is the top-level orchestrator: it owns the
//! shared router (created lazily, exactly once), the peer registry and the
//! transport/media managers, and dispatches every peer request to the right
//! place.

mod coordinator;
mod peer;

pub use coordinator::{PeerWelcome, SessionCoordinator};
pub use peer::{Peer, PeerId, PeerRegistry, SessionEvent};
