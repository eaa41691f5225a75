//! WebSocket signaling server
//!
//! Accept loop in front of [`handle_connection`]: one spawned task per peer,
//! broadcast shutdown, bound address reported back for ephemeral-port setups.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::handler::handle_connection;
use crate::session::SessionCoordinator;
use crate::Result;

/// WebSocket signaling server
pub struct SignalingServer {
    coordinator: Arc<SessionCoordinator>,
    bind_addr: SocketAddr,
}

impl SignalingServer {
    /// Create a server for `coordinator` bound to `bind_addr`
    pub fn new(coordinator: Arc<SessionCoordinator>, bind_addr: SocketAddr) -> Self {
        Self {
            coordinator,
            bind_addr,
        }
    }

    /// Bind and start accepting connections.
    ///
    /// Returns a handle carrying the actually bound address and a shutdown
    /// trigger.
    pub async fn start(self) -> Result<SignalingServerHandle> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "signaling server listening");

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let coordinator = self.coordinator;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                debug!(%peer_addr, "accepted signaling connection");
                                let coordinator = Arc::clone(&coordinator);
                                tokio::spawn(async move {
                                    if let Err(err) = handle_connection(stream, coordinator).await {
                                        debug!(%peer_addr, error = %err, "signaling connection ended with error");
                                    }
                                });
                            }
                            Err(err) => {
                                error!(error = %err, "failed to accept signaling connection");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("signaling server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(SignalingServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

/// Handle for controlling a running signaling server
pub struct SignalingServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SignalingServerHandle {
    /// Address the server actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    /// Connections already established run until their peers disconnect.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}
