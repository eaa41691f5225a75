//! Signaling server binary entry point
//!
//! Starts the Relaycast signaling server: spawns the media engine worker,
//! builds the session coordinator and serves the WebSocket gateway.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: signaling on 0.0.0.0:3000, media on 127.0.0.1 ports 2000-2020
//! cargo run -p relaycast-server
//!
//! # Behind NAT, announcing a public address
//! cargo run -p relaycast-server -- \
//!   --listen 0.0.0.0:3000 \
//!   --rtc-ip 0.0.0.0 \
//!   --announced-ip 203.0.113.7 \
//!   --rtc-min-port 40000 --rtc-max-port 40100
//! ```
//!
//! Engine worker death is unrecoverable: the process logs, waits the
//! configured grace period so in-flight responses drain, then exits nonzero
//! for the supervising process manager to restart it.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use relaycast_signaling::engine::local::LocalMediaEngine;
use relaycast_signaling::{EngineConfig, SessionCoordinator, SignalingConfig, SignalingServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Relaycast signaling server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address the WebSocket signaling server binds to
    #[arg(long, default_value = "0.0.0.0:3000", env = "RELAYCAST_LISTEN")]
    listen: SocketAddr,

    /// IP the media engine listens on
    #[arg(long, default_value = "127.0.0.1", env = "RELAYCAST_RTC_IP")]
    rtc_ip: String,

    /// IP announced to remote peers in ICE candidates (NAT setups)
    #[arg(long, env = "RELAYCAST_ANNOUNCED_IP")]
    announced_ip: Option<String>,

    /// Low end of the RTC port range
    #[arg(long, default_value_t = 2000, env = "RELAYCAST_RTC_MIN_PORT")]
    rtc_min_port: u16,

    /// High end of the RTC port range
    #[arg(long, default_value_t = 2020, env = "RELAYCAST_RTC_MAX_PORT")]
    rtc_max_port: u16,

    /// Maximum concurrent signaling peers
    #[arg(long, default_value_t = 32, env = "RELAYCAST_MAX_PEERS")]
    max_peers: u32,

    /// Grace period in milliseconds between engine death and process exit
    #[arg(long, default_value_t = 2000, env = "RELAYCAST_FATAL_GRACE_MS")]
    fatal_grace_ms: u64,
}

impl Args {
    fn into_config(self) -> SignalingConfig {
        SignalingConfig {
            bind_addr: self.listen,
            max_peers: self.max_peers,
            fatal_grace_ms: self.fatal_grace_ms,
            engine: EngineConfig {
                listen_ip: self.rtc_ip,
                announced_ip: self.announced_ip,
                rtc_min_port: self.rtc_min_port,
                rtc_max_port: self.rtc_max_port,
                ..EngineConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config();
    config.validate()?;

    let engine = Arc::new(LocalMediaEngine::spawn(&config.engine)?);
    info!(worker_id = %engine.worker_id(), "media engine worker ready");

    let coordinator = SessionCoordinator::new(engine, config.clone());
    let grace = coordinator.fatal_grace();
    let mut fatal = coordinator.fatal_watch();

    let server = SignalingServer::new(coordinator, config.bind_addr);
    let handle = server.start().await?;
    info!(addr = %handle.local_addr(), "relaycast signaling server running");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            handle.shutdown().await;
        }
        changed = fatal.changed() => {
            // A closed watch means the engine itself is gone too.
            if changed.is_err() || *fatal.borrow() {
                error!(
                    grace_ms = grace.as_millis() as u64,
                    "media engine worker died; terminating after grace period"
                );
                tokio::time::sleep(grace).await;
                handle.shutdown().await;
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
