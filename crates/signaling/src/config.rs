//! Configuration types for the signaling server

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

use crate::engine::TransportOptions;

/// Main configuration for the signaling server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Address the WebSocket signaling server binds to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent signaling peers
    pub max_peers: u32,

    /// Grace period between detecting engine worker death and terminating
    /// the process, in milliseconds
    pub fatal_grace_ms: u64,

    /// Media engine worker configuration
    pub engine: EngineConfig,
}

/// Media engine worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// IP the engine listens on for media
    pub listen_ip: String,

    /// IP announced to remote peers in ICE candidates (NAT setups); defaults
    /// to `listen_ip` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<String>,

    /// Low end of the RTC port range (inclusive)
    pub rtc_min_port: u16,

    /// High end of the RTC port range (inclusive)
    pub rtc_max_port: u16,

    /// Allocate UDP candidates
    pub enable_udp: bool,

    /// Allocate TCP candidates
    pub enable_tcp: bool,

    /// Prefer UDP over TCP when both are enabled
    pub prefer_udp: bool,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".parse().expect("static addr"),
            max_peers: 32,
            fatal_grace_ms: 2_000,
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen_ip: "127.0.0.1".to_string(),
            announced_ip: None,
            rtc_min_port: 2_000,
            rtc_max_port: 2_020,
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
        }
    }
}

impl SignalingConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_peers` is zero
    /// - `fatal_grace_ms` exceeds 60 seconds
    /// - the engine configuration is invalid
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.max_peers == 0 {
            return Err(Error::InvalidConfig(
                "max_peers must be at least 1".to_string(),
            ));
        }

        if self.fatal_grace_ms > 60_000 {
            return Err(Error::InvalidConfig(format!(
                "fatal_grace_ms must be at most 60000, got {}",
                self.fatal_grace_ms
            )));
        }

        self.engine.validate()
    }
}

impl EngineConfig {
    /// Validate engine worker parameters
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.listen_ip.parse::<IpAddr>().is_err() {
            return Err(Error::InvalidConfig(format!(
                "listen_ip is not a valid IP address: {}",
                self.listen_ip
            )));
        }

        if let Some(ip) = &self.announced_ip {
            if ip.parse::<IpAddr>().is_err() {
                return Err(Error::InvalidConfig(format!(
                    "announced_ip is not a valid IP address: {}",
                    ip
                )));
            }
        }

        if self.rtc_min_port == 0 {
            return Err(Error::InvalidConfig(
                "rtc_min_port must be nonzero".to_string(),
            ));
        }

        if self.rtc_min_port > self.rtc_max_port {
            return Err(Error::InvalidConfig(format!(
                "rtc_min_port ({}) must not exceed rtc_max_port ({})",
                self.rtc_min_port, self.rtc_max_port
            )));
        }

        if !self.enable_udp && !self.enable_tcp {
            return Err(Error::InvalidConfig(
                "at least one of enable_udp / enable_tcp is required".to_string(),
            ));
        }

        Ok(())
    }

    /// IP advertised in ICE candidates
    pub fn advertised_ip(&self) -> &str {
        self.announced_ip.as_deref().unwrap_or(&self.listen_ip)
    }

    /// Transport allocation options derived from this configuration
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            listen_ip: self.listen_ip.clone(),
            announced_ip: self.announced_ip.clone(),
            enable_udp: self.enable_udp,
            enable_tcp: self.enable_tcp,
            prefer_udp: self.prefer_udp,
        }
    }
}
