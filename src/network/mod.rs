//! Network module - Handles TCP sessions between game and companion
//!
//! Provides:
//! - Server for accepting companion connections against a shared model
//! - Client for connecting to a game and mirroring its model
//! - Connection framing and the per-session dispatch loop

mod client;
mod connection;
mod server;
mod session;

pub use client::*;
pub use connection::*;
pub use server::*;
pub use session::*;

use std::net::SocketAddr;

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    pub port: u16,
    /// Address the server binds to
    pub bind_address: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Maximum frame payload size
    pub max_frame_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::protocol::TCP_PORT,
            bind_address: "0.0.0.0".to_string(),
            connect_timeout_ms: 5000,
            heartbeat_interval_ms: 1000,
            max_frame_size: crate::protocol::MAX_FRAME_SIZE,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }
}

impl From<&crate::config::NetworkConfig> for NetworkConfig {
    fn from(config: &crate::config::NetworkConfig) -> Self {
        Self {
            port: config.port,
            bind_address: config.bind_address.clone(),
            connect_timeout_ms: config.connect_timeout_ms,
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            max_frame_size: config.max_frame_size,
        }
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.port, 27000);
        assert_eq!(config.max_frame_size, 16 * 1024 * 1024);

        let config = NetworkConfig::new(0).with_bind_address("127.0.0.1");
        assert_eq!(config.port, 0);
        assert_eq!(config.bind_address, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve_host("127.0.0.1", 27000).await.unwrap();
        assert_eq!(addr.port(), 27000);
        assert!(addr.ip().is_loopback());
    }
}
