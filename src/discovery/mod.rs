//! Service discovery module
//!
//! Provides UDP broadcast discovery of games on the local network, and the
//! responder that answers those broadcasts.

use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::protocol::UDP_PORT;

/// Command carried by discovery requests
pub const AUTODISCOVER: &str = "autodiscover";

/// Largest datagram read by either side
const MAX_DATAGRAM: usize = 1024;

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bind failed: {0}")]
    BindFailed(String),

    #[error("Already running")]
    AlreadyRunning,

    #[error("Not running")]
    NotRunning,
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Configuration for discovery and the responder
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// UDP port requests are sent to and answered on
    pub port: u16,
    /// Destination of discovery requests
    pub broadcast_address: String,
    /// How long to wait for replies
    pub timeout_ms: u64,
    /// Machine type announced by the responder
    pub machine_type: String,
    /// Busy flag announced by the responder
    pub is_busy: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: UDP_PORT,
            broadcast_address: "255.255.255.255".to_string(),
            timeout_ms: 5000,
            machine_type: "PC".to_string(),
            is_busy: false,
        }
    }
}

impl From<&crate::config::DiscoveryConfig> for DiscoveryConfig {
    fn from(config: &crate::config::DiscoveryConfig) -> Self {
        Self {
            port: config.port,
            broadcast_address: config.broadcast_address.clone(),
            timeout_ms: config.timeout_ms,
            machine_type: config.machine_type.clone(),
            is_busy: config.is_busy,
        }
    }
}

/// Per-call discovery options
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    /// Overrides the configured timeout
    pub timeout: Option<Duration>,
    /// Stop after this many peers
    pub count: Option<usize>,
    /// Also yield peers that report themselves busy
    pub busy_allowed: bool,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            count: None,
            busy_allowed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub cmd: String,
}

impl DiscoveryRequest {
    pub fn autodiscover() -> Self {
        Self {
            cmd: AUTODISCOVER.to_string(),
        }
    }
}

/// A responder's answer. Fields beyond the two known ones are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReply {
    #[serde(rename = "IsBusy")]
    pub is_busy: bool,
    #[serde(rename = "MachineType")]
    pub machine_type: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A game that answered a discovery request
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPeer {
    pub reply: DiscoveryReply,
    /// Where the reply came from
    pub addr: SocketAddr,
}

struct Probe {
    socket: UdpSocket,
    deadline: Instant,
    remaining: Option<usize>,
    busy_allowed: bool,
}

impl Probe {
    async fn next_peer(&mut self) -> Option<DiscoveredPeer> {
        if self.remaining == Some(0) {
            return None;
        }

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (n, addr) =
                match tokio::time::timeout_at(self.deadline, self.socket.recv_from(&mut buf)).await {
                    Ok(Ok(received)) => received,
                    Ok(Err(e)) => {
                        tracing::warn!("Discovery receive failed: {}", e);
                        return None;
                    }
                    Err(_) => return None,
                };

            let reply = match serde_json::from_slice::<DiscoveryReply>(&buf[..n]) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(
                        "Unrecognized answer from {}: {} ({})",
                        addr,
                        String::from_utf8_lossy(&buf[..n]),
                        e
                    );
                    continue;
                }
            };

            tracing::debug!(
                "Discovered {} at {} ({})",
                reply.machine_type,
                addr,
                if reply.is_busy { "busy" } else { "free" }
            );
            if reply.is_busy && !self.busy_allowed {
                continue;
            }

            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
            return Some(DiscoveredPeer { reply, addr });
        }
    }
}

/// Broadcast a discovery request and stream the answers.
///
/// The stream ends when the timeout elapses or `count` peers were yielded.
pub async fn discover(
    config: &DiscoveryConfig,
    options: DiscoverOptions,
) -> DiscoveryResult<impl Stream<Item = DiscoveredPeer>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;

    let target = format!("{}:{}", config.broadcast_address, config.port);
    let request = serde_json::to_vec(&DiscoveryRequest::autodiscover()).unwrap_or_default();
    socket.send_to(&request, &target).await?;
    tracing::debug!("Sent discovery request to {}", target);

    let timeout = options
        .timeout
        .unwrap_or_else(|| Duration::from_millis(config.timeout_ms));
    let probe = Probe {
        socket,
        deadline: Instant::now() + timeout,
        remaining: options.count,
        busy_allowed: options.busy_allowed,
    };

    Ok(stream::unfold(probe, |mut probe| async move {
        let peer = probe.next_peer().await?;
        Some((peer, probe))
    }))
}

/// Collect every answer to one discovery round
pub async fn discover_all(
    config: &DiscoveryConfig,
    options: DiscoverOptions,
) -> DiscoveryResult<Vec<DiscoveredPeer>> {
    Ok(discover(config, options).await?.collect().await)
}

/// Answers discovery requests on behalf of a server
pub struct Responder {
    config: DiscoveryConfig,
    /// Whether the responder is running
    running: Arc<AtomicBool>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Bound address, once started
    local_addr: Option<SocketAddr>,
}

impl Responder {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
            local_addr: None,
        }
    }

    /// Start the responder
    pub async fn start(&mut self) -> DiscoveryResult<SocketAddr> {
        if self.running.load(Ordering::SeqCst) {
            return Err(DiscoveryError::AlreadyRunning);
        }

        let bind_addr = format!("0.0.0.0:{}", self.config.port);
        let socket = UdpSocket::bind(&bind_addr).await.map_err(|e| {
            DiscoveryError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        let local_addr = socket.local_addr()?;
        self.local_addr = Some(local_addr);

        let reply = DiscoveryReply {
            is_busy: self.config.is_busy,
            machine_type: self.config.machine_type.clone(),
            extra: serde_json::Map::new(),
        };
        let reply = serde_json::to_vec(&reply).unwrap_or_default();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((n, addr)) => answer(&socket, &buf[..n], addr, &reply).await,
                            Err(e) => tracing::error!("Discovery receive error: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
            tracing::info!("Discovery responder stopped");
        });

        tracing::info!("Discovery responder listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Stop the responder
    pub async fn stop(&mut self) -> DiscoveryResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(DiscoveryError::NotRunning);
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn answer(socket: &UdpSocket, request: &[u8], addr: SocketAddr, reply: &[u8]) {
    match serde_json::from_slice::<DiscoveryRequest>(request) {
        Ok(req) if req.cmd == AUTODISCOVER => {
            tracing::info!("Autodiscover from {}", addr);
            if let Err(e) = socket.send_to(reply, addr).await {
                tracing::warn!("Could not answer {}: {}", addr, e);
            }
        }
        Ok(req) => {
            tracing::warn!("Unrecognized command {:?} from {}", req.cmd, addr);
        }
        Err(e) => {
            tracing::error!("Malformed discovery request from {}: {}", addr, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn local(port: u16) -> DiscoveryConfig {
        DiscoveryConfig {
            port,
            broadcast_address: "127.0.0.1".to_string(),
            timeout_ms: 300,
            ..Default::default()
        }
    }

    #[test]
    fn test_reply_wire_format() {
        let reply: DiscoveryReply = serde_json::from_value(json!({
            "IsBusy": false,
            "MachineType": "PS4",
            "Name": "living room"
        }))
        .unwrap();
        assert_eq!(reply.machine_type, "PS4");
        assert_eq!(reply.extra["Name"], json!("living room"));
        assert_eq!(serde_json::to_value(&reply).unwrap()["IsBusy"], json!(false));

        assert!(serde_json::from_value::<DiscoveryReply>(json!({"IsBusy": true})).is_err());
    }

    #[tokio::test]
    async fn test_discover_responder() {
        let mut responder = Responder::new(DiscoveryConfig {
            port: 0,
            ..Default::default()
        });
        let addr = responder.start().await.unwrap();

        let options = DiscoverOptions {
            count: Some(1),
            ..Default::default()
        };
        let peers = discover_all(&local(addr.port()), options).await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].reply.machine_type, "PC");
        assert!(!peers[0].reply.is_busy);
        assert_eq!(peers[0].addr.port(), addr.port());

        responder.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_filters_busy_and_skips_malformed() {
        let fake = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = fake.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DATAGRAM];
            let (n, from) = fake.recv_from(&mut buf).await.unwrap();
            let request: DiscoveryRequest = serde_json::from_slice(&buf[..n]).unwrap();
            assert_eq!(request, DiscoveryRequest::autodiscover());

            fake.send_to(b"not json", from).await.unwrap();
            fake.send_to(br#"{"IsBusy":true,"MachineType":"PC"}"#, from).await.unwrap();
            fake.send_to(br#"{"IsBusy":false,"MachineType":"XBOX","Slot":2}"#, from)
                .await
                .unwrap();
        });

        let options = DiscoverOptions {
            busy_allowed: false,
            ..Default::default()
        };
        let peers = discover_all(&local(port), options).await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].reply.machine_type, "XBOX");
        assert_eq!(peers[0].reply.extra["Slot"], json!(2));
    }

    #[tokio::test]
    async fn test_responder_ignores_malformed_requests() {
        let mut responder = Responder::new(DiscoveryConfig {
            port: 0,
            is_busy: true,
            ..Default::default()
        });
        let addr = responder.start().await.unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], addr.port()));

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(b"{", target).await.unwrap();
        socket.send_to(br#"{"cmd":"other"}"#, target).await.unwrap();
        socket.send_to(br#"{"cmd":"autodiscover"}"#, target).await.unwrap();

        let mut buf = [0u8; MAX_DATAGRAM];
        let (n, _) = tokio::time::timeout(Duration::from_secs(1), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply: DiscoveryReply = serde_json::from_slice(&buf[..n]).unwrap();
        assert!(reply.is_busy);

        // Only the valid request was answered
        let extra = tokio::time::timeout(Duration::from_millis(100), socket.recv_from(&mut buf)).await;
        assert!(extra.is_err());

        responder.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_discover_times_out_empty() {
        let idle = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = idle.local_addr().unwrap().port();

        let options = DiscoverOptions {
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let peers = discover_all(&local(port), options).await.unwrap();
        assert!(peers.is_empty());
    }
}
