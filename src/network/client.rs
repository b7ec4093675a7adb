//! Pipboy Client
//!
//! Connects to a game, mirrors its model and forwards commands issued on
//! the local model.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};

use super::connection::{Connection, ConnectionError, ConnectionHandle};
use super::session::{Outbound, Session};
use super::NetworkConfig;
use crate::model::{EventKind, Model};
use crate::protocol::Frame;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Connection timeout")]
    Timeout,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Events emitted by the client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Successfully connected to a game
    Connected { server_addr: SocketAddr },
    /// Disconnected from the game
    Disconnected { reason: String },
}

/// Client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// Pipboy Client
pub struct Client {
    /// Client configuration
    config: NetworkConfig,
    /// Local mirror of the game's model
    model: Arc<Model>,
    /// Current state
    state: Arc<RwLock<ClientState>>,
    /// Event sender
    event_tx: mpsc::Sender<ClientEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    /// Handle for queueing work on the session
    connection_handle: Arc<RwLock<Option<ConnectionHandle>>>,
    /// Cleared to stop the session and heartbeat tasks
    running: Arc<AtomicBool>,
}

impl Client {
    /// Create a new client
    pub fn new(config: NetworkConfig, model: Arc<Model>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            model,
            state: Arc::new(RwLock::new(ClientState::Disconnected)),
            event_tx,
            event_rx: Some(event_rx),
            connection_handle: Arc::new(RwLock::new(None)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Connect to a game by address
    pub async fn connect(&self, server_addr: SocketAddr) -> ClientResult<()> {
        {
            let mut state = self.state.write().await;
            if *state != ClientState::Disconnected {
                return Err(ClientError::AlreadyConnected);
            }
            *state = ClientState::Connecting;
        }

        tracing::info!("Connecting to {}", server_addr);

        // Connect with timeout
        let stream = match tokio::time::timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(server_addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                *self.state.write().await = ClientState::Disconnected;
                return Err(ClientError::Io(e));
            }
            Err(_) => {
                *self.state.write().await = ClientState::Disconnected;
                return Err(ClientError::Timeout);
            }
        };

        let conn = Connection::with_max_frame_size(stream, server_addr, self.config.max_frame_size);
        let mut session = Session::new(conn, self.model.clone());
        session.subscribe(EventKind::Command);

        let handle = session.handle();
        *self.connection_handle.write().await = Some(handle.clone());

        self.running.store(true, Ordering::SeqCst);
        *self.state.write().await = ClientState::Connected;

        let _ = self.event_tx.send(ClientEvent::Connected { server_addr }).await;

        // Heartbeats go through the outbound queue like any other send
        let heartbeat_interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        let heartbeat_running = self.running.clone();
        tokio::spawn(async move {
            let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
            loop {
                heartbeat_timer.tick().await;
                if !heartbeat_running.load(Ordering::SeqCst) {
                    break;
                }
                if handle.send(Outbound::Frame(Frame::heartbeat())).is_err() {
                    break;
                }
            }
            tracing::debug!("Heartbeat task for {} finished", server_addr);
        });

        // Spawn the dispatch loop
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let connection_handle = self.connection_handle.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let reason = session.run(&running).await;
            tracing::info!("Disconnected from {}: {}", server_addr, reason);

            running.store(false, Ordering::SeqCst);
            *connection_handle.write().await = None;
            *state.write().await = ClientState::Disconnected;

            let _ = event_tx.send(ClientEvent::Disconnected { reason }).await;
        });

        Ok(())
    }

    /// Disconnect from the game
    pub async fn disconnect(&self) -> ClientResult<()> {
        if *self.state.read().await == ClientState::Disconnected {
            return Err(ClientError::NotConnected);
        }

        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = &*self.connection_handle.read().await {
            let _ = handle.close();
        }

        Ok(())
    }

    /// Get the current state
    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ClientState::Connected
    }
}
