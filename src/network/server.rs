//! Pipboy Server
//!
//! The server plays the game's side: it accepts companion connections and
//! keeps each one in sync with a shared model.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

use super::connection::{Connection, ConnectionError, ConnectionHandle};
use super::session::Session;
use super::NetworkConfig;
use crate::model::Model;
use crate::protocol::ServerInfo;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A companion has connected and received the initial dump
    ClientConnected { addr: SocketAddr },
    /// A companion has disconnected
    ClientDisconnected { addr: SocketAddr, reason: String },
    /// Server started
    Started { bind_addr: SocketAddr },
    /// Server stopped
    Stopped,
}

type Sessions = Arc<RwLock<HashMap<SocketAddr, ConnectionHandle>>>;

/// Pipboy Server
pub struct Server {
    /// Server configuration
    config: NetworkConfig,
    /// Announced on the config channel
    info: ServerInfo,
    /// Model shared by every session
    model: Arc<Model>,
    /// Open sessions
    sessions: Sessions,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal for the accept loop
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Whether the server is running
    running: Arc<AtomicBool>,
    /// Bound address, once started
    local_addr: Option<SocketAddr>,
}

impl Server {
    /// Create a new server
    pub fn new(config: NetworkConfig, model: Arc<Model>, info: ServerInfo) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            info,
            model,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Start the server
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Server listening on {}", local_addr);
        self.local_addr = Some(local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.running.store(true, Ordering::SeqCst);

        let _ = self.event_tx.send(ServerEvent::Started { bind_addr: local_addr }).await;

        let sessions = self.sessions.clone();
        let event_tx = self.event_tx.clone();
        let running = self.running.clone();
        let model = self.model.clone();
        let info = self.info.clone();
        let max_frame_size = self.config.max_frame_size;

        // Spawn the accept loop
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::info!("New connection from {}", addr);

                                let ctx = SessionContext {
                                    model: model.clone(),
                                    info: info.clone(),
                                    sessions: sessions.clone(),
                                    event_tx: event_tx.clone(),
                                    running: running.clone(),
                                    max_frame_size,
                                };

                                tokio::spawn(async move {
                                    if let Err(e) = handle_client(stream, addr, ctx).await {
                                        tracing::error!("Client handler error: {}", e);
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
            let _ = event_tx.send(ServerEvent::Stopped).await;
        });

        Ok(local_addr)
    }

    /// Stop accepting and end every session
    pub async fn stop(&mut self) -> ServerResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(ServerError::NotRunning);
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        let sessions = self.sessions.read().await;
        for handle in sessions.values() {
            let _ = handle.close();
        }

        Ok(())
    }

    /// Address the server is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

struct SessionContext {
    model: Arc<Model>,
    info: ServerInfo,
    sessions: Sessions,
    event_tx: mpsc::Sender<ServerEvent>,
    running: Arc<AtomicBool>,
    max_frame_size: usize,
}

/// Handle a companion connection
async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: SessionContext,
) -> Result<(), ConnectionError> {
    let conn = Connection::with_max_frame_size(stream, addr, ctx.max_frame_size);
    let mut session = Session::new(conn, ctx.model);

    session.greet(&ctx.info).await?;

    let handle = session.handle();
    ctx.sessions.write().await.insert(addr, handle);

    let _ = ctx.event_tx.send(ServerEvent::ClientConnected { addr }).await;

    let reason = session.run(&ctx.running).await;
    tracing::info!("Client {} disconnected: {}", addr, reason);

    ctx.sessions.write().await.remove(&addr);

    let _ = ctx
        .event_tx
        .send(ServerEvent::ClientDisconnected { addr, reason })
        .await;

    Ok(())
}
