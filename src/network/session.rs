//! Session dispatch
//!
//! A session owns one [`Connection`] and is the only writer to its socket.
//! Model listeners registered by the session never touch the socket; they
//! queue [`Outbound`] work that the dispatch loop drains between reads.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::connection::{Connection, ConnectionError, ConnectionHandle, ConnectionResult, SessionState};
use crate::format::channel;
use crate::model::{EventKind, Id, Item, ListenerId, Model, ModelEvent, ROOT};
use crate::protocol::{Channel, CommandMessage, Frame, ServerInfo};

/// Work queued for a session's socket
#[derive(Debug)]
pub enum Outbound {
    /// Send the current values of these items on the update channel
    Updates(Vec<Id>),
    /// Forward local-map data verbatim
    Map(Bytes),
    /// Send a command, numbered by the session
    Command {
        kind: i64,
        args: serde_json::Value,
    },
    /// Send a ready-made frame
    Frame(Frame),
    /// End the dispatch loop
    Close,
}

pub struct Session<S = TcpStream> {
    conn: Connection<S>,
    model: Arc<Model>,
    handle: ConnectionHandle,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    listeners: Vec<(EventKind, ListenerId)>,
    next_command_id: u64,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(conn: Connection<S>, model: Arc<Model>) -> Self {
        let (tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            conn,
            model,
            handle: ConnectionHandle::new(tx),
            outbound_rx,
            listeners: Vec::new(),
            next_command_id: 1,
        }
    }

    /// Handle for queueing work on this session
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.conn.state()
    }

    /// Forward model events of `kind` to the peer
    pub fn subscribe(&mut self, kind: EventKind) {
        let handle = self.handle.clone();
        let id = self.model.register(kind, move |event| {
            let outbound = match event {
                ModelEvent::Update(ids) => Outbound::Updates(ids.to_vec()),
                ModelEvent::MapUpdate(data) => Outbound::Map(Bytes::copy_from_slice(data)),
                ModelEvent::Command { kind, args } => Outbound::Command {
                    kind: *kind,
                    args: (*args).clone(),
                },
            };
            if let Err(e) = handle.send(outbound) {
                tracing::debug!("Dropping {} event for closed session: {}", event.kind(), e);
            }
        });
        self.listeners.push((kind, id));
    }

    /// Open a companion session: forward updates and map data, then send the
    /// config and the full graph. Changes made while the dump is in flight
    /// are queued behind it.
    pub async fn greet(&mut self, info: &ServerInfo) -> ConnectionResult<()> {
        self.subscribe(EventKind::Update);
        self.subscribe(EventKind::MapUpdate);
        self.send_server_info(info).await?;
        self.send_full_dump().await
    }

    /// Announce the server on the config channel
    pub async fn send_server_info(&mut self, info: &ServerInfo) -> ConnectionResult<()> {
        let payload = serde_json::to_vec(info).unwrap_or_default();
        self.conn.send(&Frame::new(Channel::Config, payload)).await
    }

    /// Send the whole graph on the update channel
    pub async fn send_full_dump(&mut self) -> ConnectionResult<()> {
        let items = self.model.dump(ROOT, true).unwrap_or_default();
        let payload = self.encode(&items);
        self.conn.send(&Frame::new(Channel::Update, payload)).await
    }

    /// Encode items for the update channel, skipping the ones that cannot
    /// be represented
    fn encode(&self, items: &[Item]) -> Bytes {
        let (payload, skipped) = channel::dump_lossy(items);
        for e in &skipped {
            tracing::error!("Skipping item for {}: {}", self.conn.remote_addr(), e);
        }
        payload
    }

    /// Run the dispatch loop, then tear the session down.
    ///
    /// Returns the reason the loop ended.
    pub async fn run(mut self, running: &AtomicBool) -> String {
        self.conn.set_state(SessionState::Active);
        let reason = self.dispatch_loop(running).await;
        self.teardown().await;
        reason
    }

    async fn dispatch_loop(&mut self, running: &AtomicBool) -> String {
        while running.load(Ordering::SeqCst) {
            tokio::select! {
                result = self.conn.recv() => {
                    match result {
                        Ok(frame) => self.dispatch(frame),
                        Err(ConnectionError::Disconnected) => {
                            return "Connection closed".to_string();
                        }
                        Err(e) => {
                            return format!("Error: {}", e);
                        }
                    }
                }

                Some(outbound) = self.outbound_rx.recv() => {
                    if matches!(outbound, Outbound::Close) {
                        return "Session closed locally".to_string();
                    }
                    if let Err(e) = self.flush(outbound).await {
                        return format!("Send error: {}", e);
                    }
                }
            }
        }
        "Session stopped".to_string()
    }

    /// Apply one received frame. Bad payloads are logged and dropped.
    fn dispatch(&mut self, frame: Frame) {
        let addr = self.conn.remote_addr();
        match frame.kind() {
            Some(Channel::Heartbeat) => {
                tracing::trace!("Heartbeat from {}", addr);
            }
            Some(Channel::Config) => match serde_json::from_slice::<ServerInfo>(&frame.payload) {
                Ok(info) => {
                    tracing::info!("Peer {} runs version {} ({})", addr, info.version, info.lang)
                }
                Err(e) => tracing::warn!("Malformed config from {}: {}", addr, e),
            },
            Some(Channel::Update) => {
                let items = channel::load(&frame.payload);
                tracing::debug!("Received {} items from {}", items.len(), addr);
                self.model.update(items);
            }
            Some(Channel::Map) => {
                self.model.map_update(&frame.payload);
            }
            Some(Channel::Command) => {
                match serde_json::from_slice::<CommandMessage>(&frame.payload) {
                    Ok(cmd) => {
                        tracing::debug!("Command {} (id {}) from {}", cmd.kind, cmd.id, addr);
                        self.model.command(cmd.kind, &cmd.args);
                    }
                    Err(e) => tracing::warn!("Malformed command from {}: {}", addr, e),
                }
            }
            None => {
                tracing::warn!(
                    "Dropping {} byte frame on unknown channel {} from {}",
                    frame.payload.len(),
                    frame.channel,
                    addr
                );
            }
        }
    }

    /// Write one piece of queued work to the socket
    async fn flush(&mut self, outbound: Outbound) -> ConnectionResult<()> {
        let frame = match outbound {
            Outbound::Updates(ids) => {
                let items: Vec<_> = ids
                    .into_iter()
                    .filter_map(|id| self.model.dump(id, false))
                    .flatten()
                    .collect();
                let payload = self.encode(&items);
                if payload.is_empty() {
                    return Ok(());
                }
                Frame::new(Channel::Update, payload)
            }
            Outbound::Map(data) => Frame::new(Channel::Map, data),
            Outbound::Command { kind, args } => {
                let id = self.next_command_id;
                self.next_command_id += 1;
                match serde_json::to_vec(&CommandMessage::new(kind, args, id)) {
                    Ok(payload) => Frame::new(Channel::Command, payload),
                    Err(e) => {
                        tracing::error!("Dropping command {}: {}", kind, e);
                        return Ok(());
                    }
                }
            }
            Outbound::Frame(frame) => frame,
            Outbound::Close => return Ok(()),
        };
        self.conn.send(&frame).await
    }

    async fn teardown(&mut self) {
        self.handle.mark_disconnected();
        let stats = self.conn.stats();
        tracing::debug!(
            "Session with {} ending: {} frames sent, {} received",
            self.conn.remote_addr(),
            stats.frames_sent,
            stats.frames_received
        );
        for (kind, id) in self.listeners.drain(..) {
            self.model.unregister(kind, id);
        }
        if let Err(e) = self.conn.close().await {
            tracing::debug!("Error closing {}: {}", self.conn.remote_addr(), e);
        }
    }
}

impl<S> Drop for Session<S> {
    fn drop(&mut self) {
        for (kind, id) in self.listeners.drain(..) {
            self.model.unregister(kind, id);
        }
    }
}
