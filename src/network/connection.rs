//! Connection handling
//!
//! Manages the framed byte stream of one session, including:
//! - Frame encoding/decoding
//! - End-of-stream classification
//! - Session state and statistics

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::session::Outbound;
use crate::protocol::{CodecError, Decoder, Encoder, Frame, MAX_FRAME_SIZE};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    /// The peer closed the stream between frames
    #[error("Peer disconnected")]
    Disconnected,

    /// The peer closed the stream in the middle of a frame
    #[error("Connection closed mid-frame")]
    Closed,

    #[error("Send channel closed")]
    SendChannelClosed,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket open, initial frames not yet exchanged
    Connecting,
    /// Dispatch loop running
    Active,
    /// Teardown in progress
    Disconnecting,
    /// Socket closed
    Closed,
}

/// Framed stream to a remote peer
pub struct Connection<S = TcpStream> {
    /// Remote peer address
    remote_addr: SocketAddr,
    /// The underlying stream
    stream: S,
    /// Frame encoder
    encoder: Encoder,
    /// Frame decoder
    decoder: Decoder,
    /// Read buffer
    read_buf: BytesMut,
    /// Write buffer
    write_buf: BytesMut,
    /// Session state
    state: SessionState,
    /// Statistics
    stats: ConnectionStats,
}

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Frames sent
    pub frames_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new connection from an established stream
    pub fn new(stream: S, remote_addr: SocketAddr) -> Self {
        Self::with_max_frame_size(stream, remote_addr, MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(stream: S, remote_addr: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            remote_addr,
            stream,
            encoder: Encoder::new(max_frame_size),
            decoder: Decoder::new(max_frame_size),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            state: SessionState::Connecting,
            stats: ConnectionStats::default(),
        }
    }

    /// Get the remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        tracing::debug!("Session {} {:?} -> {:?}", self.remote_addr, self.state, state);
        self.state = state;
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Send a frame
    pub async fn send(&mut self, frame: &Frame) -> ConnectionResult<()> {
        self.write_buf.clear();
        self.encoder.encode(frame, &mut self.write_buf)?;

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.frames_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;
        Ok(())
    }

    /// Receive the next complete frame.
    ///
    /// End-of-stream on a frame boundary is `Disconnected`; anywhere else it
    /// is `Closed`.
    pub async fn recv(&mut self) -> ConnectionResult<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.read_buf)? {
                self.stats.frames_received += 1;
                return Ok(frame);
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                if self.decoder.is_mid_frame(&self.read_buf) {
                    return Err(ConnectionError::Closed);
                }
                return Err(ConnectionError::Disconnected);
            }

            self.read_buf.extend_from_slice(&buf[..n]);
            self.stats.bytes_received += n as u64;
        }
    }

    /// Close the stream
    pub async fn close(&mut self) -> ConnectionResult<()> {
        self.set_state(SessionState::Disconnecting);
        let result = self.stream.shutdown().await;
        self.set_state(SessionState::Closed);
        result.map_err(ConnectionError::from)
    }
}

/// A handle for queueing work on a session's outbound queue
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sender: mpsc::UnboundedSender<Outbound>,
    connected: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            sender,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Queue outbound work. Never blocks, so it is safe from model listeners.
    pub fn send(&self, outbound: Outbound) -> ConnectionResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectionError::Disconnected);
        }

        self.sender
            .send(outbound)
            .map_err(|_| ConnectionError::SendChannelClosed)
    }

    /// Ask the session to end its dispatch loop
    pub fn close(&self) -> ConnectionResult<()> {
        self.send(Outbound::Close)
    }

    /// Check if the session is still active
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Mark the session as disconnected
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
