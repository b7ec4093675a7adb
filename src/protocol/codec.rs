//! Frame codec
//!
//! Handles framing of channel payloads on the TCP stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Default maximum payload size (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Header size: length(4) + channel(1) = 5 bytes
pub const HEADER_SIZE: usize = 5;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),
}

/// Logical sub-streams of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    Heartbeat = 0,
    Config = 1,
    Update = 3,
    Map = 4,
    Command = 5,
}

impl Channel {
    pub fn from_u8(channel: u8) -> Option<Self> {
        match channel {
            0 => Some(Channel::Heartbeat),
            1 => Some(Channel::Config),
            3 => Some(Channel::Update),
            4 => Some(Channel::Map),
            5 => Some(Channel::Command),
            _ => None,
        }
    }
}

/// One unit of the TCP wire protocol.
///
/// The channel is kept raw so unknown channels can be reported instead of
/// rejected at the framing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(channel: Channel, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel as u8,
            payload: payload.into(),
        }
    }

    /// Empty keep-alive frame
    pub fn heartbeat() -> Self {
        Self::new(Channel::Heartbeat, Bytes::new())
    }

    pub fn kind(&self) -> Option<Channel> {
        Channel::from_u8(self.channel)
    }
}

/// Encodes frames into the wire format
pub struct Encoder {
    max_frame_size: usize,
}

impl Encoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Encode a frame into a buffer
    pub fn encode(&self, frame: &Frame, buf: &mut BytesMut) -> Result<(), CodecError> {
        let len = frame.payload.len();
        if len > self.max_frame_size || len > u32::MAX as usize {
            return Err(CodecError::FrameTooLarge(len, self.max_frame_size));
        }

        buf.reserve(HEADER_SIZE + len);
        buf.put_u32_le(len as u32);
        buf.put_u8(frame.channel);
        buf.put_slice(&frame.payload);
        Ok(())
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

/// Decodes frames from the wire format
pub struct Decoder {
    state: DecodeState,
    max_frame_size: usize,
}

#[derive(Default)]
enum DecodeState {
    #[default]
    Header,
    Payload {
        channel: u8,
        length: usize,
    },
}

impl Decoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            state: DecodeState::Header,
            max_frame_size,
        }
    }

    /// Whether a frame has been started but not completed
    pub fn is_mid_frame(&self, buf: &BytesMut) -> bool {
        !buf.is_empty() || matches!(self.state, DecodeState::Payload { .. })
    }

    /// Attempt to decode a frame from the buffer
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        loop {
            match &self.state {
                DecodeState::Header => {
                    if buf.len() < HEADER_SIZE {
                        return Ok(None);
                    }

                    let length = buf.get_u32_le() as usize;
                    let channel = buf.get_u8();

                    if length > self.max_frame_size {
                        return Err(CodecError::FrameTooLarge(length, self.max_frame_size));
                    }

                    buf.reserve(length);
                    self.state = DecodeState::Payload { channel, length };
                }
                DecodeState::Payload { channel, length } => {
                    if buf.len() < *length {
                        return Ok(None);
                    }

                    let payload = buf.split_to(*length).freeze();
                    let frame = Frame {
                        channel: *channel,
                        payload,
                    };

                    self.state = DecodeState::Header;

                    return Ok(Some(frame));
                }
            }
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}
