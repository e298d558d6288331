//! Binary frame codec for the agent channel.
//!
//! Every frame is one binary WebSocket message: a type byte, a big-endian
//! 32-bit stream id, and the payload. Stream id 0 is the control stream and
//! carries only PING/PONG.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the fixed frame header (type byte + stream id).
pub const HEADER_LEN: usize = 5;

/// Stream id reserved for connection-level control frames.
pub const CONTROL_STREAM_ID: u32 = 0;

/// Decode failures. The dispatcher drops these frames silently.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame shorter than header: {0} bytes")]
    TooShort(usize),
    #[error("unknown frame type {0:#04x}")]
    UnknownType(u8),
}

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Gateway opens a stream; payload is the serialized request head.
    Open = 0x01,
    /// Body bytes, either direction.
    Data = 0x02,
    /// Clean end of a stream.
    End = 0x03,
    /// Abortive end of a stream.
    Cancel = 0x04,
    /// Agent response head; payload is the CRLF-delimited header block.
    RespHeaders = 0x05,
    /// Keepalive probe on the control stream.
    Ping = 0x09,
    /// Keepalive reply on the control stream.
    Pong = 0x0a,
}

impl FrameType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(FrameType::Open),
            0x02 => Some(FrameType::Data),
            0x03 => Some(FrameType::End),
            0x04 => Some(FrameType::Cancel),
            0x05 => Some(FrameType::RespHeaders),
            0x09 => Some(FrameType::Ping),
            0x0a => Some(FrameType::Pong),
            _ => None,
        }
    }
}

/// A single frame on the agent channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(frame_type: FrameType, stream_id: u32, payload: Bytes) -> Self {
        Self {
            frame_type,
            stream_id,
            payload,
        }
    }

    /// Create an OPEN frame carrying a serialized request head.
    pub fn open(stream_id: u32, head: Bytes) -> Self {
        Self::new(FrameType::Open, stream_id, head)
    }

    /// Create a DATA frame carrying a body chunk.
    pub fn data(stream_id: u32, chunk: Bytes) -> Self {
        Self::new(FrameType::Data, stream_id, chunk)
    }

    /// Create an END frame.
    pub fn end(stream_id: u32) -> Self {
        Self::new(FrameType::End, stream_id, Bytes::new())
    }

    /// Create a CANCEL frame.
    pub fn cancel(stream_id: u32) -> Self {
        Self::new(FrameType::Cancel, stream_id, Bytes::new())
    }

    /// Create a PING frame on the control stream.
    pub fn ping() -> Self {
        Self::new(FrameType::Ping, CONTROL_STREAM_ID, Bytes::new())
    }

    /// Create a PONG frame on the control stream.
    pub fn pong() -> Self {
        Self::new(FrameType::Pong, CONTROL_STREAM_ID, Bytes::new())
    }

    /// Check if this is a control frame (stream id 0).
    pub fn is_control(&self) -> bool {
        self.stream_id == CONTROL_STREAM_ID
    }

    /// Serialize to one binary message.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(self.frame_type as u8);
        buf.put_u32(self.stream_id);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse one binary message. Messages shorter than the header or with an
    /// unknown type byte are rejected; the caller is expected to drop them.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::TooShort(data.len()));
        }
        let frame_type =
            FrameType::from_u8(data[0]).ok_or(FrameError::UnknownType(data[0]))?;
        let stream_id = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        Ok(Self {
            frame_type,
            stream_id,
            payload: Bytes::copy_from_slice(&data[HEADER_LEN..]),
        })
    }
}
