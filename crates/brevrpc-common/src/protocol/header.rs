//! Fixed frame header.
//!
//! ```text
//! magic:i16 | version:i8 | serialization:i8 | msg_type:i8 | status:i8 | request_id:i64 | payload_len:i32
//! ```
//!
//! All fields are big-endian. The header is always [`HEADER_LEN`] bytes.

use bytes::{Buf, BufMut};

use super::requests::RequestId;

/// Protocol identity, checked on every inbound frame.
pub const MAGIC: u16 = 0x10;

pub const VERSION: u8 = 0x1;

pub const HEADER_LEN: usize = 18;

/// Frame message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    Request = 1,
    Response = 2,
    HeartbeatPing = 3,
    HeartbeatPong = 4,
}

impl MsgType {
    /// Maps a wire byte to a message type, `None` for types this side does
    /// not understand.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MsgType::Request),
            2 => Some(MsgType::Response),
            3 => Some(MsgType::HeartbeatPing),
            4 => Some(MsgType::HeartbeatPong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgStatus {
    Success = 0,
    Fail = 1,
}

impl MsgStatus {
    /// Any non-zero status byte reads as a failure.
    pub fn from_u8(value: u8) -> Self {
        if value == MsgStatus::Success as u8 {
            MsgStatus::Success
        } else {
            MsgStatus::Fail
        }
    }
}

/// Decoded header of one frame.
///
/// `msg_type` is kept as the raw byte so that frames with unknown types can
/// still be measured and skipped by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u16,
    pub version: u8,
    pub serialization: u8,
    pub msg_type: u8,
    pub status: u8,
    pub request_id: RequestId,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn new(msg_type: MsgType, serialization: u8, request_id: RequestId) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            serialization,
            msg_type: msg_type as u8,
            status: MsgStatus::Success as u8,
            request_id,
            payload_len: 0,
        }
    }

    pub fn with_status(mut self, status: MsgStatus) -> Self {
        self.status = status as u8;
        self
    }

    pub fn message_type(&self) -> Option<MsgType> {
        MsgType::from_u8(self.msg_type)
    }

    pub fn message_status(&self) -> MsgStatus {
        MsgStatus::from_u8(self.status)
    }

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.magic);
        buf.put_u8(self.version);
        buf.put_u8(self.serialization);
        buf.put_u8(self.msg_type);
        buf.put_u8(self.status);
        buf.put_u64(self.request_id);
        buf.put_u32(self.payload_len);
    }

    /// Reads a header from the first [`HEADER_LEN`] bytes of `bytes`.
    ///
    /// Returns `None` if fewer bytes are available. The magic is not
    /// validated here.
    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            magic: bytes.get_u16(),
            version: bytes.get_u8(),
            serialization: bytes.get_u8(),
            msg_type: bytes.get_u8(),
            status: bytes.get_u8(),
            request_id: bytes.get_u64(),
            payload_len: bytes.get_u32(),
        })
    }
}
