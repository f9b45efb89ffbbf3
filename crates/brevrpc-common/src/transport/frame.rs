//! Frame codec.
//!
//! A frame is an 18 byte [`FrameHeader`] followed by exactly `payload_len`
//! payload bytes. [`FrameDecoder`] is the streaming side: bytes are pushed in
//! as they arrive and complete frames are pulled out, while incomplete input
//! stays buffered untouched until more data shows up.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::protocol::error::{Result, RpcError};
use crate::protocol::header::{FrameHeader, MsgType, HEADER_LEN, MAGIC};
use crate::protocol::RequestId;

/// Maximum payload size (100 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 100 * 1024 * 1024;

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn request_id(&self) -> RequestId {
        self.header.request_id
    }

    pub fn msg_type(&self) -> Option<MsgType> {
        self.header.message_type()
    }
}

/// Writes `header` followed by `payload` into `dst`.
///
/// The header's `payload_len` is taken from `payload`, whatever the caller
/// put there.
pub fn encode_frame_into(header: &FrameHeader, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_SIZE)
        .ok_or_else(|| {
            RpcError::Protocol(format!(
                "payload too large: {} bytes (max {} bytes)",
                payload.len(),
                MAX_PAYLOAD_SIZE
            ))
        })?;

    let mut header = *header;
    header.payload_len = len;
    dst.reserve(HEADER_LEN + payload.len());
    header.encode_into(dst);
    dst.put_slice(payload);
    Ok(())
}

pub fn encode_frame(header: &FrameHeader, payload: &[u8]) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(HEADER_LEN + payload.len());
    encode_frame_into(header, payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Pulls one frame off the front of `buf`.
///
/// - `Ok(None)`: not enough bytes yet; `buf` is left exactly as it was.
/// - `Err(Protocol)`: bad magic or oversized payload; the stream cannot be
///   resynchronised and the connection must be closed.
/// - Frames with an unknown message type are consumed and skipped.
pub fn decode_frame(buf: &mut BytesMut, max_payload: u32) -> Result<Option<Frame>> {
    loop {
        let Some(header) = FrameHeader::decode(&buf[..]) else {
            return Ok(None);
        };

        if header.magic != MAGIC {
            return Err(RpcError::Protocol(format!(
                "bad magic {:#06x}, expected {:#06x}",
                header.magic, MAGIC
            )));
        }
        if header.payload_len > max_payload {
            return Err(RpcError::Protocol(format!(
                "payload too large: {} bytes (max {} bytes)",
                header.payload_len, max_payload
            )));
        }

        let total = HEADER_LEN + header.payload_len as usize;
        if buf.len() < total {
            return Ok(None);
        }

        let mut raw = buf.split_to(total);
        raw.advance(HEADER_LEN);

        if header.message_type().is_none() {
            debug!(
                "Dropping frame {} with unknown message type {}",
                header.request_id, header.msg_type
            );
            continue;
        }

        return Ok(Some(Frame {
            header,
            payload: raw.freeze(),
        }));
    }
}

/// Incremental frame decoder over a byte stream.
///
/// # Example
///
/// ```
/// use brevrpc_common::protocol::{FrameHeader, MsgType};
/// use brevrpc_common::transport::{encode_frame, FrameDecoder};
///
/// let bytes = encode_frame(&FrameHeader::new(MsgType::Request, 0x20, 7), b"{}").unwrap();
///
/// let mut decoder = FrameDecoder::new();
/// decoder.extend(&bytes[..10]);
/// assert!(decoder.decode().unwrap().is_none());
///
/// decoder.extend(&bytes[10..]);
/// let frame = decoder.decode().unwrap().unwrap();
/// assert_eq!(frame.request_id(), 7);
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_payload: u32,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(max_payload: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            max_payload,
        }
    }

    /// Appends raw bytes received from the transport.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes buffered and not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete frame, if one is buffered.
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        decode_frame(&mut self.buffer, self.max_payload)
    }

    /// Reads whatever the transport has ready into the buffer.
    ///
    /// Returns the number of bytes read; `0` means the peer closed the stream.
    pub async fn read_from<R>(&mut self, reader: &mut R) -> std::io::Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        reader.read_buf(&mut self.buffer).await
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
