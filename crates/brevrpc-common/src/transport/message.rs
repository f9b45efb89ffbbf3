//! Typed view of frames.
//!
//! [`Envelope`] pairs a decoded payload with the request id and codec of the
//! frame that carried it, so replies can be built with the same id and tag.

use bytes::Bytes;

use crate::protocol::error::{Result, RpcError};
use crate::protocol::header::{FrameHeader, MsgStatus, MsgType};
use crate::protocol::{Request, RequestId, Response};
use crate::transport::codec::{Codec, SerializationType};
use crate::transport::frame::{encode_frame, Frame};

/// Body sent with every heartbeat ping.
pub const PING_BODY: &str = "heart ping";

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Ping(String),
    Pong(String),
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Request(_) => MsgType::Request,
            Message::Response(_) => MsgType::Response,
            Message::Ping(_) => MsgType::HeartbeatPing,
            Message::Pong(_) => MsgType::HeartbeatPong,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub request_id: RequestId,
    pub serialization: SerializationType,
    pub message: Message,
}

impl Envelope {
    pub fn new(request_id: RequestId, serialization: SerializationType, message: Message) -> Self {
        Self {
            request_id,
            serialization,
            message,
        }
    }

    /// Decodes the payload of a frame with the codec its tag names.
    ///
    /// A FAIL status on a RESPONSE frame whose body lacks an error message
    /// still yields a failed [`Response`].
    pub fn decode(frame: &Frame) -> Result<Self> {
        let serialization = SerializationType::try_from(frame.header.serialization)?;
        let codec = serialization.codec();
        let msg_type = frame.msg_type().ok_or_else(|| {
            RpcError::Protocol(format!("unknown message type {}", frame.header.msg_type))
        })?;

        let message = match msg_type {
            MsgType::Request => Message::Request(codec.decode(&frame.payload)?),
            MsgType::Response => {
                let mut response: Response = codec.decode(&frame.payload)?;
                if frame.header.message_status() == MsgStatus::Fail && response.error.is_none() {
                    response = Response::error("remote call failed");
                }
                Message::Response(response)
            }
            MsgType::HeartbeatPing => Message::Ping(codec.decode(&frame.payload)?),
            MsgType::HeartbeatPong => Message::Pong(codec.decode(&frame.payload)?),
        };

        Ok(Self::new(frame.request_id(), serialization, message))
    }

    /// Encodes the envelope as a complete frame.
    pub fn encode(&self) -> Result<Bytes> {
        let codec: &Codec = self.serialization.codec();
        let (payload, status) = match &self.message {
            Message::Request(request) => (codec.encode(request)?, MsgStatus::Success),
            Message::Response(response) => {
                let status = if response.is_success() {
                    MsgStatus::Success
                } else {
                    MsgStatus::Fail
                };
                (codec.encode(response)?, status)
            }
            Message::Ping(body) | Message::Pong(body) => (codec.encode(body)?, MsgStatus::Success),
        };

        let header = FrameHeader::new(self.message.msg_type(), self.serialization.tag(), self.request_id)
            .with_status(status);
        encode_frame(&header, &payload)
    }
}

/// Builds a heartbeat ping frame.
pub fn heartbeat_ping(request_id: RequestId, serialization: SerializationType) -> Result<Bytes> {
    Envelope::new(request_id, serialization, Message::Ping(PING_BODY.to_string())).encode()
}

/// Builds the pong answering `ping`: same request id and codec, success
/// status, and a short text naming the answering side.
pub fn heartbeat_pong(ping: &FrameHeader, local_addr: &str) -> Result<Bytes> {
    let serialization = SerializationType::try_from(ping.serialization)?;
    let body = format!("server: {} return a heart pong", local_addr);
    Envelope::new(ping.request_id, serialization, Message::Pong(body)).encode()
}
