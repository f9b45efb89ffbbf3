//! brevrpc Transport Layer
//!
//! This module turns byte streams into frames and frames into typed messages.
//!
//! # Wire Format
//!
//! ```text
//! magic:i16 | version:i8 | serialization:i8 | msg_type:i8 | status:i8 | request_id:i64 | payload_len:i32 | payload
//! ```
//!
//! # Components
//!
//! - **[`Codec`]**: payload codecs selected by the serialization tag
//!   (MessagePack `0x10`, JSON `0x20`, Postcard `0x30`)
//! - **[`FrameDecoder`]** / **[`encode_frame`]**: the framing layer
//! - **[`Envelope`]**: decoded payload plus the id and codec it travelled with
//! - **[`heartbeat_pong`]**: the reply every side sends to a heartbeat ping
//!
//! # Message Size Limits
//!
//! Payloads are capped at [`MAX_PAYLOAD_SIZE`] (100 MB); a larger declared
//! length is a protocol error.

pub mod codec;
pub mod frame;
pub mod message;
pub mod stream;

pub use codec::{Codec, JsonCodec, MsgPackCodec, PostcardCodec, SerializationType};
pub use frame::{decode_frame, encode_frame, encode_frame_into, Frame, FrameDecoder, MAX_PAYLOAD_SIZE};
pub use message::{heartbeat_ping, heartbeat_pong, Envelope, Message, PING_BODY};
pub use stream::{AsyncStream, BoxedStream};
