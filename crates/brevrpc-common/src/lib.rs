//! brevrpc Common Types and Transport
//!
//! This crate provides the protocol definitions and framing layer shared by
//! the brevrpc client and server.
//!
//! # Overview
//!
//! - **Protocol Layer**: frame header, Request/Response bodies, request ids
//!   and the [`RpcError`] type
//! - **Transport Layer**: payload codecs, the incremental frame decoder and
//!   typed message envelopes
//!
//! # Example
//!
//! ```
//! use brevrpc_common::protocol::Request;
//! use brevrpc_common::transport::{Envelope, FrameDecoder, Message, SerializationType};
//!
//! let codec = SerializationType::Json.codec();
//! let request = Request::new("HelloFacade", "hello_rpc", "1.0.0")
//!     .with_param_types(["String"])
//!     .with_args(codec.encode(&("Tom",)).unwrap());
//!
//! let bytes = Envelope::new(1, SerializationType::Json, Message::Request(request))
//!     .encode()
//!     .unwrap();
//!
//! let mut decoder = FrameDecoder::new();
//! decoder.extend(&bytes);
//! let frame = decoder.decode().unwrap().unwrap();
//! assert_eq!(frame.request_id(), 1);
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
