use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::error::{Result, RpcError};

/// Serialization tags carried in the frame header.
///
/// Client and server must agree on the tag; any other byte is rejected with
/// [`RpcError::UnknownSerialization`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SerializationType {
    /// MessagePack, compact and self-describing
    MsgPack = 0x10,
    /// JSON, human-readable
    Json = 0x20,
    /// Postcard, compact binary (default)
    Postcard = 0x30,
}

impl SerializationType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn codec(self) -> &'static Codec {
        match self {
            SerializationType::MsgPack => &MSGPACK,
            SerializationType::Json => &JSON,
            SerializationType::Postcard => &POSTCARD,
        }
    }
}

impl Default for SerializationType {
    fn default() -> Self {
        SerializationType::Postcard
    }
}

impl TryFrom<u8> for SerializationType {
    type Error = RpcError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0x10 => Ok(SerializationType::MsgPack),
            0x20 => Ok(SerializationType::Json),
            0x30 => Ok(SerializationType::Postcard),
            other => Err(RpcError::UnknownSerialization(other)),
        }
    }
}

impl std::str::FromStr for SerializationType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "msgpack" | "messagepack" => Ok(SerializationType::MsgPack),
            "json" => Ok(SerializationType::Json),
            "postcard" => Ok(SerializationType::Postcard),
            other => Err(format!("unknown serialization '{}'", other)),
        }
    }
}

static MSGPACK: Codec = Codec::MsgPack(MsgPackCodec);
static JSON: Codec = Codec::Json(JsonCodec);
static POSTCARD: Codec = Codec::Postcard(PostcardCodec);

/// Payload codec selected by a frame's serialization tag.
///
/// Codecs hold no state, so one shared instance per tag serves every
/// connection.
///
/// # Example
///
/// ```
/// use brevrpc_common::transport::Codec;
///
/// let codec = Codec::for_tag(0x20).unwrap();
/// let bytes = codec.encode(&("Tom", 3u32)).unwrap();
/// let (name, n): (String, u32) = codec.decode(&bytes).unwrap();
/// assert_eq!((name.as_str(), n), ("Tom", 3));
///
/// assert!(Codec::for_tag(0x99).is_err());
/// ```
#[derive(Debug)]
pub enum Codec {
    MsgPack(MsgPackCodec),
    Json(JsonCodec),
    Postcard(PostcardCodec),
}

impl Codec {
    /// Looks up the shared codec for a wire tag.
    pub fn for_tag(tag: u8) -> Result<&'static Codec> {
        SerializationType::try_from(tag).map(SerializationType::codec)
    }

    pub fn serialization_type(&self) -> SerializationType {
        match self {
            Codec::MsgPack(_) => SerializationType::MsgPack,
            Codec::Json(_) => SerializationType::Json,
            Codec::Postcard(_) => SerializationType::Postcard,
        }
    }

    pub fn tag(&self) -> u8 {
        self.serialization_type().tag()
    }

    /// Encode a value to bytes
    ///
    /// # Arguments
    ///
    /// * `value` - Any serde-serializable value
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::MsgPack(_) => MsgPackCodec::encode(value),
            Codec::Json(_) => JsonCodec::encode(value),
            Codec::Postcard(_) => PostcardCodec::encode(value),
        }
    }

    /// Decode a value from bytes
    ///
    /// # Arguments
    ///
    /// * `data` - Bytes produced by [`Codec::encode`] with the same codec
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            Codec::MsgPack(_) => MsgPackCodec::decode(data),
            Codec::Json(_) => JsonCodec::decode(data),
            Codec::Postcard(_) => PostcardCodec::decode(data),
        }
    }
}

/// MessagePack codec. Structs are written as maps so that field order
/// changes stay compatible.
#[derive(Debug, Clone, Copy)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

/// JSON codec
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PostcardCodec;

impl PostcardCodec {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(postcard::to_stdvec(value)?)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(postcard::from_bytes(data)?)
    }
}
