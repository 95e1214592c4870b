//! Codec module - payload encoding selected by content type.
//!
//! - [`JsonCodec`] - JSON via `serde_json` (the default device-method format)
//! - [`MsgPackCodec`] - MessagePack via `rmp-serde`, struct-as-map
//!
//! Handlers never see the wire format: the invoker picks the codec from the
//! call's [`ContentType`] and decodes straight into the handler's parameter
//! types.
//!
//! # Example
//!
//! ```
//! use methodwire::codec::ContentType;
//!
//! let ct = ContentType::parse("application/json; charset=utf-8").unwrap();
//! let bytes = ct.encode(&vec![1, 2, 3]).unwrap();
//! let back: Vec<i32> = ct.decode(&bytes).unwrap();
//! assert_eq!(back, vec![1, 2, 3]);
//! ```

mod json;
mod msgpack;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use crate::error::{MethodwireError, Result};

/// Payload format of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentType {
    /// `application/json`.
    #[default]
    Json,
    /// `application/msgpack`.
    MsgPack,
}

impl ContentType {
    /// Parse a transport content-type string.
    ///
    /// Matching ignores case and media-type parameters; an empty string
    /// means JSON.
    pub fn parse(value: &str) -> Result<Self> {
        let essence = value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "" | "json" | "application/json" | "text/json" => Ok(Self::Json),
            "msgpack" | "application/msgpack" | "application/x-msgpack" => Ok(Self::MsgPack),
            _ => Err(MethodwireError::UnsupportedContentType(value.to_string())),
        }
    }

    /// Canonical media type string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::MsgPack => "application/msgpack",
        }
    }

    /// One-byte code used in the chunk envelope.
    #[inline]
    pub fn wire_code(self) -> u8 {
        match self {
            Self::Json => 0,
            Self::MsgPack => 1,
        }
    }

    /// Inverse of [`wire_code`](Self::wire_code).
    pub fn from_wire_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Json),
            1 => Ok(Self::MsgPack),
            other => Err(MethodwireError::Protocol(format!(
                "Unknown content type code {}",
                other
            ))),
        }
    }

    /// Encode a value in this format.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::Json => JsonCodec::encode(value),
            Self::MsgPack => MsgPackCodec::encode(value),
        }
    }

    /// Decode a value from this format.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::Json => JsonCodec::decode(bytes),
            Self::MsgPack => MsgPackCodec::decode(bytes),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
