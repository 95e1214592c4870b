//! Error types for methodwire.

use thiserror::Error;

/// Main error type for registry, codec and chunk-protocol operations.
///
/// Invocation outcomes never surface this type directly to the transport;
/// the router folds every failure into a [`Response`](crate::Response).
#[derive(Debug, Error)]
pub enum MethodwireError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Chunk protocol violation (bad header, sequence gap, unknown handle).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A controller tried to register a handler under a reserved method key.
    #[error("Method key is reserved: {0}")]
    ReservedMethod(String),

    /// A handler name normalized to an empty method key.
    #[error("Invalid method name: {0:?}")]
    InvalidMethodName(String),

    /// Content type not understood by any codec.
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// A message grew past its size limit.
    #[error("Message of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Size the message reached.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Configuration could not be parsed or is inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The transport returned a status the client cannot continue from.
    #[error("Transport returned status {status}")]
    Status {
        /// Status code reported by the remote side.
        status: u16,
        /// Payload reported with the status, if any.
        payload: Option<bytes::Bytes>,
    },
}

/// Result type alias using MethodwireError.
pub type Result<T> = std::result::Result<T, MethodwireError>;
