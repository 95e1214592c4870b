//! Status codes and the response envelope returned for every invocation.
//!
//! The transport only ever sees `(status, payload)`. Status values follow
//! HTTP semantics because that is what device-method peers already expect.

use std::fmt;

use bytes::Bytes;

/// Numeric status code carried back through the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    /// Handler completed and produced a result.
    pub const OK: StatusCode = StatusCode(200);
    /// Non-final chunk accepted; more chunks expected.
    pub const ACCEPTED: StatusCode = StatusCode(202);
    /// Default status for filtered decode/handler failures and protocol errors.
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    /// Payload above the transport ceiling or the reassembly limit.
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    /// Content type has no matching codec.
    pub const UNSUPPORTED_MEDIA_TYPE: StatusCode = StatusCode(415);
    /// Chunk session table is full.
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);
    /// Unclassified failure; no details are exposed.
    pub const INTERNAL_ERROR: StatusCode = StatusCode(500);
    /// Method key is not registered.
    pub const NOT_SUPPORTED: StatusCode = StatusCode(501);

    /// Wrap a raw status value.
    #[inline]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Raw numeric value.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Whether the status is in the 2xx range.
    #[inline]
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        Self::OK
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> Self {
        status.0
    }
}

/// Uniform outcome of an invocation: `{statusCode, payload | null}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status reported to the transport.
    pub status: StatusCode,
    /// Response body, `None` when the outcome carries no payload.
    pub payload: Option<Bytes>,
}

impl Response {
    /// Create a response with a payload.
    pub fn new(status: StatusCode, payload: Bytes) -> Self {
        Self {
            status,
            payload: Some(payload),
        }
    }

    /// Create a response without a payload.
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            payload: None,
        }
    }

    /// Successful response carrying `payload`.
    pub fn ok(payload: Bytes) -> Self {
        Self::new(StatusCode::OK, payload)
    }

    /// Payload bytes, or an empty slice when there is none.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or(&[])
    }

    /// Payload length in bytes (0 when absent).
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Drop the payload if it exceeds `ceiling`, keeping the status.
    pub fn clamp_payload(mut self, ceiling: usize) -> Self {
        if self.payload_len() > ceiling {
            self.payload = None;
        }
        self
    }
}
