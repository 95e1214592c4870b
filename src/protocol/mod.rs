//! Protocol module - response envelope and chunk wire format.
//!
//! - [`Response`] / [`StatusCode`]: the `(status, payload)` pair returned for
//!   every invocation
//! - [`ChunkEnvelope`]: one fragment of a message carried through the
//!   reserved chunk method

mod response;
mod wire_format;

pub use response::{Response, StatusCode};
pub use wire_format::{flags, ChunkEnvelope, ChunkHeader, CHUNK_HEADER_SIZE, MAX_METHOD_LEN};

/// Largest payload a single transport call may carry (127 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 127 * 1024;
