//! Chunk envelope encoding and decoding.
//!
//! Every chunk travels as the payload of an ordinary call to the reserved
//! chunk method. Layout:
//! ```text
//! ┌──────────┬──────────┬───────┬───────┬────────────┬─────────┬──────────┐
//! │ Handle   │ Sequence │ Flags │ CType │ Method len │ Method  │ Fragment │
//! │ 8 bytes  │ 4 bytes  │ 1 byte│ 1 byte│ 2 bytes    │ N bytes │ rest     │
//! │ uint64 BE│ uint32 BE│       │       │ uint16 BE  │ UTF-8   │          │
//! └──────────┴──────────┴───────┴───────┴────────────┴─────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::ContentType;
use crate::error::{MethodwireError, Result};

/// Fixed header size in bytes (before method name and fragment).
pub const CHUNK_HEADER_SIZE: usize = 16;

/// Longest method name an envelope can carry.
pub const MAX_METHOD_LEN: usize = u16::MAX as usize;

/// Flag constants for the chunk envelope.
pub mod flags {
    /// Final chunk of a message.
    pub const LAST_CHUNK: u8 = 0b0000_0001;
    /// Request for reply fragment `sequence` of the handle's outbound session.
    pub const PULL: u8 = 0b0000_0010;

    /// Reserved bits mask (bits 2-7).
    pub const RESERVED_MASK: u8 = 0b1111_1100;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded fixed-size chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Opaque session handle correlating the chunks of one message.
    pub handle: u64,
    /// Position of this chunk within the session, starting at 0.
    pub sequence: u32,
    /// Flags byte (see [`flags`]).
    pub flags: u8,
    /// Content-type wire code.
    pub content_type: u8,
    /// Length of the method name that follows the header.
    pub method_len: u16,
}

impl ChunkHeader {
    /// Encode into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than [`CHUNK_HEADER_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= CHUNK_HEADER_SIZE);
        buf[0..8].copy_from_slice(&self.handle.to_be_bytes());
        buf[8..12].copy_from_slice(&self.sequence.to_be_bytes());
        buf[12] = self.flags;
        buf[13] = self.content_type;
        buf[14..16].copy_from_slice(&self.method_len.to_be_bytes());
    }

    /// Encode to a fixed array.
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut buf = [0u8; CHUNK_HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Decode from bytes; `None` if fewer than [`CHUNK_HEADER_SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < CHUNK_HEADER_SIZE {
            return None;
        }
        Some(Self {
            handle: u64::from_be_bytes(buf[0..8].try_into().ok()?),
            sequence: u32::from_be_bytes(buf[8..12].try_into().ok()?),
            flags: buf[12],
            content_type: buf[13],
            method_len: u16::from_be_bytes(buf[14..16].try_into().ok()?),
        })
    }

    /// Validate reserved bits.
    pub fn validate(&self) -> Result<()> {
        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(MethodwireError::Protocol(format!(
                "Reserved flag bits set: {:#04x}",
                self.flags
            )));
        }
        Ok(())
    }
}

/// One chunk of a logical message: `{handle, sequenceNumber, isLastChunk,
/// method, contentType, payloadFragment}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEnvelope {
    /// Session handle.
    pub handle: u64,
    /// Sequence number, contiguous from 0 within a handle.
    pub sequence: u32,
    /// Raw flags byte.
    pub flags: u8,
    /// Content type of the reassembled message.
    pub content_type: ContentType,
    /// Target method name. Required on the first chunk, optional afterwards.
    pub method: String,
    /// Payload bytes carried by this chunk.
    pub fragment: Bytes,
}

impl ChunkEnvelope {
    /// Create a data chunk.
    pub fn new(
        handle: u64,
        sequence: u32,
        is_last: bool,
        method: impl Into<String>,
        content_type: ContentType,
        fragment: Bytes,
    ) -> Self {
        Self {
            handle,
            sequence,
            flags: if is_last { flags::LAST_CHUNK } else { 0 },
            content_type,
            method: method.into(),
            fragment,
        }
    }

    /// Create a pull request for reply fragment `sequence`.
    pub fn pull(handle: u64, sequence: u32) -> Self {
        Self {
            handle,
            sequence,
            flags: flags::PULL,
            content_type: ContentType::default(),
            method: String::new(),
            fragment: Bytes::new(),
        }
    }

    /// Whether this is the final chunk of its message.
    #[inline]
    pub fn is_last(&self) -> bool {
        flags::has_flag(self.flags, flags::LAST_CHUNK)
    }

    /// Whether this is a reply-fragment pull.
    #[inline]
    pub fn is_pull(&self) -> bool {
        flags::has_flag(self.flags, flags::PULL)
    }

    /// Bytes of envelope overhead for a given method name length.
    #[inline]
    pub fn overhead(method_len: usize) -> usize {
        CHUNK_HEADER_SIZE + method_len
    }

    /// Total encoded size.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        Self::overhead(self.method.len()) + self.fragment.len()
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        if self.method.len() > MAX_METHOD_LEN {
            return Err(MethodwireError::Protocol(format!(
                "Method name length {} exceeds maximum {}",
                self.method.len(),
                MAX_METHOD_LEN
            )));
        }

        let header = ChunkHeader {
            handle: self.handle,
            sequence: self.sequence,
            flags: self.flags,
            content_type: self.content_type.wire_code(),
            method_len: self.method.len() as u16,
        };

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&header.encode());
        buf.put_slice(self.method.as_bytes());
        buf.put_slice(&self.fragment);
        Ok(buf.freeze())
    }

    /// Decode from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = ChunkHeader::decode(bytes).ok_or_else(|| {
            MethodwireError::Protocol(format!(
                "Chunk envelope too short: {} bytes, need at least {}",
                bytes.len(),
                CHUNK_HEADER_SIZE
            ))
        })?;
        header.validate()?;

        let method_end = CHUNK_HEADER_SIZE + header.method_len as usize;
        if bytes.len() < method_end {
            return Err(MethodwireError::Protocol(format!(
                "Method name truncated: need {} bytes, have {}",
                method_end,
                bytes.len()
            )));
        }

        let method = std::str::from_utf8(&bytes[CHUNK_HEADER_SIZE..method_end])
            .map_err(|e| MethodwireError::Protocol(format!("Method name is not UTF-8: {}", e)))?
            .to_string();

        Ok(Self {
            handle: header.handle,
            sequence: header.sequence,
            flags: header.flags,
            content_type: ContentType::from_wire_code(header.content_type)?,
            method,
            fragment: Bytes::copy_from_slice(&bytes[method_end..]),
        })
    }
}
