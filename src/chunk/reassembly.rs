//! Reassembly of one chunked message.

use bytes::{Bytes, BytesMut};

use crate::codec::ContentType;
use crate::error::{MethodwireError, Result};
use crate::protocol::ChunkEnvelope;

/// A message rebuilt from its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassembled {
    /// Method named by the first chunk.
    pub method: String,
    /// Content type named by the first chunk.
    pub content_type: ContentType,
    /// Concatenated fragments.
    pub payload: Bytes,
}

/// Accumulates the chunks of a single handle.
///
/// Sequences must start at 0 and increase by one. Any violation, or growing
/// past the size limit, discards the partial message and leaves the
/// reassembler idle again.
#[derive(Debug)]
pub struct ChunkReassembler {
    handle: u64,
    method: String,
    content_type: ContentType,
    next_sequence: u32,
    buffer: BytesMut,
    max_size: usize,
    active: bool,
}

impl ChunkReassembler {
    /// Create an idle reassembler accepting messages up to `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            handle: 0,
            method: String::new(),
            content_type: ContentType::default(),
            next_sequence: 0,
            buffer: BytesMut::new(),
            max_size,
            active: false,
        }
    }

    /// Feed one envelope.
    ///
    /// Returns `Some` with the complete message when the last chunk
    /// arrives, `None` while more chunks are expected.
    pub fn feed(&mut self, envelope: &ChunkEnvelope) -> Result<Option<Reassembled>> {
        match self.accept(envelope) {
            Ok(done) => Ok(done),
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn accept(&mut self, envelope: &ChunkEnvelope) -> Result<Option<Reassembled>> {
        if envelope.is_pull() {
            return Err(MethodwireError::Protocol(format!(
                "Pull request for handle {} where a data chunk was expected",
                envelope.handle
            )));
        }

        if !self.active {
            if envelope.sequence != 0 {
                return Err(MethodwireError::Protocol(format!(
                    "Handle {} must start at sequence 0, got {}",
                    envelope.handle, envelope.sequence
                )));
            }
            self.handle = envelope.handle;
            self.method = envelope.method.clone();
            self.content_type = envelope.content_type;
            self.active = true;
        } else {
            if envelope.handle != self.handle {
                return Err(MethodwireError::Protocol(format!(
                    "Chunk for handle {} fed to reassembly of handle {}",
                    envelope.handle, self.handle
                )));
            }
            if envelope.sequence != self.next_sequence {
                return Err(MethodwireError::Protocol(format!(
                    "Handle {} expected sequence {}, got {}",
                    self.handle, self.next_sequence, envelope.sequence
                )));
            }
        }

        let size = self.buffer.len() + envelope.fragment.len();
        if size > self.max_size {
            return Err(MethodwireError::PayloadTooLarge {
                size,
                limit: self.max_size,
            });
        }
        self.buffer.extend_from_slice(&envelope.fragment);

        if envelope.is_last() {
            let message = Reassembled {
                method: std::mem::take(&mut self.method),
                content_type: self.content_type,
                payload: self.buffer.split().freeze(),
            };
            self.reset();
            return Ok(Some(message));
        }

        self.next_sequence = self.next_sequence.checked_add(1).ok_or_else(|| {
            MethodwireError::Protocol(format!("Handle {} ran out of sequence numbers", self.handle))
        })?;
        Ok(None)
    }

    /// Discard any partial message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.method.clear();
        self.next_sequence = 0;
        self.active = false;
    }

    /// Whether a message is in progress.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Sequence number expected next.
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Bytes accumulated so far.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u32, last: bool, data: &'static [u8]) -> ChunkEnvelope {
        ChunkEnvelope::new(3, seq, last, "upload", ContentType::Json, Bytes::from_static(data))
    }

    #[test]
    fn test_reassembles_in_order() {
        let mut r = ChunkReassembler::new(1024);

        assert!(r.feed(&chunk(0, false, b"[1,")).unwrap().is_none());
        assert!(r.is_active());
        assert!(r.feed(&chunk(1, false, b"2,")).unwrap().is_none());
        let done = r.feed(&chunk(2, true, b"3]")).unwrap().unwrap();

        assert_eq!(done.method, "upload");
        assert_eq!(done.content_type, ContentType::Json);
        assert_eq!(&done.payload[..], b"[1,2,3]");
        assert!(!r.is_active());
    }

    #[test]
    fn test_single_chunk_message() {
        let mut r = ChunkReassembler::new(1024);
        let done = r.feed(&chunk(0, true, b"{}")).unwrap().unwrap();
        assert_eq!(&done.payload[..], b"{}");
    }

    #[test]
    fn test_must_start_at_zero() {
        let mut r = ChunkReassembler::new(1024);
        assert!(r.feed(&chunk(1, false, b"x")).is_err());
        assert!(!r.is_active());
    }

    #[test]
    fn test_gap_resets() {
        let mut r = ChunkReassembler::new(1024);
        r.feed(&chunk(0, false, b"a")).unwrap();

        let err = r.feed(&chunk(2, false, b"c")).unwrap_err();
        assert!(err.to_string().contains("expected sequence 1"));
        assert!(!r.is_active());
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut r = ChunkReassembler::new(1024);
        r.feed(&chunk(0, false, b"a")).unwrap();
        r.feed(&chunk(1, false, b"b")).unwrap();
        assert!(r.feed(&chunk(1, false, b"b")).is_err());
    }

    #[test]
    fn test_size_limit() {
        let mut r = ChunkReassembler::new(4);
        r.feed(&chunk(0, false, b"abc")).unwrap();

        let err = r.feed(&chunk(1, true, b"de")).unwrap_err();
        assert!(matches!(err, MethodwireError::PayloadTooLarge { size: 5, limit: 4 }));
        assert!(!r.is_active());
    }

    #[test]
    fn test_pull_is_not_data() {
        let mut r = ChunkReassembler::new(16);
        assert!(r.feed(&ChunkEnvelope::pull(3, 0)).is_err());
    }

    #[test]
    fn test_reusable_after_completion() {
        let mut r = ChunkReassembler::new(16);
        r.feed(&chunk(0, true, b"one")).unwrap();
        let done = r.feed(&chunk(0, true, b"two")).unwrap().unwrap();
        assert_eq!(&done.payload[..], b"two");
    }
}
