//! Splitting a message into chunk envelopes.

use bytes::Bytes;

use crate::codec::ContentType;
use crate::error::{MethodwireError, Result};
use crate::protocol::ChunkEnvelope;

/// Split `payload` into envelopes no larger than `max_envelope_size` bytes
/// once encoded.
///
/// Sequences start at 0 and the final envelope carries the last-chunk flag.
/// Fragments are zero-copy slices of `payload`. An empty payload still
/// produces one (empty, last) envelope.
///
/// ```
/// use bytes::Bytes;
/// use methodwire::chunk::fragment;
/// use methodwire::codec::ContentType;
///
/// let payload = Bytes::from(vec![7u8; 100]);
/// let chunks = fragment(1, "upload", ContentType::Json, &payload, 64).unwrap();
///
/// assert_eq!(chunks.len(), 3);
/// assert!(chunks.iter().all(|c| c.encoded_len() <= 64));
/// assert!(chunks[2].is_last());
/// ```
pub fn fragment(
    handle: u64,
    method: &str,
    content_type: ContentType,
    payload: &Bytes,
    max_envelope_size: usize,
) -> Result<Vec<ChunkEnvelope>> {
    let overhead = ChunkEnvelope::overhead(method.len());
    let fragment_size = max_envelope_size.saturating_sub(overhead);
    if fragment_size == 0 {
        return Err(MethodwireError::Protocol(format!(
            "Envelope limit {} leaves no room for data after {} bytes of overhead",
            max_envelope_size, overhead
        )));
    }

    let count = fragment_count(payload.len(), fragment_size);
    if count > u32::MAX as usize {
        return Err(MethodwireError::PayloadTooLarge {
            size: payload.len(),
            limit: fragment_size.saturating_mul(u32::MAX as usize),
        });
    }

    let envelopes = (0..count)
        .map(|index| {
            let start = index * fragment_size;
            let end = (start + fragment_size).min(payload.len());
            ChunkEnvelope::new(
                handle,
                index as u32,
                index + 1 == count,
                method,
                content_type,
                payload.slice(start..end),
            )
        })
        .collect();

    Ok(envelopes)
}

/// Number of envelopes needed for `len` bytes at `fragment_size` bytes each.
#[inline]
pub fn fragment_count(len: usize, fragment_size: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(fragment_size)
    }
}
