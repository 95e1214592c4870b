//! Chunk module - messages larger than one transport call.
//!
//! - [`fragment`] splits a message into [`ChunkEnvelope`](crate::protocol::ChunkEnvelope)s
//! - [`ChunkReassembler`] rebuilds one message from its envelopes
//! - [`ChunkTransport`] runs both directions behind the reserved
//!   [`CHUNK_METHOD`](crate::handler::CHUNK_METHOD)
//!
//! The fragment and reassembly helpers are public so the calling side can
//! use the same code; see [`ChunkedClient`](crate::client::ChunkedClient).

mod adapter;
mod fragment;
mod reassembly;
mod session;

pub use adapter::ChunkTransport;
pub use fragment::{fragment, fragment_count};
pub use reassembly::{ChunkReassembler, Reassembled};

pub(crate) use adapter::protocol_error;
