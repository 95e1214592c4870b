//! Calling side of the router.
//!
//! [`ChunkedClient`] sends calls through any [`MethodTransport`]. Requests
//! that fit one call go out as they are; larger ones are split into chunk
//! envelopes and sent through the reserved chunk method. Chunked replies are
//! pulled fragment by fragment until the last one arrives.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use methodwire::client::ChunkedClient;
//! use methodwire::handler::{BoxError, Controller, MethodTable};
//! use methodwire::transport::LoopbackTransport;
//! use methodwire::Router;
//!
//! struct Store;
//!
//! impl Controller for Store {
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.method("Length", |_s: Arc<Store>, blob: Vec<u8>| async move {
//!             Ok::<_, BoxError>(blob.len())
//!         });
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> methodwire::Result<()> {
//! let router = Router::builder().controller(Store)?.build()?;
//! let client = ChunkedClient::new(LoopbackTransport::new(router));
//!
//! // Roughly 800 KB of JSON, far above one call.
//! let len: usize = client.call_json("length", &vec![200u8; 200_000]).await?;
//! assert_eq!(len, 200_000);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::chunk::{fragment, ChunkReassembler};
use crate::codec::ContentType;
use crate::config::DEFAULT_MAX_REASSEMBLED_SIZE;
use crate::error::{MethodwireError, Result};
use crate::handler::CHUNK_METHOD;
use crate::protocol::{ChunkEnvelope, Response, StatusCode, DEFAULT_MAX_MESSAGE_SIZE};
use crate::transport::{handle_seed, MethodTransport};

/// Client that chunks oversized requests and replies transparently.
pub struct ChunkedClient<T> {
    transport: T,
    content_type: ContentType,
    max_message_size: usize,
    max_reply_size: usize,
    next_handle: AtomicU64,
}

impl<T: MethodTransport> ChunkedClient<T> {
    /// Create a client with the default 127 KiB call limit and JSON
    /// payloads.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            content_type: ContentType::Json,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_reply_size: DEFAULT_MAX_REASSEMBLED_SIZE,
            next_handle: AtomicU64::new(handle_seed()),
        }
    }

    /// Set the content type used for payloads.
    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    /// Set the per-call limit. Must match the router's.
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Set the largest chunked reply the client will rebuild.
    pub fn with_max_reply_size(mut self, bytes: usize) -> Self {
        self.max_reply_size = bytes;
        self
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Encode `args`, call `method` and decode its result.
    pub async fn call_json<A, R>(&self, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = Bytes::from(self.content_type.encode(args)?);
        let reply = self.call(method, payload).await?;
        self.content_type.decode(&reply)
    }

    /// Call `method` with a raw payload, chunking it if needed.
    ///
    /// Any non-success status is returned as [`MethodwireError::Status`].
    pub async fn call(&self, method: &str, payload: Bytes) -> Result<Bytes> {
        if payload.len() <= self.max_message_size {
            let response = self
                .transport
                .invoke_method(method, payload, self.content_type.as_str())
                .await;
            return into_result(response);
        }
        self.call_chunked(method, payload).await
    }

    /// Call `method` through the chunk method regardless of size.
    pub async fn call_chunked(&self, method: &str, payload: Bytes) -> Result<Bytes> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let envelopes = fragment(handle, method, self.content_type, &payload, self.max_message_size)?;
        tracing::debug!(handle, method, chunks = envelopes.len(), "Sending chunked request");

        let mut last = None;
        for envelope in envelopes {
            let is_last = envelope.is_last();
            let response = self.send_envelope(&envelope).await?;

            if is_last {
                last = Some(response);
            } else if response.status != StatusCode::ACCEPTED {
                return Err(status_error(response));
            }
        }

        let response = last.ok_or_else(|| {
            MethodwireError::Protocol("Chunked request produced no final chunk".into())
        })?;
        self.collect_reply(handle, response).await
    }

    async fn send_envelope(&self, envelope: &ChunkEnvelope) -> Result<Response> {
        let bytes = envelope.encode()?;
        Ok(self
            .transport
            .invoke_method(CHUNK_METHOD, bytes, self.content_type.as_str())
            .await)
    }

    /// Rebuild a reply starting from the final request chunk's response.
    async fn collect_reply(&self, handle: u64, first: Response) -> Result<Bytes> {
        let status = first.status;
        let Some(payload) = first.payload else {
            return into_result(Response::empty(status));
        };

        let mut reassembler = ChunkReassembler::new(self.max_reply_size);
        let mut envelope = ChunkEnvelope::decode(&payload)?;

        loop {
            if envelope.handle != handle {
                return Err(MethodwireError::Protocol(format!(
                    "Reply for handle {} received on handle {}",
                    envelope.handle, handle
                )));
            }

            if let Some(done) = reassembler.feed(&envelope)? {
                return into_result(Response::new(status, done.payload));
            }

            let next = envelope.sequence.checked_add(1).ok_or_else(|| {
                MethodwireError::Protocol(format!("Handle {} ran out of sequence numbers", handle))
            })?;
            let response = self.send_envelope(&ChunkEnvelope::pull(handle, next)).await?;
            if response.status != status || response.payload.is_none() {
                return Err(status_error(response));
            }
            envelope = ChunkEnvelope::decode(response.payload())?;
        }
    }
}

fn status_error(response: Response) -> MethodwireError {
    MethodwireError::Status {
        status: response.status.as_u16(),
        payload: response.payload,
    }
}

fn into_result(response: Response) -> Result<Bytes> {
    if response.status.is_success() {
        Ok(response.payload.unwrap_or_default())
    } else {
        Err(status_error(response))
    }
}
