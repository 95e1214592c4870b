//! Chunk transport adapter behind the reserved chunk method.
//!
//! Every call to the chunk method carries one [`ChunkEnvelope`]. Request
//! chunks are reassembled per handle; when the last one arrives the message
//! is dispatched and its reply is returned as envelope 0 of the same
//! handle. Replies too large for one envelope are parked, and the caller
//! fetches the remaining envelopes with pull requests.
//!
//! ```text
//! caller                               router
//!   chunk  h=7 seq=0                 ->  202
//!   chunk  h=7 seq=1 LAST            ->  dispatch, reply seq=0
//!   pull   h=7 seq=1                 ->  reply seq=1
//!   pull   h=7 seq=2                 ->  reply seq=2 LAST
//! ```

use std::future::Future;

use bytes::Bytes;
use serde_json::json;

use super::fragment::fragment;
use super::reassembly::ChunkReassembler;
use super::session::{OpenError, SessionState, SessionTable};
use crate::codec::ContentType;
use crate::config::RouterConfig;
use crate::error::MethodwireError;
use crate::handler::{MethodKey, CHUNK_METHOD};
use crate::protocol::{ChunkEnvelope, Response, StatusCode};

/// Chunk transport state shared by all calls of one router.
pub struct ChunkTransport {
    sessions: SessionTable,
    max_envelope_size: usize,
    max_message_size: usize,
}

/// Reply to a completed message, plus the state to park if it needs pulls.
struct Reply {
    response: Response,
    parked: Option<SessionState>,
}

impl ChunkTransport {
    /// Create an adapter with the limits from `config`.
    pub fn new(config: &RouterConfig) -> Self {
        Self {
            sessions: SessionTable::new(config.session_ttl, config.max_sessions),
            max_envelope_size: config.max_message_size,
            max_message_size: config.max_reassembled_size,
        }
    }

    /// Handle one chunk-method call.
    ///
    /// `dispatch` is called with `(method, payload, content_type)` once a
    /// request message is complete. It is never called for protocol errors
    /// or intermediate chunks.
    pub async fn accept<D, Fut>(&self, payload: Bytes, dispatch: D) -> Response
    where
        D: FnOnce(String, Bytes, ContentType) -> Fut,
        Fut: Future<Output = Response>,
    {
        let swept = self.sessions.sweep();
        if swept > 0 {
            tracing::debug!(swept, "Swept expired chunk sessions");
        }

        let envelope = match ChunkEnvelope::decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Rejected chunk envelope: {}", e);
                return protocol_error(protocol_message(e));
            }
        };

        if envelope.is_pull() {
            self.pull(envelope).await
        } else if envelope.sequence == 0 {
            self.first_chunk(envelope, dispatch).await
        } else {
            self.next_chunk(envelope, dispatch).await
        }
    }

    /// Drop expired sessions; returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sessions.sweep()
    }

    /// Number of sessions currently open.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    async fn first_chunk<D, Fut>(&self, envelope: ChunkEnvelope, dispatch: D) -> Response
    where
        D: FnOnce(String, Bytes, ContentType) -> Fut,
        Fut: Future<Output = Response>,
    {
        let handle = envelope.handle;

        if MethodKey::normalize(&envelope.method).as_str() == CHUNK_METHOD {
            tracing::warn!(handle, "Chunked message targets the chunk method");
            return protocol_error("Chunked messages cannot target the chunk method");
        }

        if self.sessions.abort(handle) {
            tracing::warn!(handle, "Sequence restarted on an active handle; session aborted");
            return protocol_error(format!("Handle {} is already active", handle));
        }

        let mut reassembler = ChunkReassembler::new(self.max_message_size);
        match reassembler.feed(&envelope) {
            Err(e) => failure(handle, e),
            Ok(None) => match self.sessions.open(handle, SessionState::Inbound(reassembler)) {
                Ok(_) => {
                    tracing::debug!(handle, method = %envelope.method, "Chunk session opened");
                    Response::empty(StatusCode::ACCEPTED)
                }
                Err(OpenError::Full) => {
                    tracing::warn!(handle, "Chunk session limit reached");
                    Response::empty(StatusCode::TOO_MANY_REQUESTS)
                }
                Err(OpenError::InUse) => protocol_error(format!("Handle {} is already active", handle)),
            },
            Ok(Some(message)) => {
                // The reply may need pulls, so the call holds a session slot
                // from dispatch until the reply is known.
                let slot = match self.sessions.open(handle, SessionState::Dispatching) {
                    Ok(slot) => slot,
                    Err(OpenError::Full) => {
                        tracing::warn!(handle, "Chunk session limit reached");
                        return Response::empty(StatusCode::TOO_MANY_REQUESTS);
                    }
                    Err(OpenError::InUse) => {
                        return protocol_error(format!("Handle {} is already active", handle))
                    }
                };
                let mut state = slot.state.lock().await;

                let response = dispatch(message.method.clone(), message.payload, message.content_type).await;
                let reply = self.reply(handle, &message.method, message.content_type, response);

                match reply.parked {
                    Some(parked) => {
                        *state = parked;
                        self.sessions.touch(&slot);
                    }
                    None => {
                        *state = SessionState::Closed;
                        self.sessions.remove(handle, &slot);
                    }
                }
                reply.response
            }
        }
    }

    async fn next_chunk<D, Fut>(&self, envelope: ChunkEnvelope, dispatch: D) -> Response
    where
        D: FnOnce(String, Bytes, ContentType) -> Fut,
        Fut: Future<Output = Response>,
    {
        let handle = envelope.handle;
        let Some(slot) = self.sessions.get(handle) else {
            tracing::warn!(handle, sequence = envelope.sequence, "Chunk for unknown handle");
            return protocol_error(format!("Unknown chunk handle {}", handle));
        };

        let mut state = slot.state.lock().await;
        self.sessions.touch(&slot);

        let outcome = match &mut *state {
            SessionState::Dispatching => return busy(handle),
            SessionState::Inbound(reassembler) => reassembler.feed(&envelope),
            SessionState::Outbound { .. } => Err(MethodwireError::Protocol(format!(
                "Handle {} is serving a reply; expected a pull",
                handle
            ))),
            SessionState::Closed => Err(MethodwireError::Protocol(format!(
                "Unknown chunk handle {}",
                handle
            ))),
        };

        match outcome {
            Err(e) => {
                *state = SessionState::Closed;
                self.sessions.remove(handle, &slot);
                failure(handle, e)
            }
            Ok(None) => {
                tracing::debug!(handle, sequence = envelope.sequence, "Chunk accepted");
                Response::empty(StatusCode::ACCEPTED)
            }
            Ok(Some(message)) => {
                tracing::debug!(
                    handle,
                    method = %message.method,
                    size = message.payload.len(),
                    "Chunked message complete"
                );
                let response = dispatch(message.method.clone(), message.payload, message.content_type).await;
                let reply = self.reply(handle, &message.method, message.content_type, response);

                match reply.parked {
                    Some(parked) => {
                        *state = parked;
                        self.sessions.touch(&slot);
                    }
                    None => {
                        *state = SessionState::Closed;
                        self.sessions.remove(handle, &slot);
                    }
                }
                reply.response
            }
        }
    }

    async fn pull(&self, envelope: ChunkEnvelope) -> Response {
        let handle = envelope.handle;
        let Some(slot) = self.sessions.get(handle) else {
            tracing::warn!(handle, sequence = envelope.sequence, "Pull for unknown handle");
            return protocol_error(format!("Unknown chunk handle {}", handle));
        };

        let mut state = slot.state.lock().await;
        self.sessions.touch(&slot);

        let outcome = match &mut *state {
            SessionState::Outbound {
                fragments,
                next,
                status,
            } => {
                if envelope.sequence != *next {
                    Err(MethodwireError::Protocol(format!(
                        "Handle {} expected pull {}, got {}",
                        handle, next, envelope.sequence
                    )))
                } else {
                    match fragments.get(*next as usize).map(ChunkEnvelope::encode) {
                        Some(Ok(bytes)) => {
                            *next += 1;
                            Ok((*status, bytes, *next as usize >= fragments.len()))
                        }
                        Some(Err(e)) => Err(e),
                        None => Err(MethodwireError::Protocol(format!(
                            "Handle {} has no reply fragment {}",
                            handle, envelope.sequence
                        ))),
                    }
                }
            }
            SessionState::Dispatching => return busy(handle),
            SessionState::Inbound(_) => Err(MethodwireError::Protocol(format!(
                "Handle {} has no reply to pull",
                handle
            ))),
            SessionState::Closed => Err(MethodwireError::Protocol(format!(
                "Unknown chunk handle {}",
                handle
            ))),
        };

        match outcome {
            Ok((status, bytes, done)) => {
                if done {
                    tracing::debug!(handle, "Reply fully delivered");
                    *state = SessionState::Closed;
                    self.sessions.remove(handle, &slot);
                }
                Response::new(status, bytes)
            }
            Err(e) => {
                *state = SessionState::Closed;
                self.sessions.remove(handle, &slot);
                failure(handle, e)
            }
        }
    }

    /// Wrap a dispatch response as reply envelopes.
    fn reply(
        &self,
        handle: u64,
        method: &str,
        content_type: ContentType,
        response: Response,
    ) -> Reply {
        let status = response.status;
        let Some(payload) = response.payload else {
            return Reply {
                response: Response::empty(status),
                parked: None,
            };
        };

        if payload.len() > self.max_message_size {
            tracing::warn!(
                handle,
                size = payload.len(),
                limit = self.max_message_size,
                "Reply too large to chunk"
            );
            return Reply {
                response: Response::empty(StatusCode::PAYLOAD_TOO_LARGE),
                parked: None,
            };
        }

        let encoded = fragment(handle, method, content_type, &payload, self.max_envelope_size)
            .and_then(|fragments| {
                let first = match fragments.first() {
                    Some(first) => first.encode()?,
                    None => return Err(MethodwireError::Protocol("Reply produced no fragments".into())),
                };
                Ok((first, fragments))
            });

        match encoded {
            Ok((first, fragments)) if fragments.len() == 1 => Reply {
                response: Response::new(status, first),
                parked: None,
            },
            Ok((first, fragments)) => {
                tracing::debug!(handle, fragments = fragments.len(), "Reply parked for pulls");
                Reply {
                    response: Response::new(status, first),
                    parked: Some(SessionState::Outbound {
                        fragments,
                        next: 1,
                        status,
                    }),
                }
            }
            Err(e) => {
                tracing::error!(handle, "Failed to fragment reply: {}", e);
                Reply {
                    response: Response::empty(StatusCode::INTERNAL_ERROR),
                    parked: None,
                }
            }
        }
    }
}

/// 400 with a JSON error object.
pub(crate) fn protocol_error(message: impl Into<String>) -> Response {
    let body = json!({ "error": "protocol", "message": message.into() });
    match ContentType::Json.encode(&body) {
        Ok(bytes) => Response::new(StatusCode::BAD_REQUEST, Bytes::from(bytes)),
        Err(_) => Response::empty(StatusCode::BAD_REQUEST),
    }
}

fn failure(handle: u64, error: MethodwireError) -> Response {
    match error {
        MethodwireError::PayloadTooLarge { size, limit } => {
            tracing::warn!(handle, size, limit, "Chunked message too large; session dropped");
            Response::empty(StatusCode::PAYLOAD_TOO_LARGE)
        }
        other => {
            tracing::warn!(handle, "Chunk protocol error: {}", other);
            protocol_error(protocol_message(other))
        }
    }
}

/// Message for the `"message"` field; protocol errors drop their prefix.
fn protocol_message(error: MethodwireError) -> String {
    match error {
        MethodwireError::Protocol(message) => message,
        other => other.to_string(),
    }
}

/// A call raced a dispatch still holding the handle; the session stays.
fn busy(handle: u64) -> Response {
    tracing::warn!(handle, "Chunk for a handle that is still dispatching");
    protocol_error(format!("Handle {} is still dispatching", handle))
}
