//! Overload groups - several typed invokers sharing one method key.

use std::sync::Arc;

use bytes::Bytes;

use super::invoker::{BoxFuture, InvocationError, InvocationResult, Invoker, TypedInvoker};
use super::key::MethodKey;
use crate::codec::ContentType;
use crate::protocol::StatusCode;

/// Candidates for one method key, tried in registration order.
///
/// The first candidate that succeeds wins. When every candidate fails, only
/// the *last* failure is returned; earlier ones are logged at debug level
/// and dropped.
pub struct OverloadGroup {
    key: MethodKey,
    candidates: Vec<Arc<TypedInvoker>>,
}

impl OverloadGroup {
    /// Create an empty group for `key`.
    pub fn new(key: MethodKey) -> Self {
        Self {
            key,
            candidates: Vec::new(),
        }
    }

    /// Append a candidate.
    pub fn push(&mut self, invoker: TypedInvoker) {
        self.candidates.push(Arc::new(invoker));
    }

    /// Key shared by all candidates.
    pub fn key(&self) -> &MethodKey {
        &self.key
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the group has no candidates.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Handler names in registration order.
    pub fn handler_names(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(|c| c.handler_name())
    }
}

impl Invoker for OverloadGroup {
    fn invoke(
        &self,
        payload: Bytes,
        content_type: ContentType,
    ) -> BoxFuture<'static, InvocationResult> {
        if let [single] = self.candidates.as_slice() {
            return single.invoke(payload, content_type);
        }

        let candidates = self.candidates.clone();
        let key = self.key.clone();

        Box::pin(async move {
            let mut last_error = InvocationError {
                status: StatusCode::NOT_SUPPORTED,
                payload: None,
            };

            for (index, candidate) in candidates.iter().enumerate() {
                match candidate.invoke(payload.clone(), content_type).await {
                    Ok(result) => return Ok(result),
                    Err(e) => {
                        tracing::debug!(
                            method = %key,
                            candidate = index,
                            handler = candidate.handler_name(),
                            status = %e.status,
                            "Overload candidate failed"
                        );
                        last_error = e;
                    }
                }
            }

            Err(last_error)
        })
    }
}
