//! Transport module - the single-call method primitive.
//!
//! A transport moves one `(method, payload, content type)` call to the
//! device side and returns its [`Response`]. Everything above it, including
//! chunking, is built from that one call.

use bytes::Bytes;

use crate::handler::BoxFuture;
use crate::protocol::Response;
use crate::router::Router;

/// A transport that can invoke a named method once.
pub trait MethodTransport: Send + Sync {
    /// Invoke `method` with `payload` and wait for its response.
    fn invoke_method<'a>(
        &'a self,
        method: &'a str,
        payload: Bytes,
        content_type: &'a str,
    ) -> BoxFuture<'a, Response>;
}

impl<T: MethodTransport + ?Sized> MethodTransport for std::sync::Arc<T> {
    fn invoke_method<'a>(
        &'a self,
        method: &'a str,
        payload: Bytes,
        content_type: &'a str,
    ) -> BoxFuture<'a, Response> {
        (**self).invoke_method(method, payload, content_type)
    }
}

/// In-process transport calling a [`Router`] directly.
#[derive(Clone)]
pub struct LoopbackTransport {
    router: Router,
}

impl LoopbackTransport {
    /// Bind `router`.
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    /// The bound router.
    pub fn router(&self) -> &Router {
        &self.router
    }
}

impl MethodTransport for LoopbackTransport {
    fn invoke_method<'a>(
        &'a self,
        method: &'a str,
        payload: Bytes,
        content_type: &'a str,
    ) -> BoxFuture<'a, Response> {
        Box::pin(self.router.invoke(method, payload, content_type))
    }
}

/// Seed for chunk handles: process ID mixed with the current time, so two
/// clients started together rarely collide.
pub(crate) fn handle_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let pid = std::process::id() as u64;
    nanos.wrapping_mul(0x517c_c1b7_2722_0a95) ^ (pid << 32)
}
