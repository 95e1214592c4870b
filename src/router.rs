//! Router facade and builder.
//!
//! The [`RouterBuilder`] collects controllers and limits; the [`Router`] it
//! builds is the single entry point a transport calls:
//!
//! 1. Normalize the method name
//! 2. Resolve the content type (415 if unknown)
//! 3. Enforce the inbound size ceiling (413)
//! 4. Look up the method (501 if unknown)
//! 5. Run the overload group or the chunk adapter
//! 6. Enforce the outbound size ceiling and wrap the outcome
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use methodwire::handler::{BoxError, Controller, MethodTable};
//! use methodwire::{Router, StatusCode};
//!
//! struct Echo;
//!
//! impl Controller for Echo {
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.method("Echo", |_e: Arc<Echo>, text: String| async move {
//!             Ok::<_, BoxError>(text)
//!         });
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> methodwire::Result<()> {
//! let router = Router::builder().controller(Echo)?.build()?;
//!
//! let response = router
//!     .invoke("ECHO", Bytes::from_static(b"\"hi\""), "application/json")
//!     .await;
//! assert_eq!(response.status, StatusCode::OK);
//! assert_eq!(response.payload(), b"\"hi\"");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::chunk::{protocol_error, ChunkTransport};
use crate::codec::ContentType;
use crate::config::RouterConfig;
use crate::error::Result;
use crate::handler::{
    Controller, DefaultFailureFilter, FailureFilter, InvocationRegistry, InvocationResult,
    Invoker, MethodKey, RegistryBuilder, RegistryEntry,
};
use crate::protocol::{Response, StatusCode};

/// Builder for a [`Router`].
pub struct RouterBuilder {
    registry: RegistryBuilder,
    config: RouterConfig,
    failure_filter: Arc<dyn FailureFilter>,
}

impl RouterBuilder {
    /// Create a builder with default limits and no controllers.
    pub fn new() -> Self {
        Self {
            registry: RegistryBuilder::new(),
            config: RouterConfig::default(),
            failure_filter: Arc::new(DefaultFailureFilter),
        }
    }

    /// Register every handler of `controller`.
    pub fn controller<C: Controller>(self, controller: C) -> Result<Self> {
        self.shared_controller(Arc::new(controller))
    }

    /// Register a controller that is also used elsewhere.
    pub fn shared_controller<C: Controller>(mut self, controller: Arc<C>) -> Result<Self> {
        self.registry.register(controller)?;
        Ok(self)
    }

    /// Replace all limits at once.
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the per-call payload ceiling.
    ///
    /// Default: 127 KiB
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.config.max_message_size = bytes;
        self
    }

    /// Set the largest message rebuilt from chunks.
    ///
    /// Default: 4 MiB
    pub fn max_reassembled_size(mut self, bytes: usize) -> Self {
        self.config.max_reassembled_size = bytes;
        self
    }

    /// Set the idle lifetime of chunk sessions.
    ///
    /// Default: 60 seconds
    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.config.session_ttl = ttl;
        self
    }

    /// Set the maximum number of open chunk sessions.
    ///
    /// Default: 64
    pub fn max_sessions(mut self, limit: usize) -> Self {
        self.config.max_sessions = limit;
        self
    }

    /// Set the maximum number of calls dispatched at once.
    ///
    /// Default: 256
    pub fn max_concurrent_calls(mut self, limit: usize) -> Self {
        self.config.max_concurrent_calls = limit;
        self
    }

    /// Cancel handlers that run longer than `timeout`.
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.config.handler_timeout = Some(timeout);
        self
    }

    /// Sweep expired chunk sessions every `interval` once
    /// [`Router::spawn_session_reaper`] is called.
    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.config.reaper_interval = Some(interval);
        self
    }

    /// Replace the router-wide default failure filter.
    pub fn failure_filter(mut self, filter: impl FailureFilter) -> Self {
        self.failure_filter = Arc::new(filter);
        self
    }

    /// Validate the configuration and freeze the registry.
    pub fn build(self) -> Result<Router> {
        self.config.validate()?;

        let registry = self
            .registry
            .build(self.failure_filter, self.config.handler_timeout);
        tracing::info!(
            methods = registry.len(),
            max_message_size = self.config.max_message_size,
            "Router ready"
        );

        Ok(Router {
            inner: Arc::new(RouterInner {
                chunks: ChunkTransport::new(&self.config),
                permits: Arc::new(Semaphore::new(self.config.max_concurrent_calls)),
                registry,
                config: self.config,
            }),
        })
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point for method calls.
///
/// Cheap to clone; clones share the registry and chunk sessions.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    registry: InvocationRegistry,
    chunks: ChunkTransport,
    config: RouterConfig,
    permits: Arc<Semaphore>,
}

impl Router {
    /// Create a new router builder.
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Invoke `method` with `payload` encoded as `content_type`.
    ///
    /// Never fails: every outcome, including a panicking handler, is
    /// folded into the returned status and payload.
    pub async fn invoke(&self, method: &str, payload: Bytes, content_type: &str) -> Response {
        let permit = match self.inner.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(method, "Too many concurrent calls; rejecting");
                return Response::empty(StatusCode::TOO_MANY_REQUESTS);
            }
        };

        let inner = self.inner.clone();
        let method = method.to_string();
        let content_type = content_type.to_string();
        let task = tokio::spawn(async move {
            let _permit = permit;
            inner.handle(method, payload, content_type).await
        });

        match task.await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Invocation task failed: {}", e);
                Response::empty(StatusCode::INTERNAL_ERROR)
            }
        }
    }

    /// The frozen method table.
    pub fn registry(&self) -> &InvocationRegistry {
        &self.inner.registry
    }

    /// Limits this router was built with.
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Number of chunk sessions currently open.
    pub fn active_sessions(&self) -> usize {
        self.inner.chunks.active_sessions()
    }

    /// Drop expired chunk sessions now; returns how many were dropped.
    pub fn sweep_sessions(&self) -> usize {
        self.inner.chunks.sweep()
    }

    /// Spawn a task sweeping expired chunk sessions every
    /// `reaper_interval`.
    ///
    /// Returns `None` when no interval is configured. The task ends on its
    /// own once every clone of the router is dropped.
    pub fn spawn_session_reaper(&self) -> Option<JoinHandle<()>> {
        let period = self.inner.config.reaper_interval?;
        let weak = Arc::downgrade(&self.inner);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let swept = inner.chunks.sweep();
                if swept > 0 {
                    tracing::debug!(swept, "Session reaper dropped expired sessions");
                }
            }
            tracing::debug!("Session reaper stopped");
        }))
    }
}

impl RouterInner {
    async fn handle(self: Arc<Self>, method: String, payload: Bytes, content_type: String) -> Response {
        let key = MethodKey::normalize(&method);

        let Some(entry) = self.registry.get(&key) else {
            tracing::debug!(method = %key, "Method not supported");
            return Response::empty(StatusCode::NOT_SUPPORTED);
        };

        let content_type = match ContentType::parse(&content_type) {
            Ok(ct) => ct,
            Err(e) => {
                tracing::warn!(method = %key, "{}", e);
                return Response::empty(StatusCode::UNSUPPORTED_MEDIA_TYPE);
            }
        };

        if payload.len() > self.config.max_message_size {
            tracing::warn!(
                method = %key,
                size = payload.len(),
                limit = self.config.max_message_size,
                "Request payload too large"
            );
            return Response::empty(StatusCode::PAYLOAD_TOO_LARGE);
        }

        match entry {
            RegistryEntry::ChunkTransport => {
                let inner = self.clone();
                let response = self
                    .chunks
                    .accept(payload, move |method, payload, content_type| async move {
                        inner.dispatch_reassembled(method, payload, content_type).await
                    })
                    .await;
                if response.payload_len() > self.config.max_message_size {
                    tracing::warn!(method = %key, status = %response.status, "Chunk reply too large; dropped");
                }
                response.clamp_payload(self.config.max_message_size)
            }
            RegistryEntry::Methods(group) => {
                let result = group.invoke(payload, content_type).await;
                finish(&key, result, self.config.max_message_size)
            }
        }
    }

    /// Dispatch a message rebuilt from chunks. Its reply is chunked too, so
    /// the reassembly ceiling applies instead of the per-call one.
    async fn dispatch_reassembled(
        &self,
        method: String,
        payload: Bytes,
        content_type: ContentType,
    ) -> Response {
        let key = MethodKey::normalize(&method);

        match self.registry.get(&key) {
            None => {
                tracing::debug!(method = %key, "Chunked call to unsupported method");
                Response::empty(StatusCode::NOT_SUPPORTED)
            }
            Some(RegistryEntry::ChunkTransport) => {
                protocol_error("Chunked messages cannot target the chunk method")
            }
            Some(RegistryEntry::Methods(group)) => {
                let result = group.invoke(payload, content_type).await;
                finish(&key, result, self.config.max_reassembled_size)
            }
        }
    }
}

/// Fold an invocation outcome into a response no larger than `ceiling`.
fn finish(key: &MethodKey, result: InvocationResult, ceiling: usize) -> Response {
    match result {
        Ok(payload) if payload.len() > ceiling => {
            tracing::warn!(
                method = %key,
                size = payload.len(),
                limit = ceiling,
                "Result too large; dropped"
            );
            Response::empty(StatusCode::PAYLOAD_TOO_LARGE)
        }
        Ok(payload) => Response::ok(payload),
        Err(e) => {
            let response = Response {
                status: e.status,
                payload: e.payload,
            };
            if response.payload_len() > ceiling {
                tracing::warn!(method = %key, status = %response.status, "Error payload too large; dropped");
            }
            response.clamp_payload(ceiling)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{BoxError, MethodTable, Param, CHUNK_METHOD};
    use crate::protocol::ChunkEnvelope;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        hits: AtomicUsize,
    }

    impl Controller for Counter {
        fn methods(table: &mut MethodTable<Self>) {
            table.method_no_args("HitAsync", |c: Arc<Counter>| async move {
                Ok::<_, BoxError>(c.hits.fetch_add(1, Ordering::SeqCst) + 1)
            });
            table.method("Fill", |_c: Arc<Counter>, n: usize| async move {
                Ok::<_, BoxError>("x".repeat(n))
            });
            table.method_with_params(
                "Add",
                [Param::new("a"), Param::new("b").default_value(json!(10))],
                |_c: Arc<Counter>, (a, b): (i64, i64)| async move { Ok::<_, BoxError>(a + b) },
            );
            table.method_with_params(
                "Double",
                [Param::new("n")],
                |_c: Arc<Counter>, (n,): (u32,)| async move { Ok::<_, BoxError>(n * 2) },
            );
            table.method_no_args("Explode", |_c: Arc<Counter>| async move {
                if true {
                    panic!("boom");
                }
                Ok::<_, BoxError>(())
            });
        }
    }

    fn router() -> Router {
        Router::builder()
            .controller(Counter::default())
            .unwrap()
            .max_message_size(64)
            .max_reassembled_size(1024)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let r = router().invoke("doesnotexist", Bytes::new(), "").await;
        assert_eq!(r.status, StatusCode::NOT_SUPPORTED);
        assert!(r.payload.is_none());
    }

    #[tokio::test]
    async fn test_unknown_method_checked_first() {
        let r = router().invoke("nope", Bytes::new(), "text/xml").await;
        assert_eq!(r.status, StatusCode::NOT_SUPPORTED);

        let r = router()
            .invoke("nope", Bytes::from(vec![b' '; 65]), "application/json")
            .await;
        assert_eq!(r.status, StatusCode::NOT_SUPPORTED);
        assert!(r.payload.is_none());
    }

    #[tokio::test]
    async fn test_chunk_errors_respect_ceiling() {
        let stray = ChunkEnvelope::new(u64::MAX, 7, false, "fill", ContentType::Json, Bytes::new());
        let r = router()
            .invoke(CHUNK_METHOD, stray.encode().unwrap(), "application/json")
            .await;

        assert_eq!(r.status, StatusCode::BAD_REQUEST);
        assert!(r.payload_len() <= 64);
    }

    #[tokio::test]
    async fn test_single_param_takes_whole_payload() {
        let r = router()
            .invoke("double", Bytes::from_static(b"21"), "application/json")
            .await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.payload(), b"42");
    }

    #[tokio::test]
    async fn test_named_params_with_default() {
        let r = router()
            .invoke("add", Bytes::from_static(br#"{"A":5}"#), "application/json")
            .await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.payload(), b"15");
    }

    #[tokio::test]
    async fn test_unsupported_content_type() {
        let r = router().invoke("hit", Bytes::new(), "text/xml").await;
        assert_eq!(r.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_inbound_too_large() {
        let payload = Bytes::from(vec![b' '; 65]);
        let r = router().invoke("fill", payload, "application/json").await;
        assert_eq!(r.status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_result_ceiling() {
        let router = router();

        // 62 chars plus two quotes.
        let r = router.invoke("fill", Bytes::from_static(b"62"), "").await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.payload_len(), 64);

        let r = router.invoke("fill", Bytes::from_static(b"63"), "").await;
        assert_eq!(r.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(r.payload.is_none());
    }

    #[tokio::test]
    async fn test_panic_is_internal_error() {
        let r = router().invoke("explode", Bytes::new(), "").await;
        assert_eq!(r.status, StatusCode::INTERNAL_ERROR);
        assert!(r.payload.is_none());
    }

    #[tokio::test]
    async fn test_decode_error_default_filter() {
        let r = router()
            .invoke("fill", Bytes::from_static(b"\"many\""), "application/json")
            .await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);

        let body: Value = serde_json::from_slice(r.payload()).unwrap();
        assert_eq!(body["error"], "decode");
    }

    #[tokio::test]
    async fn test_msgpack_call() {
        let payload = ContentType::MsgPack.encode(&json!({"a": 1, "b": 2})).unwrap();
        let r = router()
            .invoke("Add", Bytes::from(payload), "application/msgpack")
            .await;

        assert_eq!(r.status, StatusCode::OK);
        let sum: i64 = ContentType::MsgPack.decode(r.payload()).unwrap();
        assert_eq!(sum, 3);
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let router = Router::builder()
            .controller(Counter::default())
            .unwrap()
            .max_concurrent_calls(1)
            .build()
            .unwrap();

        let _held = router.inner.permits.clone().try_acquire_owned().unwrap();
        let r = router.invoke("hit", Bytes::new(), "").await;
        assert_eq!(r.status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_reaper_requires_interval() {
        assert!(router().spawn_session_reaper().is_none());

        let router = Router::builder()
            .reaper_interval(Duration::from_millis(5))
            .build()
            .unwrap();
        let reaper = router.spawn_session_reaper().unwrap();
        drop(router);

        tokio::time::timeout(Duration::from_secs(1), reaper)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_build_validates_config() {
        assert!(Router::builder().max_sessions(0).build().is_err());
    }
}
