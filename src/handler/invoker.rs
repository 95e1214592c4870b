//! Typed invokers - decode, invoke and encode for one handler method.
//!
//! Each handler shape (no arguments, one whole-payload argument, several
//! named arguments) has its own wrapper implementing [`HandlerMethod`], so
//! the registry can store every handler behind one object-safe interface
//! without knowing its signature.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::filter::{BoxError, Failure, FailureFilter};
use super::key::MethodKey;
use crate::codec::ContentType;
use crate::error::{MethodwireError, Result};
use crate::protocol::StatusCode;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a filtered failure: the single error type callers match on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationError {
    /// Status chosen by the failure filter.
    pub status: StatusCode,
    /// Encoded error object, if it could be encoded.
    pub payload: Option<Bytes>,
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invocation failed with status {}", self.status)
    }
}

impl std::error::Error for InvocationError {}

/// Result of one invocation: encoded result or filtered error.
pub type InvocationResult = std::result::Result<Bytes, InvocationError>;

/// Object-safe invocation interface shared by typed invokers and overload
/// groups.
pub trait Invoker: Send + Sync + 'static {
    /// Invoke with a raw payload in `content_type` format.
    fn invoke(&self, payload: Bytes, content_type: ContentType)
        -> BoxFuture<'static, InvocationResult>;
}

/// One handler method bound to its controller, before failure filtering.
pub trait HandlerMethod: Send + Sync + 'static {
    /// Decode `payload`, run the handler and encode its result.
    fn call(
        &self,
        payload: Bytes,
        content_type: ContentType,
    ) -> BoxFuture<'static, std::result::Result<Bytes, Failure>>;
}

fn encode_result<R: Serialize>(
    content_type: ContentType,
    outcome: std::result::Result<R, BoxError>,
) -> std::result::Result<Bytes, Failure> {
    let value = outcome.map_err(Failure::Handler)?;
    content_type
        .encode(&value)
        .map(Bytes::from)
        .map_err(Failure::Encode)
}

fn ready_failure(failure: Failure) -> BoxFuture<'static, std::result::Result<Bytes, Failure>> {
    Box::pin(async move { Err(failure) })
}

// ============================================================================
// Handler shapes
// ============================================================================

/// Handler taking no arguments; the payload is ignored.
pub struct NoArgs<C, F, R, E, Fut> {
    controller: Arc<C>,
    handler: F,
    _phantom: PhantomData<fn() -> (R, E, Fut)>,
}

impl<C, F, R, E, Fut> NoArgs<C, F, R, E, Fut>
where
    F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    /// Bind `handler` to `controller`.
    pub fn new(controller: Arc<C>, handler: F) -> Self {
        Self {
            controller,
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<C, F, R, E, Fut> HandlerMethod for NoArgs<C, F, R, E, Fut>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    R: Serialize + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn call(
        &self,
        _payload: Bytes,
        content_type: ContentType,
    ) -> BoxFuture<'static, std::result::Result<Bytes, Failure>> {
        let fut = (self.handler)(self.controller.clone());
        Box::pin(async move { encode_result(content_type, fut.await.map_err(Into::into)) })
    }
}

/// Handler taking exactly one argument; the whole payload is decoded as it.
pub struct Unary<C, F, T, R, E, Fut> {
    controller: Arc<C>,
    handler: F,
    _phantom: PhantomData<fn(T) -> (R, E, Fut)>,
}

impl<C, F, T, R, E, Fut> Unary<C, F, T, R, E, Fut>
where
    F: Fn(Arc<C>, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    /// Bind `handler` to `controller`.
    pub fn new(controller: Arc<C>, handler: F) -> Self {
        Self {
            controller,
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<C, F, T, R, E, Fut> HandlerMethod for Unary<C, F, T, R, E, Fut>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    R: Serialize + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn call(
        &self,
        payload: Bytes,
        content_type: ContentType,
    ) -> BoxFuture<'static, std::result::Result<Bytes, Failure>> {
        let arg: T = match content_type.decode(&payload) {
            Ok(v) => v,
            Err(e) => return ready_failure(Failure::Decode(e)),
        };

        let fut = (self.handler)(self.controller.clone(), arg);
        Box::pin(async move { encode_result(content_type, fut.await.map_err(Into::into)) })
    }
}

/// Handler with declared parameters. Two or more are matched by name from
/// a key/value document; a single one takes the whole payload.
pub struct Named<C, F, P: NamedParams, R, E, Fut> {
    controller: Arc<C>,
    handler: F,
    params: P::Params,
    _phantom: PhantomData<fn(P) -> (R, E, Fut)>,
}

impl<C, F, P, R, E, Fut> Named<C, F, P, R, E, Fut>
where
    F: Fn(Arc<C>, P) -> Fut + Send + Sync + 'static,
    P: NamedParams,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    /// Bind `handler` to `controller` with parameter declarations `params`.
    pub fn new(controller: Arc<C>, params: P::Params, handler: F) -> Self {
        Self {
            controller,
            handler,
            params,
            _phantom: PhantomData,
        }
    }
}

impl<C, F, P, R, E, Fut> HandlerMethod for Named<C, F, P, R, E, Fut>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, P) -> Fut + Send + Sync + 'static,
    P: NamedParams,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    R: Serialize + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn call(
        &self,
        payload: Bytes,
        content_type: ContentType,
    ) -> BoxFuture<'static, std::result::Result<Bytes, Failure>> {
        let args = match P::decode(content_type, &payload, self.params.as_ref()) {
            Ok(args) => args,
            Err(e) => return ready_failure(Failure::Decode(e)),
        };

        let fut = (self.handler)(self.controller.clone(), args);
        Box::pin(async move { encode_result(content_type, fut.await.map_err(Into::into)) })
    }
}

// ============================================================================
// Named parameters
// ============================================================================

/// Declaration of one named parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    name: String,
    default: Option<Value>,
}

impl Param {
    /// Parameter `name` whose absence yields the type's `Default` value.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    /// Use `value` when the parameter is absent from the document.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Declared name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<&str> for Param {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Decode a payload as a key/value document. Empty or `null` payloads are
/// an empty document.
fn decode_document(content_type: ContentType, payload: &[u8]) -> Result<Map<String, Value>> {
    match content_type.decode::<Value>(payload)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(MethodwireError::Protocol(format!(
            "expected a key/value document, got {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Extract one argument: matched by name ignoring case, falling back to the
/// declared default, then to `T::default()`.
pub fn extract_param<T>(doc: &Map<String, Value>, param: &Param) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let found = doc
        .iter()
        .find(|(key, _)| key.to_lowercase() == param.name.to_lowercase())
        .map(|(_, value)| value);

    match (found, &param.default) {
        (Some(value), _) => T::deserialize(value).map_err(|e| {
            MethodwireError::Protocol(format!("parameter '{}': {}", param.name, e))
        }),
        (None, Some(default)) => T::deserialize(default).map_err(|e| {
            MethodwireError::Protocol(format!("default for parameter '{}': {}", param.name, e))
        }),
        (None, None) => Ok(T::default()),
    }
}

/// Argument tuples built from a payload and their parameter declarations.
pub trait NamedParams: Sized + Send + 'static {
    /// Parameter declarations, one per tuple element.
    type Params: AsRef<[Param]> + Send + Sync + 'static;

    /// Build the argument tuple from `payload`.
    fn decode(content_type: ContentType, payload: &[u8], params: &[Param]) -> Result<Self>;
}

// One parameter: the whole payload is the argument, as with `Unary`.
impl<A> NamedParams for (A,)
where
    A: DeserializeOwned + Send + 'static,
{
    type Params = [Param; 1];

    fn decode(content_type: ContentType, payload: &[u8], _params: &[Param]) -> Result<Self> {
        content_type.decode::<A>(payload).map(|a| (a,))
    }
}

macro_rules! impl_named_params {
    ($len:expr; $($ty:ident => $idx:tt),+) => {
        impl<$($ty),+> NamedParams for ($($ty,)+)
        where
            $($ty: DeserializeOwned + Default + Send + 'static),+
        {
            type Params = [Param; $len];

            fn decode(content_type: ContentType, payload: &[u8], params: &[Param]) -> Result<Self> {
                let doc = decode_document(content_type, payload)?;
                Ok(($(extract_param::<$ty>(&doc, &params[$idx])?,)+))
            }
        }
    };
}

impl_named_params!(2; A => 0, B => 1);
impl_named_params!(3; A => 0, B => 1, C => 2);
impl_named_params!(4; A => 0, B => 1, C => 2, D => 3);
impl_named_params!(5; A => 0, B => 1, C => 2, D => 3, E => 4);
impl_named_params!(6; A => 0, B => 1, C => 2, D => 3, E => 4, F => 5);

// ============================================================================
// Typed invoker
// ============================================================================

/// One handler method with its effective failure filter.
pub struct TypedInvoker {
    key: MethodKey,
    handler_name: String,
    method: Arc<dyn HandlerMethod>,
    filter: Arc<dyn FailureFilter>,
    timeout: Option<Duration>,
}

impl TypedInvoker {
    /// Create an invoker.
    pub fn new(
        key: MethodKey,
        handler_name: impl Into<String>,
        method: Arc<dyn HandlerMethod>,
        filter: Arc<dyn FailureFilter>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            key,
            handler_name: handler_name.into(),
            method,
            filter,
            timeout,
        }
    }

    /// Key this invoker is registered under.
    pub fn key(&self) -> &MethodKey {
        &self.key
    }

    /// Handler name as declared by the controller.
    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }
}

/// Filter `failure` and encode the reported error.
fn reject(
    filter: &dyn FailureFilter,
    failure: &Failure,
    content_type: ContentType,
) -> InvocationError {
    let filtered = filter.filter(failure);
    let payload = match content_type.encode(&filtered.error) {
        Ok(bytes) => Some(Bytes::from(bytes)),
        Err(e) => {
            tracing::warn!("Failed to encode filtered error: {}", e);
            None
        }
    };

    InvocationError {
        status: filtered.status,
        payload,
    }
}

impl Invoker for TypedInvoker {
    fn invoke(
        &self,
        payload: Bytes,
        content_type: ContentType,
    ) -> BoxFuture<'static, InvocationResult> {
        let call = self.method.call(payload, content_type);
        let filter = self.filter.clone();
        let timeout = self.timeout;
        let handler = self.handler_name.clone();

        Box::pin(async move {
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Failure::Cancelled(limit)),
                },
                None => call.await,
            };

            outcome.map_err(|failure| {
                tracing::debug!(handler = %handler, kind = failure.kind(), "Invocation failed: {}", failure);
                reject(filter.as_ref(), &failure, content_type)
            })
        })
    }
}
