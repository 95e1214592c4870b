//! Failure filtering - turns a raw invocation failure into a reported error
//! and a status code.
//!
//! The effective filter for a handler is the most specific one available:
//! the handler's own, then its controller's, then the router default
//! ([`DefaultFailureFilter`]).
//!
//! # Example
//!
//! ```
//! use methodwire::handler::{Failure, FilteredFailure};
//! use methodwire::StatusCode;
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("device busy")]
//! struct Busy;
//!
//! let filter = |failure: &Failure| match failure.downcast_ref::<Busy>() {
//!     Some(_) => FilteredFailure::new(StatusCode::new(409), serde_json::json!({"busy": true})),
//!     None => FilteredFailure::bad_request(failure),
//! };
//! # let _ = filter;
//! ```

use std::error::Error as StdError;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use crate::error::MethodwireError;
use crate::protocol::StatusCode;

/// Boxed error returned by handlers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Raw failure of one typed invocation, before filtering.
#[derive(Debug, Error)]
pub enum Failure {
    /// Payload could not be decoded into the handler's parameters.
    #[error("invalid payload: {0}")]
    Decode(#[source] MethodwireError),

    /// The handler returned an error.
    #[error("{0}")]
    Handler(#[source] BoxError),

    /// The handler did not complete within the configured timeout.
    #[error("invocation cancelled after {0:?}")]
    Cancelled(Duration),

    /// The handler's result could not be encoded.
    #[error("result could not be encoded: {0}")]
    Encode(#[source] MethodwireError),
}

impl Failure {
    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Handler(_) => "handler",
            Self::Cancelled(_) => "cancelled",
            Self::Encode(_) => "encode",
        }
    }

    /// Downcast a handler error to a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Handler(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Whether this failure happened before the handler ran.
    #[inline]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Result of filtering a failure: the status and the error object to report.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredFailure {
    /// Status returned to the caller.
    pub status: StatusCode,
    /// Error object encoded as the payload; `None` encodes as `null`.
    pub error: Option<Value>,
}

impl FilteredFailure {
    /// Report `error` with `status`.
    pub fn new(status: StatusCode, error: Value) -> Self {
        Self {
            status,
            error: Some(error),
        }
    }

    /// Report `status` with a `null` error object.
    pub fn status_only(status: StatusCode) -> Self {
        Self {
            status,
            error: None,
        }
    }

    /// The default mapping: 400 with the failure kind and message.
    pub fn bad_request(failure: &Failure) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            json!({
                "error": failure.kind(),
                "message": failure.to_string(),
            }),
        )
    }
}

/// Policy converting a raised failure into `(reportedError, statusCode)`.
pub trait FailureFilter: Send + Sync + 'static {
    /// Map `failure` to what the caller sees.
    fn filter(&self, failure: &Failure) -> FilteredFailure;
}

impl<F> FailureFilter for F
where
    F: Fn(&Failure) -> FilteredFailure + Send + Sync + 'static,
{
    fn filter(&self, failure: &Failure) -> FilteredFailure {
        self(failure)
    }
}

/// Maps every failure to "bad request".
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFailureFilter;

impl FailureFilter for DefaultFailureFilter {
    fn filter(&self, failure: &Failure) -> FilteredFailure {
        FilteredFailure::bad_request(failure)
    }
}
