//! Handler module - registration and typed invocation.
//!
//! Provides:
//! - [`Controller`] / [`MethodTable`] - how handler methods are declared
//! - [`RegistryBuilder`] / [`InvocationRegistry`] - method key to invoker
//! - [`TypedInvoker`] / [`OverloadGroup`] - decode, invoke, encode
//! - [`FailureFilter`] - maps handler failures to statuses

mod controller;
mod filter;
mod invoker;
mod key;
mod overload;
mod registry;

pub use controller::{Controller, HandlerDescriptor, MethodTable};
pub use filter::{BoxError, DefaultFailureFilter, Failure, FailureFilter, FilteredFailure};
pub use invoker::{
    extract_param, BoxFuture, HandlerMethod, InvocationError, InvocationResult, Invoker, Named,
    NamedParams, NoArgs, Param, TypedInvoker, Unary,
};
pub use key::MethodKey;
pub use overload::OverloadGroup;
pub use registry::{InvocationRegistry, RegistryBuilder, RegistryEntry, CHUNK_METHOD};
