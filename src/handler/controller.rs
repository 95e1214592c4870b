//! Controllers and their handler tables.
//!
//! A controller bundles handler methods under one version tag and one
//! failure filter. Handlers are listed explicitly in
//! [`Controller::methods`]; each entry records its name, its parameter
//! shape and, optionally, its own filter.
//!
//! Only handlers producing a single asynchronous value are accepted: every
//! registration function requires `Future<Output = Result<R, E>>` with
//! `R: Serialize`, so fire-and-forget or multi-value handlers cannot be
//! expressed.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use methodwire::handler::{BoxError, Controller, MethodTable, Param};
//!
//! struct Thermostat;
//!
//! impl Controller for Thermostat {
//!     fn version(&self) -> Option<&str> {
//!         Some("2")
//!     }
//!
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table.method_no_args("GetTemperatureAsync", |_t: Arc<Thermostat>| async move {
//!             Ok::<_, BoxError>(21.5)
//!         });
//!         table.method_with_params(
//!             "SetPoint",
//!             [Param::new("zone"), Param::new("celsius")],
//!             |_t: Arc<Thermostat>, (zone, celsius): (String, f64)| async move {
//!                 Ok::<_, BoxError>(format!("{zone}={celsius}"))
//!             },
//!         );
//!     }
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::filter::{BoxError, FailureFilter};
use super::invoker::{HandlerMethod, Named, NamedParams, NoArgs, Unary};

/// An object exposing handler methods.
pub trait Controller: Send + Sync + Sized + 'static {
    /// Version tag appended to every key as `_v<version>`.
    fn version(&self) -> Option<&str> {
        None
    }

    /// Filter applied to handlers that do not declare their own.
    fn failure_filter(&self) -> Option<Arc<dyn FailureFilter>> {
        None
    }

    /// List this controller's handlers.
    fn methods(table: &mut MethodTable<Self>);
}

/// One handler as declared by a controller.
pub struct HandlerDescriptor {
    pub(crate) name: String,
    pub(crate) method: Arc<dyn HandlerMethod>,
    pub(crate) filter: Option<Arc<dyn FailureFilter>>,
}

impl HandlerDescriptor {
    /// Override the failure filter for this handler only.
    pub fn with_filter(&mut self, filter: impl FailureFilter) -> &mut Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Declared handler name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Handler table being filled in by [`Controller::methods`].
pub struct MethodTable<C> {
    controller: Arc<C>,
    handlers: Vec<HandlerDescriptor>,
}

impl<C: Controller> MethodTable<C> {
    /// Create an empty table bound to `controller`.
    pub fn new(controller: Arc<C>) -> Self {
        Self {
            controller,
            handlers: Vec::new(),
        }
    }

    /// The controller instance handlers are bound to.
    pub fn controller(&self) -> &Arc<C> {
        &self.controller
    }

    fn push(&mut self, name: &str, method: Arc<dyn HandlerMethod>) -> &mut HandlerDescriptor {
        self.handlers.push(HandlerDescriptor {
            name: name.to_string(),
            method,
            filter: None,
        });
        let last = self.handlers.len() - 1;
        &mut self.handlers[last]
    }

    /// Register a handler whose single argument is the whole payload.
    pub fn method<F, T, R, E, Fut>(&mut self, name: &str, handler: F) -> &mut HandlerDescriptor
    where
        F: Fn(Arc<C>, T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Serialize + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let method = Unary::new(self.controller.clone(), handler);
        self.push(name, Arc::new(method))
    }

    /// Register a handler whose arguments are matched by name.
    ///
    /// `params` declares one [`Param`](super::Param) per tuple element, in
    /// order. A one-element tuple behaves like [`method`](Self::method): the
    /// whole payload is its argument.
    pub fn method_with_params<F, P, R, E, Fut>(
        &mut self,
        name: &str,
        params: P::Params,
        handler: F,
    ) -> &mut HandlerDescriptor
    where
        F: Fn(Arc<C>, P) -> Fut + Send + Sync + 'static,
        P: NamedParams,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Serialize + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let method = Named::new(self.controller.clone(), params, handler);
        self.push(name, Arc::new(method))
    }

    /// Register a handler that takes no arguments.
    pub fn method_no_args<F, R, E, Fut>(&mut self, name: &str, handler: F) -> &mut HandlerDescriptor
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Serialize + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let method = NoArgs::new(self.controller.clone(), handler);
        self.push(name, Arc::new(method))
    }

    /// Number of handlers declared so far.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers have been declared.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub(crate) fn into_handlers(self) -> Vec<HandlerDescriptor> {
        self.handlers
    }
}
