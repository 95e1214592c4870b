//! Invocation registry mapping method keys to invokers.
//!
//! Registration happens once, on a [`RegistryBuilder`], while the router is
//! being composed. [`RegistryBuilder::build`] freezes the table into an
//! [`InvocationRegistry`] which is never mutated afterwards and can be
//! shared freely between concurrent calls.
//!
//! The chunk transport key ([`CHUNK_METHOD`]) is installed before any
//! controller and cannot be shadowed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::controller::{Controller, HandlerDescriptor, MethodTable};
use super::filter::FailureFilter;
use super::invoker::TypedInvoker;
use super::key::MethodKey;
use super::overload::OverloadGroup;
use crate::error::{MethodwireError, Result};

/// Reserved method name carrying chunk envelopes.
pub const CHUNK_METHOD: &str = "$chunk";

/// What a registry key resolves to.
pub enum RegistryEntry {
    /// One or more handler methods sharing the key.
    Methods(OverloadGroup),
    /// The chunk transport adapter.
    ChunkTransport,
}

impl RegistryEntry {
    /// Number of handler candidates (0 for the chunk transport).
    pub fn candidates(&self) -> usize {
        match self {
            RegistryEntry::Methods(group) => group.len(),
            RegistryEntry::ChunkTransport => 0,
        }
    }
}

/// A handler waiting for [`RegistryBuilder::build`].
struct PendingHandler {
    descriptor: HandlerDescriptor,
    controller_filter: Option<Arc<dyn FailureFilter>>,
}

enum PendingEntry {
    Methods(Vec<PendingHandler>),
    ChunkTransport,
}

/// Mutable registration table.
pub struct RegistryBuilder {
    entries: HashMap<MethodKey, PendingEntry>,
    order: Vec<MethodKey>,
}

impl RegistryBuilder {
    /// Create a builder with the chunk transport key installed.
    pub fn new() -> Self {
        let chunk_key = MethodKey::normalize(CHUNK_METHOD);
        let mut entries = HashMap::new();
        entries.insert(chunk_key.clone(), PendingEntry::ChunkTransport);

        Self {
            entries,
            order: vec![chunk_key],
        }
    }

    /// Register every handler `controller` declares.
    ///
    /// Handlers whose key already exists join that key's overload group
    /// after the existing candidates. Nothing is registered if any handler
    /// name is invalid or collides with a reserved key.
    pub fn register<C: Controller>(&mut self, controller: Arc<C>) -> Result<()> {
        let version = controller.version().map(str::to_string);
        let controller_filter = controller.failure_filter();

        let mut table = MethodTable::new(controller);
        C::methods(&mut table);
        let handlers = table.into_handlers();

        let mut keyed = Vec::with_capacity(handlers.len());
        for descriptor in handlers {
            let key = MethodKey::for_handler(&descriptor.name, version.as_deref())?;
            if let Some(PendingEntry::ChunkTransport) = self.entries.get(&key) {
                return Err(MethodwireError::ReservedMethod(descriptor.name));
            }
            keyed.push((key, descriptor));
        }

        for (key, descriptor) in keyed {
            tracing::info!(method = %key, handler = %descriptor.name, "Registered method");

            let pending = PendingHandler {
                descriptor,
                controller_filter: controller_filter.clone(),
            };

            match self.entries.get_mut(&key) {
                Some(PendingEntry::Methods(group)) => group.push(pending),
                Some(PendingEntry::ChunkTransport) => {
                    // Checked above.
                    return Err(MethodwireError::ReservedMethod(key.to_string()));
                }
                None => {
                    self.order.push(key.clone());
                    self.entries.insert(key, PendingEntry::Methods(vec![pending]));
                }
            }
        }

        Ok(())
    }

    /// Number of keys registered so far, including the chunk transport.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether only the reserved keys are present.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Freeze the table.
    ///
    /// Each handler gets its effective failure filter here: its own, else
    /// its controller's, else `default_filter`.
    pub fn build(
        self,
        default_filter: Arc<dyn FailureFilter>,
        handler_timeout: Option<Duration>,
    ) -> InvocationRegistry {
        let mut entries = self.entries;
        let mut built = HashMap::with_capacity(entries.len());

        for key in &self.order {
            let Some(pending) = entries.remove(key) else {
                continue;
            };

            let entry = match pending {
                PendingEntry::ChunkTransport => RegistryEntry::ChunkTransport,
                PendingEntry::Methods(handlers) => {
                    let mut group = OverloadGroup::new(key.clone());
                    for handler in handlers {
                        let filter = handler
                            .descriptor
                            .filter
                            .or(handler.controller_filter)
                            .unwrap_or_else(|| default_filter.clone());

                        group.push(TypedInvoker::new(
                            key.clone(),
                            handler.descriptor.name,
                            handler.descriptor.method,
                            filter,
                            handler_timeout,
                        ));
                    }
                    RegistryEntry::Methods(group)
                }
            };
            built.insert(key.clone(), entry);
        }

        InvocationRegistry {
            entries: built,
            order: self.order,
        }
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable method table.
pub struct InvocationRegistry {
    entries: HashMap<MethodKey, RegistryEntry>,
    order: Vec<MethodKey>,
}

impl InvocationRegistry {
    /// Look up a caller-supplied method name, normalizing it first.
    pub fn lookup(&self, method: &str) -> Option<&RegistryEntry> {
        self.get(&MethodKey::normalize(method))
    }

    /// Look up an already normalized key.
    pub fn get(&self, key: &MethodKey) -> Option<&RegistryEntry> {
        self.entries.get(key)
    }

    /// Registered keys in registration order, the chunk transport first.
    pub fn method_keys(&self) -> impl Iterator<Item = &MethodKey> {
        self.order.iter()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no controller methods are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ContentType;
    use crate::handler::filter::{BoxError, DefaultFailureFilter, Failure, FilteredFailure};
    use crate::handler::invoker::Invoker;
    use crate::protocol::StatusCode;
    use bytes::Bytes;

    struct Heater;

    impl Controller for Heater {
        fn methods(table: &mut MethodTable<Self>) {
            table.method_no_args("GetStatusAsync", |_h: Arc<Heater>| async move {
                Ok::<_, BoxError>("idle")
            });
            table.method("SetLevel", |_h: Arc<Heater>, level: u8| async move {
                Ok::<_, BoxError>(level)
            });
        }
    }

    struct HeaterV2;

    impl Controller for HeaterV2 {
        fn version(&self) -> Option<&str> {
            Some("2")
        }

        fn failure_filter(&self) -> Option<Arc<dyn FailureFilter>> {
            Some(Arc::new(|_: &Failure| {
                FilteredFailure::status_only(StatusCode::new(422))
            }))
        }

        fn methods(table: &mut MethodTable<Self>) {
            table.method("SetLevel", |_h: Arc<HeaterV2>, level: u8| async move {
                Ok::<_, BoxError>(level * 2)
            });
        }
    }

    struct Hijacker;

    impl Controller for Hijacker {
        fn methods(table: &mut MethodTable<Self>) {
            table.method_no_args("Ping", |_h: Arc<Hijacker>| async move { Ok::<_, BoxError>(()) });
            table.method_no_args("$CHUNK", |_h: Arc<Hijacker>| async move {
                Ok::<_, BoxError>(())
            });
        }
    }

    fn build(builder: RegistryBuilder) -> InvocationRegistry {
        builder.build(Arc::new(DefaultFailureFilter), None)
    }

    #[test]
    fn test_chunk_key_installed_first() {
        let registry = build(RegistryBuilder::new());

        assert!(matches!(
            registry.lookup(CHUNK_METHOD),
            Some(RegistryEntry::ChunkTransport)
        ));
        assert_eq!(registry.method_keys().next().unwrap().as_str(), "$chunk");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lookup_any_casing() {
        let mut builder = RegistryBuilder::new();
        builder.register(Arc::new(Heater)).unwrap();
        let registry = build(builder);

        for name in ["getstatus", "GETSTATUS", "  GetStatus ", "getStatus"] {
            assert!(registry.lookup(name).is_some(), "lookup {:?}", name);
        }
        assert!(registry.lookup("GetStatusAsync").is_none());
    }

    #[test]
    fn test_versioned_keys() {
        let mut builder = RegistryBuilder::new();
        builder.register(Arc::new(Heater)).unwrap();
        builder.register(Arc::new(HeaterV2)).unwrap();
        let registry = build(builder);

        let keys: Vec<_> = registry.method_keys().map(MethodKey::as_str).collect();
        assert_eq!(keys, vec!["$chunk", "getstatus", "setlevel", "setlevel_v2"]);
    }

    #[test]
    fn test_same_key_joins_overload_group() {
        let mut builder = RegistryBuilder::new();
        builder.register(Arc::new(Heater)).unwrap();
        builder.register(Arc::new(Heater)).unwrap();
        let registry = build(builder);

        assert_eq!(registry.lookup("setlevel").unwrap().candidates(), 2);
    }

    #[test]
    fn test_reserved_key_rejected_atomically() {
        let mut builder = RegistryBuilder::new();
        let err = builder.register(Arc::new(Hijacker)).unwrap_err();

        assert!(matches!(err, MethodwireError::ReservedMethod(_)));
        assert_eq!(builder.len(), 1);
    }

    #[tokio::test]
    async fn test_controller_filter_applies() {
        let mut builder = RegistryBuilder::new();
        builder.register(Arc::new(HeaterV2)).unwrap();
        let registry = build(builder);

        let Some(RegistryEntry::Methods(group)) = registry.lookup("SetLevel_v2") else {
            panic!("missing setlevel_v2");
        };
        let err = group
            .invoke(Bytes::from_static(b"\"high\""), ContentType::Json)
            .await
            .unwrap_err();
        assert_eq!(err.status.as_u16(), 422);
    }
}
