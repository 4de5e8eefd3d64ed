//! Adapter construction by protocol.

use crate::adapter::{AdapterError, EndpointAdapter};
use crate::console::ConsoleAdapter;
use crate::pipe::PipeAdapter;
use slobridge_core::{ProtocolKind, SocketSpec};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds an adapter for one socket.
pub type AdapterConstructor =
    Box<dyn Fn(&SocketSpec) -> Result<Arc<dyn EndpointAdapter>, AdapterError> + Send + Sync>;

/// Protocol to adapter constructor mapping.
///
/// Network clients live outside this crate and are plugged in with
/// [`AdapterRegistry::register`]. Sockets whose protocol has no constructor
/// fail at startup instead of retrying forever.
pub struct AdapterRegistry {
    constructors: HashMap<ProtocolKind, AdapterConstructor>,
}

impl AdapterRegistry {
    /// Create a registry with no adapters.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Create a registry with the local adapters (`fifo`, `console`).
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(ProtocolKind::Fifo, |spec| {
            Ok(Arc::new(PipeAdapter::from_spec(spec)?) as Arc<dyn EndpointAdapter>)
        });
        registry.register(ProtocolKind::Console, |spec| {
            Ok(Arc::new(ConsoleAdapter::stdout(spec.id.clone())) as Arc<dyn EndpointAdapter>)
        });
        registry
    }

    /// Register (or replace) the constructor for a protocol.
    pub fn register<F>(&mut self, protocol: ProtocolKind, constructor: F)
    where
        F: Fn(&SocketSpec) -> Result<Arc<dyn EndpointAdapter>, AdapterError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(protocol, Box::new(constructor));
    }

    /// Check if a protocol can be served.
    #[must_use]
    pub fn supports(&self, protocol: ProtocolKind) -> bool {
        self.constructors.contains_key(&protocol)
    }

    /// Build the adapter for a socket.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Unsupported`] for an unregistered protocol, or
    /// the constructor's error.
    pub fn build(&self, spec: &SocketSpec) -> Result<Arc<dyn EndpointAdapter>, AdapterError> {
        let constructor = self
            .constructors
            .get(&spec.protocol)
            .ok_or(AdapterError::Unsupported(spec.protocol))?;
        constructor(spec)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
