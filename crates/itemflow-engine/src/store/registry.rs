//! Adapter registry and connection-string resolution.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

use crate::error::{EngineError, EngineResult};
use crate::store::adapter::{AdapterFactory, AdapterInit};
use crate::store::{json, memory, sqlite};

/// Registry of adapter factories keyed by URL scheme.
pub struct AdapterRegistry {
    factories: HashMap<String, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the built-in `memory`, `json` and `sqlite` adapters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("memory", memory::factory);
        registry.register("json", json::factory);
        registry.register("sqlite", sqlite::factory);
        registry
    }

    /// Register a factory for a scheme, replacing any previous one.
    pub fn register<F: AdapterFactory + 'static>(&mut self, scheme: &str, factory: F) {
        self.factories
            .insert(scheme.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Check if a scheme is registered.
    pub fn has(&self, scheme: &str) -> bool {
        self.factories.contains_key(&scheme.to_ascii_lowercase())
    }

    /// List all registered schemes, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Resolve a connection string to an adapter (or a pending adapter).
    pub fn resolve(&self, connection: &str) -> EngineResult<AdapterInit> {
        let url = Url::parse(connection).map_err(|e| {
            EngineError::AdapterResolution(format!(
                "invalid connection string `{}`: {}",
                connection, e
            ))
        })?;

        let factory = self.factories.get(url.scheme()).ok_or_else(|| {
            EngineError::AdapterResolution(format!(
                "no adapter registered for scheme `{}` (known: {})",
                url.scheme(),
                self.list().join(", ")
            ))
        })?;

        tracing::debug!(scheme = %url.scheme(), "Resolving state store adapter");
        factory.init(&url)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("schemes", &self.list())
            .finish()
    }
}

static GLOBAL_REGISTRY: Lazy<RwLock<AdapterRegistry>> =
    Lazy::new(|| RwLock::new(AdapterRegistry::with_builtins()));

/// Register an adapter factory in the process-wide registry.
pub fn register_adapter<F: AdapterFactory + 'static>(scheme: &str, factory: F) {
    GLOBAL_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(scheme, factory);
}

/// Resolve a connection string against the process-wide registry.
pub fn resolve_adapter(connection: &str) -> EngineResult<AdapterInit> {
    GLOBAL_REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .resolve(connection)
}
