//! Namespaced, TTL-aware state store over swappable adapters.
//!
//! A [`Store`] is built either from a live adapter or from a connection
//! string whose scheme selects a registered [`AdapterFactory`]. Adapters that
//! need asynchronous setup are awaited lazily: the first operation drives the
//! pending future, every concurrent caller shares it, and the store flips to
//! ready exactly once.

mod adapter;
pub mod json;
pub mod memory;
mod registry;
pub mod sqlite;

pub use adapter::{location, Adapter, AdapterFactory, AdapterInit, PendingAdapter, StateEntry};
pub use registry::{register_adapter, resolve_adapter, AdapterRegistry};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

type SharedAdapter = Shared<BoxFuture<'static, Result<Arc<dyn Adapter>, String>>>;

enum AdapterState {
    Pending(SharedAdapter),
    Ready(Arc<dyn Adapter>),
    Failed(String),
}

/// State store bound to a single namespace.
pub struct Store {
    namespace: String,
    default_ttl: Option<Duration>,
    state: Mutex<AdapterState>,
}

impl Store {
    /// Build a store from a connection string such as `memory://`,
    /// `json://data/state.json` or `sqlite:///var/lib/itemflow.db`.
    ///
    /// Fails immediately if the string is not a URL or its scheme has no
    /// registered adapter.
    pub fn connect(connection: &str, namespace: impl Into<String>) -> EngineResult<Self> {
        Self::from_init(resolve_adapter(connection)?, namespace)
    }

    /// Build a store from a live adapter.
    pub fn with_adapter(adapter: Arc<dyn Adapter>, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            default_ttl: None,
            state: Mutex::new(AdapterState::Ready(adapter)),
        }
    }

    /// Build a store from a factory result.
    pub fn from_init(init: AdapterInit, namespace: impl Into<String>) -> EngineResult<Self> {
        let state = match init {
            AdapterInit::Ready(adapter) => AdapterState::Ready(adapter),
            AdapterInit::Pending(pending) => AdapterState::Pending(
                pending
                    .map(|resolved| resolved.map_err(|e| e.to_string()))
                    .boxed()
                    .shared(),
            ),
        };

        Ok(Self {
            namespace: namespace.into(),
            default_ttl: None,
            state: Mutex::new(state),
        })
    }

    /// Set the TTL applied when `set` is called without one.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// The namespace every operation is scoped to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns true once the adapter has resolved.
    pub fn is_ready(&self) -> bool {
        matches!(*self.lock_state(), AdapterState::Ready(_))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the adapter to be available.
    pub async fn ready(&self) -> EngineResult<Arc<dyn Adapter>> {
        let pending = {
            let state = self.lock_state();
            match &*state {
                AdapterState::Ready(adapter) => return Ok(adapter.clone()),
                AdapterState::Failed(reason) => {
                    return Err(EngineError::AdapterResolution(reason.clone()))
                }
                AdapterState::Pending(pending) => pending.clone(),
            }
        };

        let resolved = pending.await;

        let mut state = self.lock_state();
        match resolved {
            Ok(adapter) => {
                if matches!(*state, AdapterState::Pending(_)) {
                    tracing::debug!(
                        adapter = adapter.name(),
                        namespace = %self.namespace,
                        "State store adapter ready"
                    );
                    *state = AdapterState::Ready(adapter.clone());
                }
                Ok(adapter)
            }
            Err(reason) => {
                *state = AdapterState::Failed(reason.clone());
                Err(EngineError::AdapterResolution(reason))
            }
        }
    }

    /// Read and deserialize a value. Expired entries are evicted first.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> EngineResult<Option<T>> {
        let adapter = self.ready().await?;
        adapter.delete_expired(&self.namespace, now_ms()).await?;

        match adapter.get(&self.namespace, key).await? {
            Some(entry) => Ok(Some(serde_json::from_slice(&entry.value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a value. `ttl` falls back to the store default.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> EngineResult<&Self> {
        let adapter = self.ready().await?;
        let expires_at = ttl
            .or(self.default_ttl)
            .map(|ttl| expiry_after(now_ms(), ttl));
        let entry = StateEntry::new(serde_json::to_vec(value)?).with_expiry(expires_at);

        adapter.set(&self.namespace, key, entry).await?;
        Ok(self)
    }

    /// Remove a key. Returns true if it existed.
    pub async fn delete(&self, key: &str) -> EngineResult<bool> {
        let adapter = self.ready().await?;
        adapter.delete(&self.namespace, key).await
    }

    /// Remove every key in the namespace.
    pub async fn clear(&self) -> EngineResult<&Self> {
        let adapter = self.ready().await?;
        adapter.clear(&self.namespace).await?;
        Ok(self)
    }

    /// Live keys in the namespace. Expired entries are evicted first.
    pub async fn keys(&self) -> EngineResult<Vec<String>> {
        let adapter = self.ready().await?;
        adapter.delete_expired(&self.namespace, now_ms()).await?;
        adapter.keys(&self.namespace).await
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("namespace", &self.namespace)
            .field("default_ttl", &self.default_ttl)
            .field("ready", &self.is_ready())
            .finish()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry `ttl` after `now`, clamped to `i64::MAX`.
fn expiry_after(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}
