//! Adapter contract shared by all state-store backends.

use async_trait::async_trait;
use futures::future::BoxFuture;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use crate::error::{EngineError, EngineResult};

/// A stored value with its optional absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Serialized value bytes.
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,

    /// Absolute expiry as epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl StateEntry {
    /// Create an entry that never expires.
    pub fn new(value: Vec<u8>) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Set the absolute expiry.
    pub fn with_expiry(mut self, expires_at: Option<i64>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Returns true if the entry is expired at `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now_ms)
    }
}

/// Namespaced, TTL-aware key/value backend.
///
/// Adapters never evict on their own; the store calls `delete_expired`
/// before reads that must not observe stale entries.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Short backend name used in diagnostics.
    fn name(&self) -> &'static str;

    async fn get(&self, namespace: &str, key: &str) -> EngineResult<Option<StateEntry>>;

    async fn set(&self, namespace: &str, key: &str, entry: StateEntry) -> EngineResult<()>;

    /// Returns true if an entry was removed.
    async fn delete(&self, namespace: &str, key: &str) -> EngineResult<bool>;

    async fn clear(&self, namespace: &str) -> EngineResult<()>;

    /// Keys in the namespace, sorted.
    async fn keys(&self, namespace: &str) -> EngineResult<Vec<String>>;

    /// Remove every entry whose expiry is at or before `now_ms`.
    async fn delete_expired(&self, namespace: &str, now_ms: i64) -> EngineResult<usize>;
}

/// Future resolving to an adapter that needs asynchronous setup.
pub type PendingAdapter = BoxFuture<'static, EngineResult<Arc<dyn Adapter>>>;

/// Result of a factory's `init`: ready now, or ready once the future resolves.
pub enum AdapterInit {
    Ready(Arc<dyn Adapter>),
    Pending(PendingAdapter),
}

impl std::fmt::Debug for AdapterInit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterInit::Ready(adapter) => write!(f, "Ready({})", adapter.name()),
            AdapterInit::Pending(_) => write!(f, "Pending"),
        }
    }
}

/// Builds an adapter from a parsed connection URL.
pub trait AdapterFactory: Send + Sync {
    fn init(&self, url: &Url) -> EngineResult<AdapterInit>;
}

impl<F> AdapterFactory for F
where
    F: Fn(&Url) -> EngineResult<AdapterInit> + Send + Sync,
{
    fn init(&self, url: &Url) -> EngineResult<AdapterInit> {
        self(url)
    }
}

/// The part of a connection URL after `scheme://`, without query or fragment.
///
/// `json://data/state.json` yields `data/state.json`,
/// `json:///var/lib/state.json` yields `/var/lib/state.json`. Percent-escapes
/// are decoded, so `json:///tmp/my%20dir/s.json` names `/tmp/my dir/s.json`.
pub fn location(url: &Url) -> EngineResult<String> {
    let raw = format!("{}{}", url.host_str().unwrap_or(""), url.path());
    percent_decode_str(&raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| EngineError::AdapterResolution(format!("invalid path in `{}`: {}", url, e)))
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
