//! Flat JSON file adapter (`json://<path>`).
//!
//! The whole file is loaded on first use and rewritten on every mutation.
//! Writes go to a sibling temp file that is then renamed over the original.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

use crate::error::{EngineError, EngineResult};
use crate::store::adapter::{location, Adapter, AdapterInit, PendingAdapter, StateEntry};

type Namespaces = HashMap<String, BTreeMap<String, StateEntry>>;

/// Adapter persisting all namespaces to one JSON document.
pub struct JsonFileAdapter {
    path: PathBuf,
    data: Mutex<Namespaces>,
}

impl JsonFileAdapter {
    /// Open (or lazily create) the state file at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> EngineResult<Self> {
        let path = path.into();
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Namespaces::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                EngineError::Store(format!("corrupt state file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Namespaces::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            path = %path.display(),
            namespaces = data.len(),
            "Opened JSON state file"
        );

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, data: &Namespaces) -> EngineResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(data)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

pub(crate) fn factory(url: &Url) -> EngineResult<AdapterInit> {
    let path = location(url)?;
    if path.is_empty() {
        return Err(EngineError::AdapterResolution(
            "json adapter requires a file path, e.g. json://data/state.json".to_string(),
        ));
    }

    let pending: PendingAdapter = Box::pin(async move {
        let adapter = JsonFileAdapter::open(path).await?;
        Ok::<Arc<dyn Adapter>, EngineError>(Arc::new(adapter))
    });
    Ok(AdapterInit::Pending(pending))
}

#[async_trait]
impl Adapter for JsonFileAdapter {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn get(&self, namespace: &str, key: &str) -> EngineResult<Option<StateEntry>> {
        let data = self.data.lock().await;
        Ok(data.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, entry: StateEntry) -> EngineResult<()> {
        let mut data = self.data.lock().await;
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), entry);
        self.persist(&data).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> EngineResult<bool> {
        let mut data = self.data.lock().await;
        let removed = data
            .get_mut(namespace)
            .map(|ns| ns.remove(key).is_some())
            .unwrap_or(false);
        if removed {
            self.persist(&data).await?;
        }
        Ok(removed)
    }

    async fn clear(&self, namespace: &str) -> EngineResult<()> {
        let mut data = self.data.lock().await;
        if data.remove(namespace).is_some() {
            self.persist(&data).await?;
        }
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> EngineResult<Vec<String>> {
        let data = self.data.lock().await;
        Ok(data
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_expired(&self, namespace: &str, now_ms: i64) -> EngineResult<usize> {
        let mut data = self.data.lock().await;
        let Some(ns) = data.get_mut(namespace) else {
            return Ok(0);
        };
        let before = ns.len();
        ns.retain(|_, entry| !entry.is_expired(now_ms));
        let removed = before - ns.len();
        if removed > 0 {
            self.persist(&data).await?;
        }
        Ok(removed)
    }
}
