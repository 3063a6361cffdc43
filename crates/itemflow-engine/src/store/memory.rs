//! In-process adapter (`memory://`).

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

use crate::error::EngineResult;
use crate::store::adapter::{Adapter, AdapterInit, StateEntry};

type Namespaces = HashMap<String, BTreeMap<String, StateEntry>>;

/// Adapter keeping every namespace in memory. State is lost on exit.
#[derive(Default)]
pub struct MemoryAdapter {
    data: RwLock<Namespaces>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) fn factory(_url: &Url) -> EngineResult<AdapterInit> {
    Ok(AdapterInit::Ready(Arc::new(MemoryAdapter::new())))
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, namespace: &str, key: &str) -> EngineResult<Option<StateEntry>> {
        let data = self.data.read().await;
        Ok(data.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    async fn set(&self, namespace: &str, key: &str, entry: StateEntry) -> EngineResult<()> {
        let mut data = self.data.write().await;
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> EngineResult<bool> {
        let mut data = self.data.write().await;
        Ok(data
            .get_mut(namespace)
            .map(|ns| ns.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn clear(&self, namespace: &str) -> EngineResult<()> {
        self.data.write().await.remove(namespace);
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> EngineResult<Vec<String>> {
        let data = self.data.read().await;
        Ok(data
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_expired(&self, namespace: &str, now_ms: i64) -> EngineResult<usize> {
        let mut data = self.data.write().await;
        let Some(ns) = data.get_mut(namespace) else {
            return Ok(0);
        };
        let before = ns.len();
        ns.retain(|_, entry| !entry.is_expired(now_ms));
        Ok(before - ns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let adapter = MemoryAdapter::new();
        adapter.set("a", "k", StateEntry::new(b"1".to_vec())).await.unwrap();
        adapter.set("b", "k", StateEntry::new(b"2".to_vec())).await.unwrap();

        assert_eq!(adapter.get("a", "k").await.unwrap().unwrap().value, b"1");
        adapter.clear("a").await.unwrap();
        assert!(adapter.get("a", "k").await.unwrap().is_none());
        assert!(adapter.get("b", "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let adapter = MemoryAdapter::new();
        adapter
            .set("ns", "old", StateEntry::new(vec![]).with_expiry(Some(10)))
            .await
            .unwrap();
        adapter.set("ns", "forever", StateEntry::new(vec![])).await.unwrap();

        assert_eq!(adapter.delete_expired("ns", 10).await.unwrap(), 1);
        assert_eq!(adapter.keys("ns").await.unwrap(), vec!["forever"]);
        assert_eq!(adapter.delete_expired("missing", 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let adapter = MemoryAdapter::new();
        adapter.set("ns", "k", StateEntry::new(vec![1])).await.unwrap();
        assert!(adapter.delete("ns", "k").await.unwrap());
        assert!(!adapter.delete("ns", "k").await.unwrap());
    }
}
