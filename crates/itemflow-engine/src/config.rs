//! Engine configuration.

use serde::Deserialize;
use std::time::Duration;

use crate::error::EngineResult;

/// Engine configuration loaded from environment variables.
///
/// Environment variables are prefixed with `ITEMFLOW_`:
/// - `ITEMFLOW_STORE_URL`: state store connection (default: "json://.itemflow/state.json")
/// - `ITEMFLOW_NAMESPACE`: state store namespace (default: "itemflow")
/// - `ITEMFLOW_STATE_TTL_MS`: expiry for state entries (optional)
/// - `ITEMFLOW_MAX_KEY_HISTORY`: dedup keys kept per source (default: 5000)
/// - `ITEMFLOW_SCRIPT_MAX_OPERATIONS`: script operation budget (default: 1000000)
/// - `ITEMFLOW_MIRROR_OUTPUT`: echo command output while it runs (default: true)
/// - `ITEMFLOW_FORCE`: reprocess already-seen items (default: false)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_store_url")]
    pub store_url: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub state_ttl_ms: Option<u64>,

    #[serde(default = "default_max_key_history")]
    pub max_key_history: usize,

    #[serde(default = "default_script_max_operations")]
    pub script_max_operations: u64,

    #[serde(default = "default_true")]
    pub mirror_output: bool,

    #[serde(default)]
    pub force: bool,
}

fn default_store_url() -> String {
    "json://.itemflow/state.json".to_string()
}

fn default_namespace() -> String {
    "itemflow".to_string()
}

fn default_max_key_history() -> usize {
    5000
}

fn default_script_max_operations() -> u64 {
    crate::script::DEFAULT_MAX_OPERATIONS
}

fn default_true() -> bool {
    true
}

impl EngineConfig {
    /// Load configuration from `ITEMFLOW_*` environment variables.
    pub fn from_env() -> EngineResult<Self> {
        Ok(envy::prefixed("ITEMFLOW_").from_env::<EngineConfig>()?)
    }

    /// Default expiry for state entries.
    pub fn state_ttl(&self) -> Option<Duration> {
        self.state_ttl_ms.map(Duration::from_millis)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_url: default_store_url(),
            namespace: default_namespace(),
            state_ttl_ms: None,
            max_key_history: default_max_key_history(),
            script_max_operations: default_script_max_operations(),
            mirror_output: true,
            force: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> EngineConfig {
        envy::prefixed("ITEMFLOW_")
            .from_iter(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
            .unwrap()
    }

    #[test]
    fn test_empty_env_matches_default() {
        assert_eq!(from_pairs(&[]), EngineConfig::default());
    }

    #[test]
    fn test_prefixed_overrides() {
        let config = from_pairs(&[
            ("ITEMFLOW_STORE_URL", "sqlite://state.db"),
            ("ITEMFLOW_STATE_TTL_MS", "60000"),
            ("ITEMFLOW_MIRROR_OUTPUT", "false"),
            ("ITEMFLOW_MAX_KEY_HISTORY", "10"),
            ("OTHER_FORCE", "true"),
        ]);
        assert_eq!(config.store_url, "sqlite://state.db");
        assert_eq!(config.state_ttl(), Some(Duration::from_secs(60)));
        assert!(!config.mirror_output);
        assert_eq!(config.max_key_history, 10);
        assert!(!config.force);
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        let result = envy::prefixed("ITEMFLOW_").from_iter::<_, EngineConfig>(vec![(
            "ITEMFLOW_MAX_KEY_HISTORY".to_string(),
            "lots".to_string(),
        )]);
        assert!(result.is_err());
    }
}
