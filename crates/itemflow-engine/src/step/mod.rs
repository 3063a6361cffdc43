//! Step registry and dispatch.
//!
//! Built-in steps:
//! - `shell` - Run a command chain
//! - `script` - Evaluate a Rhai script against the context
//! - `template` - Render a payload object

mod script;
mod shell;
mod template;

pub use self::script::{ScriptStep, ScriptStepConfig};
pub use self::shell::{ShellConfig, ShellStep};
pub use self::template::TemplateStep;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::context::PublicContext;
use crate::error::{EngineError, EngineResult};
use crate::script::ScriptEngine;
use crate::template::TemplateEngine;

/// A per-item action.
#[async_trait]
pub trait Step: Send + Sync {
    /// Returns the step's unique kind, as named by `use:` in a workflow.
    fn name(&self) -> &'static str;

    /// Execute the step. The returned value is stored under `steps.<id>`.
    async fn execute(&self, config: &Value, ctx: &mut PublicContext) -> EngineResult<Value>;
}

/// Registry of available steps.
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
    /// Create a new empty step registry.
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
        }
    }

    /// Register a step, replacing any step of the same kind.
    pub fn register<S: Step + 'static>(&mut self, step: S) {
        self.steps.insert(step.name().to_string(), Arc::new(step));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Registered step kinds, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.steps.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Execute a step by kind.
    pub async fn execute(&self, name: &str, config: &Value, ctx: &mut PublicContext) -> EngineResult<Value> {
        let step = self
            .get(name)
            .ok_or_else(|| EngineError::StepNotFound(name.to_string()))?;
        step.execute(config, ctx).await
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.list())
            .finish()
    }
}

/// Create a step registry with all built-in steps, configured from `config`.
pub fn create_registry(config: &EngineConfig) -> StepRegistry {
    let templates = Arc::new(TemplateEngine::new());
    let scripts = ScriptEngine::with_max_operations(config.script_max_operations);

    let mut registry = StepRegistry::new();
    registry.register(ShellStep::new(templates.clone()).with_mirror(config.mirror_output));
    registry.register(ScriptStep::new(scripts, templates.clone()));
    registry.register(TemplateStep::new(templates));
    registry
}

/// Create a step registry with all built-in steps and default settings.
pub fn create_default_registry() -> StepRegistry {
    create_registry(&EngineConfig::default())
}

/// Decode a rendered step configuration.
pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(kind: &str, config: Value) -> EngineResult<T> {
    serde_json::from_value(config)
        .map_err(|e| EngineError::Configuration(format!("Invalid {} step config: {}", kind, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct MockStep;

    #[async_trait]
    impl Step for MockStep {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn execute(&self, config: &Value, ctx: &mut PublicContext) -> EngineResult<Value> {
            ctx.set("touched", json!(true));
            Ok(json!({"echo": config}))
        }
    }

    #[test]
    fn test_registry_new() {
        assert!(StepRegistry::new().list().is_empty());
    }

    #[test]
    fn test_registry_register() {
        let mut registry = StepRegistry::new();
        registry.register(MockStep);

        assert!(registry.has("mock"));
        assert!(!registry.has("unknown"));
        assert_eq!(registry.list(), vec!["mock"]);
    }

    #[tokio::test]
    async fn test_registry_execute() {
        let mut registry = StepRegistry::new();
        registry.register(MockStep);

        let mut ctx = PublicContext::new();
        let output = registry.execute("mock", &json!({"a": 1}), &mut ctx).await.unwrap();
        assert_eq!(output, json!({"echo": {"a": 1}}));
        assert_eq!(ctx.get("touched"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_registry_execute_not_found() {
        let registry = StepRegistry::new();
        let mut ctx = PublicContext::new();
        let result = registry.execute("unknown", &json!({}), &mut ctx).await;
        assert!(matches!(result, Err(EngineError::StepNotFound(_))));
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        assert_eq!(registry.list(), vec!["script", "shell", "template"]);
    }
}
