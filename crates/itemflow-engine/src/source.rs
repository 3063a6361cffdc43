//! Item sources.
//!
//! A source fetches the raw result that the pipeline turns into items. It
//! does not deduplicate; that is the pipeline's job.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::command::{run_chain, ChainOptions};
use crate::context::PublicContext;
use crate::error::{EngineError, EngineResult};
use crate::template::{render_object, TemplateEngine};

/// Something that produces a raw result (usually an array of items).
#[async_trait]
pub trait Source: Send + Sync {
    /// Returns the source's unique kind, as named by `use:` in a workflow.
    fn name(&self) -> &'static str;

    async fn fetch(&self, config: &Value, ctx: &PublicContext) -> EngineResult<Value>;
}

/// Registry of available sources.
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    /// Register a source, replacing any source of the same kind.
    pub fn register<S: Source + 'static>(&mut self, source: S) {
        self.sources.insert(source.name().to_string(), Arc::new(source));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.sources.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Registered source kinds, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Fetch from a source by kind.
    pub async fn fetch(&self, name: &str, config: &Value, ctx: &PublicContext) -> EngineResult<Value> {
        let source = self
            .get(name)
            .ok_or_else(|| EngineError::SourceNotFound(name.to_string()))?;
        source.fetch(config, ctx).await
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.list())
            .finish()
    }
}

/// Create a source registry with the built-in sources.
pub fn create_default_sources() -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register(StaticSource);
    registry.register(CommandSource::new(Arc::new(TemplateEngine::new())));
    registry
}

/// Returns the `items` value of its configuration verbatim.
pub struct StaticSource;

#[async_trait]
impl Source for StaticSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch(&self, config: &Value, _ctx: &PublicContext) -> EngineResult<Value> {
        config.get("items").cloned().ok_or_else(|| {
            EngineError::Configuration("Invalid static source config: missing field `items`".to_string())
        })
    }
}

#[derive(Debug, Deserialize)]
struct CommandSourceConfig {
    run: String,

    #[serde(default)]
    cwd: Option<String>,

    #[serde(default)]
    env: HashMap<String, String>,

    #[serde(default)]
    timeout_seconds: Option<u64>,
}

/// Runs a command chain and parses its stdout as JSON.
pub struct CommandSource {
    templates: Arc<TemplateEngine>,
}

impl CommandSource {
    pub fn new(templates: Arc<TemplateEngine>) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl Source for CommandSource {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn fetch(&self, config: &Value, ctx: &PublicContext) -> EngineResult<Value> {
        let rendered = render_object(&self.templates, config, ctx, None)?;
        let config: CommandSourceConfig = serde_json::from_value(rendered)
            .map_err(|e| EngineError::Configuration(format!("Invalid command source config: {}", e)))?;

        let options = ChainOptions {
            cwd: config.cwd.map(Into::into),
            env: config.env,
            timeout: config.timeout_seconds.map(Duration::from_secs),
            mirror: false,
            ..Default::default()
        };
        let output = run_chain(&config.run, &options).await?;

        serde_json::from_str(&output.stdout).map_err(|e| {
            EngineError::Json(format!("command source output is not JSON: {}", e))
        })
    }
}
