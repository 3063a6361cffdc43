//! Workflow model and runner.
//!
//! A run walks the sources in order. For each source it loads the committed
//! dedup keys from the state store, fetches, deduplicates, applies the
//! filters, then runs every step for every surviving item. An item's key is
//! committed (and persisted) as soon as all of its steps succeed, so a
//! failure part-way through leaves earlier items committed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::context::{InternalState, PublicContext, RunContext};
use crate::error::{EngineError, EngineResult};
use crate::pipeline::{extract_and_dedupe, filter_limit, FilterOptions, SourceOptions};
use crate::source::{create_default_sources, SourceRegistry};
use crate::step::{create_registry, StepRegistry};
use crate::store::Store;

/// A declarative workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Name used to scope persisted state. Defaults to the file stem when
    /// loaded from disk.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default)]
    pub filters: Vec<FilterConfig>,

    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source kind.
    #[serde(rename = "use")]
    pub kind: String,

    #[serde(default = "empty_object")]
    pub with: Value,

    #[serde(default)]
    pub options: SourceOptions,
}

impl SourceConfig {
    /// Label used in state keys: the configured id, else the position.
    pub fn label(&self, index: usize) -> String {
        self.options.id.clone().unwrap_or_else(|| index.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub limit: Option<usize>,
}

impl FilterConfig {
    pub fn options(&self) -> FilterOptions {
        FilterOptions { limit: self.limit }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Key of this step's output under `steps`. Defaults to the position.
    #[serde(default)]
    pub id: Option<String>,

    /// Step kind.
    #[serde(rename = "use")]
    pub kind: String,

    #[serde(default = "empty_object")]
    pub with: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Workflow {
    /// Parse a workflow from YAML (or JSON).
    pub fn from_yaml_str(text: &str) -> EngineResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load a workflow file. An unnamed workflow takes the file stem as name.
    pub async fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await?;
        let mut workflow = Self::from_yaml_str(&text)
            .map_err(|e| EngineError::Configuration(format!("{}: {}", path.display(), e)))?;

        if workflow.name.is_empty() {
            workflow.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        workflow
            .validate()
            .map_err(|e| EngineError::Configuration(format!("{}: {}", path.display(), e)))?;
        Ok(workflow)
    }

    /// The name scopes persisted state, so it must be non-empty and free of `:`.
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.is_empty() {
            return Err(EngineError::Configuration("workflow has no name".to_string()));
        }
        if self.name.contains(':') {
            return Err(EngineError::Configuration(format!(
                "workflow name `{}` must not contain `:`",
                self.name
            )));
        }
        Ok(())
    }
}

/// Store key holding the committed dedup keys of one workflow source.
pub fn state_key(workflow: &str, source: &str) -> String {
    format!("keys:{}:{}", workflow, source)
}

/// The source label of a store key written by `workflow`, if it is one.
pub fn source_of_key<'k>(workflow: &str, key: &'k str) -> Option<&'k str> {
    let (name, source) = key.strip_prefix("keys:")?.split_once(':')?;
    (name == workflow).then_some(source)
}

/// Committed dedup keys of one workflow source, oldest first.
pub async fn load_keys(store: &Store, workflow: &str, source: &str) -> EngineResult<Vec<String>> {
    Ok(store.get(&state_key(workflow, source)).await?.unwrap_or_default())
}

/// Forget committed keys of one source, or of every source of the workflow.
/// Returns the number of key lists removed.
pub async fn clear_keys(store: &Store, workflow: &str, source: Option<&str>) -> EngineResult<usize> {
    if let Some(source) = source {
        return Ok(usize::from(store.delete(&state_key(workflow, source)).await?));
    }

    let mut removed = 0;
    for key in store.keys().await? {
        if source_of_key(workflow, &key).is_some() && store.delete(&key).await? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Outcome of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub workflow: String,
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    /// Items that went through every step, across all sources.
    pub fn processed(&self) -> usize {
        self.sources.iter().map(|s| s.processed).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: String,
    /// Items after dedup and filtering.
    pub selected: usize,
    pub processed: usize,
    /// Keys newly committed by this run.
    pub committed: usize,
}

/// Executes workflows against a state store.
pub struct WorkflowRunner {
    store: Arc<Store>,
    steps: StepRegistry,
    sources: SourceRegistry,
    config: EngineConfig,
}

impl WorkflowRunner {
    /// Create a runner with the built-in steps and sources.
    pub fn new(store: Arc<Store>, config: EngineConfig) -> Self {
        Self {
            store,
            steps: create_registry(&config),
            sources: create_default_sources(),
            config,
        }
    }

    pub fn with_steps(mut self, steps: StepRegistry) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_sources(mut self, sources: SourceRegistry) -> Self {
        self.sources = sources;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run `workflow` with caller-provided values in the public context.
    ///
    /// `env` entries are visible bare and under `env`.
    pub async fn run(&self, workflow: &Workflow, env: Map<String, Value>) -> EngineResult<RunReport> {
        workflow.validate()?;
        let mut public = PublicContext::from_map(env.clone());
        public.set(PublicContext::ENV, Value::Object(env));
        let mut ctx = RunContext::new(public);

        tracing::info!(
            workflow = %workflow.name,
            sources = workflow.sources.len(),
            steps = workflow.steps.len(),
            "Starting workflow"
        );

        let mut reports = Vec::with_capacity(workflow.sources.len());
        for (index, source) in workflow.sources.iter().enumerate() {
            reports.push(self.run_source(workflow, index, source, &mut ctx).await?);
        }

        let report = RunReport {
            workflow: workflow.name.clone(),
            sources: reports,
        };
        tracing::info!(workflow = %workflow.name, processed = report.processed(), "Workflow complete");
        Ok(report)
    }

    async fn run_source(
        &self,
        workflow: &Workflow,
        index: usize,
        source: &SourceConfig,
        ctx: &mut RunContext,
    ) -> EngineResult<SourceReport> {
        let label = source.label(index);
        let key = state_key(&workflow.name, &label);
        let committed = load_keys(&self.store, &workflow.name, &label).await?;

        tracing::info!(
            workflow = %workflow.name,
            source = %label,
            kind = %source.kind,
            known_keys = committed.len(),
            "Fetching source"
        );

        ctx.internal = InternalState::with_keys(committed);
        ctx.public.set_source_index(index);

        let raw = self.sources.fetch(&source.kind, &source.with, &ctx.public).await?;
        ctx.public.set_result(raw);

        let mut options = source.options.clone();
        options.force |= self.config.force;
        extract_and_dedupe(ctx, &options)?;
        for filter in &workflow.filters {
            filter_limit(ctx, &filter.options())?;
        }

        let items = ctx.public.items().as_array().cloned().unwrap_or_default();
        let mut report = SourceReport {
            source: label,
            selected: items.len(),
            processed: 0,
            committed: 0,
        };

        for (item_index, item) in items.into_iter().enumerate() {
            ctx.public.clear_step_outputs();
            ctx.public.set_current_item(item_index, item);

            for (step_index, step) in workflow.steps.iter().enumerate() {
                let step_id = step.id.clone().unwrap_or_else(|| step_index.to_string());
                tracing::debug!(step = %step_id, kind = %step.kind, item = item_index, "Running step");

                let output = self.steps.execute(&step.kind, &step.with, &mut ctx.public).await?;
                ctx.public.set_step_output(&step_id, output);
            }
            report.processed += 1;

            let Some(item_key) = ctx.internal.item_key(item_index).map(str::to_string) else {
                continue;
            };
            if ctx.internal.record_key(item_key) {
                report.committed += 1;
                let trimmed = ctx.internal.trim_history(self.config.max_key_history);
                if trimmed > 0 {
                    tracing::debug!(trimmed, "Trimmed dedup key history");
                }
                self.store.set(&key, ctx.internal.keys(), None).await?;
            }
        }

        tracing::info!(
            source = %report.source,
            selected = report.selected,
            processed = report.processed,
            committed = report.committed,
            "Source complete"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("store", &self.store)
            .field("steps", &self.steps)
            .field("sources", &self.sources)
            .finish()
    }
}
