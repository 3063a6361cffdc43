//! Command-chain step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::command::{run_chain, ChainOptions};
use crate::context::PublicContext;
use crate::error::EngineResult;
use crate::step::{parse_config, Step};
use crate::template::{render_object, TemplateEngine};

/// Shell step configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Command chain to run.
    pub run: String,

    #[serde(default)]
    pub continue_on_error: bool,

    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Environment variables.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Per-command timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl ShellConfig {
    fn chain_options(&self, mirror: bool) -> ChainOptions {
        ChainOptions {
            continue_on_error: self.continue_on_error,
            cwd: self.cwd.as_ref().map(Into::into),
            env: self.env.clone(),
            timeout: self.timeout_seconds.map(Duration::from_secs),
            mirror,
        }
    }
}

/// Runs a command chain; outputs `{code, stdout}`.
pub struct ShellStep {
    templates: Arc<TemplateEngine>,
    mirror: bool,
}

impl ShellStep {
    pub fn new(templates: Arc<TemplateEngine>) -> Self {
        Self {
            templates,
            mirror: true,
        }
    }

    /// Whether process output is echoed while it runs.
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }
}

#[async_trait]
impl Step for ShellStep {
    fn name(&self) -> &'static str {
        "shell"
    }

    async fn execute(&self, config: &Value, ctx: &mut PublicContext) -> EngineResult<Value> {
        let rendered = render_object(&self.templates, config, ctx, None)?;
        let shell_config: ShellConfig = parse_config(self.name(), rendered)?;

        tracing::debug!(
            run = %shell_config.run,
            cwd = ?shell_config.cwd,
            timeout_seconds = ?shell_config.timeout_seconds,
            "Executing shell step"
        );

        let output = run_chain(&shell_config.run, &shell_config.chain_options(self.mirror)).await?;
        Ok(serde_json::to_value(output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use serde_json::json;

    fn step() -> ShellStep {
        ShellStep::new(Arc::new(TemplateEngine::new())).with_mirror(false)
    }

    #[tokio::test]
    async fn test_runs_rendered_chain() {
        let mut ctx = PublicContext::new();
        ctx.set("item", json!({"title": "hello world"}));

        let output = step()
            .execute(&json!({"run": "echo \"{{ item.title }}\""}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(output, json!({"code": 0, "stdout": "hello world"}));
    }

    #[tokio::test]
    async fn test_env_and_continue_on_error() {
        let mut ctx = PublicContext::new();
        let config = json!({
            "run": "false && echo skipped & printenv GREETING",
            "env": {"GREETING": "hi"},
            "continue_on_error": true
        });
        let output = step().execute(&config, &mut ctx).await.unwrap();
        assert_eq!(output["stdout"], json!("hi"));
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let mut ctx = PublicContext::new();
        let err = step()
            .execute(&json!({"run": "false"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Command { code: 1, .. }));
    }

    #[tokio::test]
    async fn test_missing_run_is_configuration_error() {
        let mut ctx = PublicContext::new();
        let err = step().execute(&json!({}), &mut ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
