//! Rhai script step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::context::PublicContext;
use crate::error::{EngineError, EngineResult};
use crate::script::ScriptEngine;
use crate::step::{parse_config, Step};
use crate::template::{render_object, TemplateEngine};

const CODE: &str = "code";

/// Script step configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptStepConfig {
    /// Rhai source. Never rendered as a template.
    pub code: String,

    /// Extra values, rendered, exposed to the script as `args`.
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Evaluates `code` with every context value as a bare variable.
///
/// Whatever the script assigns on `ctx` is copied back into the context, so
/// `ctx.summary = ...` is visible to later steps as `summary`.
pub struct ScriptStep {
    engine: ScriptEngine,
    templates: Arc<TemplateEngine>,
}

impl ScriptStep {
    pub fn new(engine: ScriptEngine, templates: Arc<TemplateEngine>) -> Self {
        Self { engine, templates }
    }
}

#[async_trait]
impl Step for ScriptStep {
    fn name(&self) -> &'static str {
        "script"
    }

    async fn execute(&self, config: &Value, ctx: &mut PublicContext) -> EngineResult<Value> {
        let keys: Vec<&str> = match config {
            Value::Object(map) => map.keys().map(String::as_str).filter(|k| *k != CODE).collect(),
            _ => Vec::new(),
        };
        let rendered = render_object(&self.templates, config, ctx, Some(keys.as_slice()))?;
        let script: ScriptStepConfig = parse_config(self.name(), rendered)?;

        let mut locals = ctx.as_map().clone();
        locals.insert("args".to_string(), Value::Object(script.args));

        tracing::debug!(code_len = script.code.len(), "Executing script step");

        let output = self.engine.eval_async(script.code, locals).await?;
        match output.ctx {
            Value::Object(updates) => ctx.merge(&updates),
            Value::Null => {}
            other => {
                return Err(EngineError::Script(format!(
                    "`ctx` must remain a map, found {}",
                    other
                )))
            }
        }
        Ok(output.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step() -> ScriptStep {
        ScriptStep::new(ScriptEngine::new(), Arc::new(TemplateEngine::new()))
    }

    #[tokio::test]
    async fn test_sees_context_and_args() {
        let mut ctx = PublicContext::new();
        ctx.set("item", json!({"title": "Post"}));
        ctx.set("prefix", json!(">"));

        let config = json!({
            "code": "args.prefix + \" \" + item.title",
            "args": {"prefix": "{{ prefix }}{{ prefix }}"}
        });
        let output = step().execute(&config, &mut ctx).await.unwrap();
        assert_eq!(output, json!(">> Post"));
    }

    #[tokio::test]
    async fn test_code_is_not_rendered() {
        let mut ctx = PublicContext::new();
        let config = json!({"code": "\"{{ not_a_template }}\""});
        let output = step().execute(&config, &mut ctx).await.unwrap();
        assert_eq!(output, json!("{{ not_a_template }}"));
    }

    #[tokio::test]
    async fn test_ctx_updates_flow_back() {
        let mut ctx = PublicContext::new();
        ctx.set("items", json!([1, 2, 3]));

        let config = json!({"code": "ctx.total = items.reduce(|sum, v| sum + v, 0); ctx.total"});
        let output = step().execute(&config, &mut ctx).await.unwrap();
        assert_eq!(output, json!(6));
        assert_eq!(ctx.get("total"), Some(&json!(6)));
    }

    #[tokio::test]
    async fn test_script_error() {
        let mut ctx = PublicContext::new();
        let err = step()
            .execute(&json!({"code": "undefined_var + 1"}), &mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Script(_)));
    }
}
