//! Payload templating step.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::context::PublicContext;
use crate::error::{EngineError, EngineResult};
use crate::step::Step;
use crate::template::{render_object, TemplateEngine};

const PAYLOAD: &str = "payload";

/// Renders `payload` and outputs the result.
pub struct TemplateStep {
    templates: Arc<TemplateEngine>,
}

impl TemplateStep {
    pub fn new(templates: Arc<TemplateEngine>) -> Self {
        Self { templates }
    }
}

#[async_trait]
impl Step for TemplateStep {
    fn name(&self) -> &'static str {
        "template"
    }

    async fn execute(&self, config: &Value, ctx: &mut PublicContext) -> EngineResult<Value> {
        let payload = config.get(PAYLOAD).ok_or_else(|| {
            EngineError::Configuration("Invalid template step config: missing field `payload`".to_string())
        })?;
        render_object(&self.templates, payload, ctx, None)
    }
}
