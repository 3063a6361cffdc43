//! Recursive rendering of step configuration.

use serde_json::{Map, Value};

use crate::context::PublicContext;
use crate::error::EngineResult;
use crate::template::TemplateEngine;

/// Render every string leaf of `step` against `ctx`.
///
/// When `step` is an object, only the entries named in `keys` are rendered
/// (all of them when `keys` is `None`); the rest are copied unchanged. A
/// rendered string is final: its output is never scanned for template syntax
/// again. The input is left untouched and any failure discards the whole
/// result.
pub fn render_object(
    engine: &TemplateEngine,
    step: &Value,
    ctx: &PublicContext,
    keys: Option<&[&str]>,
) -> EngineResult<Value> {
    let context = ctx.to_template_context();

    let Value::Object(entries) = step else {
        return render_value(engine, step, &context);
    };

    let mut rendered = entries.clone();
    for (key, value) in entries {
        if keys.is_some_and(|keys| !keys.contains(&key.as_str())) {
            continue;
        }
        rendered.insert(key.clone(), render_value(engine, value, &context)?);
    }
    Ok(Value::Object(rendered))
}

fn render_value(engine: &TemplateEngine, value: &Value, context: &Map<String, Value>) -> EngineResult<Value> {
    match value {
        Value::String(text) if TemplateEngine::is_template(text) => {
            Ok(Value::String(engine.render(text, context)?))
        }
        Value::Array(elements) => elements
            .iter()
            .map(|element| render_value(engine, element, context))
            .collect::<EngineResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(entries) => {
            let mut rendered = Map::with_capacity(entries.len());
            for (key, value) in entries {
                rendered.insert(key.clone(), render_value(engine, value, context)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use serde_json::json;

    fn public(pairs: &[(&str, Value)]) -> PublicContext {
        let mut ctx = PublicContext::new();
        for (k, v) in pairs {
            ctx.set(*k, v.clone());
        }
        ctx
    }

    #[test]
    fn test_renders_without_mutating_context() {
        let engine = TemplateEngine::new();
        let ctx = public(&[("name", json!("World"))]);
        let before = ctx.clone();

        let step = json!({"greeting": "Hello {{name}}"});
        let rendered = render_object(&engine, &step, &ctx, None).unwrap();

        assert_eq!(rendered, json!({"greeting": "Hello World"}));
        assert_eq!(ctx, before);
        assert_eq!(step, json!({"greeting": "Hello {{name}}"}));
    }

    #[test]
    fn test_deep_walk() {
        let engine = TemplateEngine::new();
        let ctx = public(&[("item", json!({"title": "T", "tags": ["a", "b"]}))]);

        let step = json!({
            "payload": {
                "title": "{{ item.title }}",
                "meta": {"count": "{{ item.tags | length }}", "n": 3, "ok": true},
                "list": ["{{ item.tags[0] }}", {"inner": "{{ ctx.item.tags[1] }}"}, null]
            },
            "plain": ["x", 1]
        });
        let rendered = render_object(&engine, &step, &ctx, None).unwrap();

        assert_eq!(
            rendered,
            json!({
                "payload": {
                    "title": "T",
                    "meta": {"count": "2", "n": 3, "ok": true},
                    "list": ["a", {"inner": "b"}, null]
                },
                "plain": ["x", 1]
            })
        );
    }

    #[test]
    fn test_rendered_output_is_not_rescanned() {
        let engine = TemplateEngine::new();
        let ctx = public(&[("raw", json!("{{ secret }}"))]);

        let rendered = render_object(&engine, &json!({"v": "{{ raw }}"}), &ctx, None).unwrap();
        assert_eq!(rendered, json!({"v": "{{ secret }}"}));
    }

    #[test]
    fn test_key_subset() {
        let engine = TemplateEngine::new();
        let ctx = public(&[("name", json!("World"))]);

        let step = json!({"a": "{{ name }}", "b": "{{ name }}", "c": 1});
        let rendered = render_object(&engine, &step, &ctx, Some(&["a", "missing"])).unwrap();
        assert_eq!(rendered, json!({"a": "World", "b": "{{ name }}", "c": 1}));
    }

    #[test]
    fn test_non_object_step() {
        let engine = TemplateEngine::new();
        let ctx = public(&[("name", json!("World"))]);

        assert_eq!(
            render_object(&engine, &json!("hi {{ name }}"), &ctx, None).unwrap(),
            json!("hi World")
        );
        assert_eq!(render_object(&engine, &json!(5), &ctx, None).unwrap(), json!(5));
    }

    #[test]
    fn test_reference_error_fails_whole_call() {
        let engine = TemplateEngine::new();
        let ctx = public(&[("name", json!("World"))]);

        let step = json!({"ok": "{{ name }}", "bad": ["{{ title }}"]});
        let err = render_object(&engine, &step, &ctx, None).unwrap_err();
        match err {
            EngineError::Reference(msg) => assert!(msg.contains("hint")),
            other => panic!("expected reference error, got {other:?}"),
        }
    }
}
