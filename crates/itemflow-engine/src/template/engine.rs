//! Template engine implementation using minijinja.

use minijinja::value::Kwargs;
use minijinja::{Environment, ErrorKind, UndefinedBehavior, Value};
use serde_json::Map;

use crate::context::PublicContext;
use crate::error::{EngineError, EngineResult};
use crate::identifier;

const REFERENCE_HINT: &str = "(hint: context values are available both bare and under `ctx.`, \
     e.g. `{{ item.title }}` or `{{ ctx.item.title }}`; check that the value is set before this step)";

/// Template engine with Jinja2-compatible syntax.
///
/// Undefined values are strict: printing, iterating or testing one fails
/// with [`EngineError::Reference`] instead of rendering an empty string.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create a new template engine with custom filters.
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        env.add_filter("int", filter_int);
        env.add_filter("float", filter_float);
        env.add_filter("default", filter_default);
        env.add_filter("d", filter_default);
        env.add_filter("tojson", filter_tojson);
        env.add_filter("fromjson", filter_fromjson);
        env.add_filter("length", filter_length);
        env.add_filter("len", filter_length);
        env.add_filter("trim", filter_trim);
        env.add_filter("split", filter_split);
        env.add_filter("join", filter_join);
        env.add_filter("b64encode", filter_b64encode);
        env.add_filter("b64decode", filter_b64decode);
        env.add_filter("slugify", filter_slugify);
        env.add_filter("identifier_path", filter_identifier_path);

        env.add_function("identifier", fn_identifier);

        Self { env }
    }

    /// Render a template string against a flat context map.
    pub fn render(&self, template: &str, context: &Map<String, serde_json::Value>) -> EngineResult<String> {
        self.env
            .render_str(template, Value::from_serialize(context))
            .map_err(render_error)
    }

    /// Render against a public context; its values are visible bare and
    /// under `ctx`.
    pub fn render_with_context(&self, template: &str, ctx: &PublicContext) -> EngineResult<String> {
        self.render(template, &ctx.to_template_context())
    }

    /// Check if a string contains template syntax.
    pub fn is_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%") || s.contains("{#")
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn render_error(e: minijinja::Error) -> EngineError {
    if matches!(e.kind(), ErrorKind::UndefinedError) {
        EngineError::Reference(format!("{} {}", e, REFERENCE_HINT))
    } else {
        EngineError::Template(e.to_string())
    }
}

fn invalid(message: impl std::fmt::Display) -> minijinja::Error {
    minijinja::Error::new(ErrorKind::InvalidOperation, message.to_string())
}

// Custom filters

fn filter_identifier_path(value: Value) -> String {
    identifier::path_from_identifier(&value.to_string())
}

/// `identifier(date=..., language=..., publisher=..., site=..., post_type=..., id=...)`
fn fn_identifier(kwargs: Kwargs) -> Result<String, minijinja::Error> {
    let date: String = kwargs.get("date")?;
    let language: String = kwargs.get("language")?;
    let publisher: String = kwargs.get("publisher")?;
    let site: String = kwargs.get("site")?;
    let post_type: String = kwargs.get("post_type")?;
    let original_id: String = kwargs.get("id")?;
    kwargs.assert_all_used()?;

    let date = identifier::parse_date(&date).map_err(invalid)?;
    identifier::stringify(&date, &language, &publisher, &site, &post_type, &original_id).map_err(invalid)
}

fn filter_int(value: Value) -> Value {
    let s = value.to_string();
    if let Ok(n) = s.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = s.parse::<f64>() {
        return Value::from(f as i64);
    }
    Value::from(0i64)
}

fn filter_float(value: Value) -> Value {
    Value::from(value.to_string().parse::<f64>().unwrap_or(0.0))
}

fn filter_default(value: Value, default: Option<Value>) -> Value {
    if value.is_undefined() || value.is_none() {
        default.unwrap_or_else(|| Value::from(""))
    } else {
        value
    }
}

fn filter_tojson(value: Value) -> Result<String, minijinja::Error> {
    serde_json::to_string(&value).map_err(invalid)
}

fn filter_fromjson(value: Value) -> Result<Value, minijinja::Error> {
    let json: serde_json::Value = serde_json::from_str(&value.to_string()).map_err(invalid)?;
    Ok(Value::from_serialize(&json))
}

fn filter_length(value: Value) -> Value {
    match value.kind() {
        minijinja::value::ValueKind::String => Value::from(value.to_string().chars().count()),
        minijinja::value::ValueKind::Seq | minijinja::value::ValueKind::Map => {
            Value::from(value.len().unwrap_or(0))
        }
        _ => Value::from(0),
    }
}

fn filter_trim(value: Value) -> String {
    value.to_string().trim().to_string()
}

fn filter_split(value: Value, sep: String) -> Vec<String> {
    value.to_string().split(&sep).map(|s| s.to_string()).collect()
}

fn filter_join(value: Value, sep: Option<String>) -> String {
    let sep = sep.unwrap_or_default();
    match value.len() {
        Some(len) => (0..len)
            .filter_map(|i| value.get_item(&Value::from(i)).ok())
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(&sep),
        None => value.to_string(),
    }
}

fn filter_b64encode(value: Value) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(value.to_string().as_bytes())
}

fn filter_b64decode(value: Value) -> Result<String, minijinja::Error> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    let decoded = STANDARD.decode(value.to_string().as_bytes()).map_err(invalid)?;
    String::from_utf8(decoded).map_err(invalid)
}

/// Lowercase, with runs of non-alphanumerics collapsed to `-`.
fn filter_slugify(value: Value) -> String {
    let mut slug = String::new();
    for c in value.to_string().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, serde_json::Value)]) -> Map<String, serde_json::Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_simple_template() {
        let engine = TemplateEngine::new();
        let result = engine
            .render("Hello, {{ name }}!", &ctx(&[("name", json!("World"))]))
            .unwrap();
        assert_eq!(result, "Hello, World!");
    }

    #[test]
    fn test_undefined_is_reference_error() {
        let engine = TemplateEngine::new();
        let err = engine.render("Hello, {{ name }}!", &Map::new()).unwrap_err();
        match err {
            EngineError::Reference(msg) => assert!(msg.contains("ctx.")),
            other => panic!("expected reference error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_attribute_is_reference_error() {
        let engine = TemplateEngine::new();
        let err = engine
            .render("{{ item.nope }}", &ctx(&[("item", json!({"title": "t"}))]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Reference(_)));
    }

    #[test]
    fn test_syntax_error_is_template_error() {
        let engine = TemplateEngine::new();
        let err = engine.render("{{ unclosed ", &Map::new()).unwrap_err();
        assert!(matches!(err, EngineError::Template(_)));
    }

    #[test]
    fn test_context_alias() {
        let engine = TemplateEngine::new();
        let mut public = PublicContext::new();
        public.set("name", json!("World"));
        let result = engine
            .render_with_context("{{ name }}/{{ ctx.name }}", &public)
            .unwrap();
        assert_eq!(result, "World/World");
    }

    #[test]
    fn test_filters() {
        let engine = TemplateEngine::new();
        let values = ctx(&[
            ("num", json!("42")),
            ("text", json!("  a,b,c  ")),
            ("data", json!({"key": "value"})),
            ("title", json!("Hello, Rust World!")),
            ("none", json!(null)),
        ]);

        assert_eq!(engine.render("{{ num | int + 1 }}", &values).unwrap(), "43");
        assert_eq!(
            engine.render("{{ text | trim | split(',') | join('-') }}", &values).unwrap(),
            "a-b-c"
        );
        assert_eq!(engine.render("{{ data | tojson }}", &values).unwrap(), r#"{"key":"value"}"#);
        assert_eq!(engine.render("{{ title | slugify }}", &values).unwrap(), "hello-rust-world");
        assert_eq!(engine.render("{{ none | default('x') }}", &values).unwrap(), "x");
        assert_eq!(engine.render("{{ title | length }}", &values).unwrap(), "18");
    }

    #[test]
    fn test_filter_b64() {
        let engine = TemplateEngine::new();
        let values = ctx(&[("text", json!("hello")), ("encoded", json!("aGVsbG8="))]);
        assert_eq!(engine.render("{{ text | b64encode }}", &values).unwrap(), "aGVsbG8=");
        assert_eq!(engine.render("{{ encoded | b64decode }}", &values).unwrap(), "hello");
    }

    #[test]
    fn test_identifier_helpers() {
        let engine = TemplateEngine::new();
        let values = ctx(&[("item", json!({"published": "2021-03-07", "id": 42}))]);

        let id = engine
            .render(
                "{{ identifier(date=item.published, language='en', publisher='pub', site='site', post_type='post', id=item.id | string) }}",
                &values,
            )
            .unwrap();
        assert_eq!(id, "2021__03__07__en__site__pub__post__42");

        let values = ctx(&[("id", json!(id))]);
        assert_eq!(
            engine.render("{{ id | identifier_path }}", &values).unwrap(),
            "2021/03/07/en/site/pub/post/2021__03__07__en__site__pub__post__42"
        );

        let err = engine
            .render(
                "{{ identifier(date='2021-03-07', language='en', publisher='p', site='s_', post_type='t', id='1') }}",
                &Map::new(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Template(_)));
    }

    #[test]
    fn test_loop_and_conditional() {
        let engine = TemplateEngine::new();
        let values = ctx(&[("items", json!(["a", "b", "c"])), ("active", json!(true))]);
        let result = engine
            .render(
                "{% if active %}{% for item in items %}{{ item }}{% endfor %}{% endif %}",
                &values,
            )
            .unwrap();
        assert_eq!(result, "abc");
    }

    #[test]
    fn test_is_template() {
        assert!(TemplateEngine::is_template("Hello {{ name }}"));
        assert!(TemplateEngine::is_template("{% if x %}y{% endif %}"));
        assert!(!TemplateEngine::is_template("plain text {not a template}"));
    }
}
