//! Sandboxed script evaluation using Rhai.
//!
//! Scripts see each local as a bare variable plus a mutable `ctx` map. The
//! embedded engine has no access to the host beyond the helpers registered
//! here, and is bounded by an operation budget.

use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::identifier;

const CTX: &str = "ctx";

/// Default operation budget per evaluation.
pub const DEFAULT_MAX_OPERATIONS: u64 = 1_000_000;

/// Value of the script plus the (possibly mutated) `ctx` scratch map.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutput {
    pub result: Value,
    pub ctx: Value,
}

/// Shared, thread-safe Rhai engine.
#[derive(Clone)]
pub struct ScriptEngine {
    engine: Arc<Engine>,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self::with_max_operations(DEFAULT_MAX_OPERATIONS)
    }

    /// Create an engine that aborts scripts after `max_operations` steps.
    pub fn with_max_operations(max_operations: u64) -> Self {
        Self {
            engine: Arc::new(create_engine(max_operations)),
        }
    }

    /// Evaluate `expression` with `locals` in scope.
    ///
    /// A `ctx` map is created when `locals` has none. A top-level `return`
    /// ends the script with that value.
    pub fn eval(&self, expression: &str, locals: &Map<String, Value>) -> EngineResult<ScriptOutput> {
        let mut scope = Scope::new();
        for (name, value) in locals {
            scope.push_dynamic(name.clone(), json_to_dynamic(value));
        }
        if !scope.contains(CTX) {
            scope.push_dynamic(CTX, Dynamic::from(rhai::Map::new()));
        }

        let result = self
            .engine
            .eval_with_scope::<Dynamic>(&mut scope, expression)
            .map_err(|e| EngineError::Script(e.to_string()))?;

        let ctx = scope
            .get_value::<Dynamic>(CTX)
            .map(|ctx| dynamic_to_json(&ctx))
            .unwrap_or(Value::Null);

        Ok(ScriptOutput {
            result: dynamic_to_json(&result),
            ctx,
        })
    }

    /// [`eval`](Self::eval) on the blocking pool, since Rhai is synchronous.
    pub async fn eval_async(&self, expression: String, locals: Map<String, Value>) -> EngineResult<ScriptOutput> {
        let engine = self.clone();
        tokio::task::spawn_blocking(move || engine.eval(&expression, &locals))
            .await
            .map_err(|e| EngineError::Script(format!("Task join error: {}", e)))?
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("max_operations", &self.engine.max_operations())
            .finish()
    }
}

fn create_engine(max_operations: u64) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(max_operations);
    engine.set_max_call_levels(64);
    engine.set_max_expr_depths(64, 32);

    engine.on_print(|msg| tracing::info!(target: "script", "{}", msg));
    engine.on_debug(|msg, _, pos| tracing::debug!(target: "script", position = %pos, "{}", msg));

    engine.register_fn("log", |msg: &str| {
        tracing::info!(target: "script", "{}", msg);
    });
    engine.register_fn("debug", |msg: &str| {
        tracing::debug!(target: "script", "{}", msg);
    });
    engine.register_fn("info", |msg: &str| {
        tracing::info!(target: "script", "{}", msg);
    });
    engine.register_fn("warn", |msg: &str| {
        tracing::warn!(target: "script", "{}", msg);
    });
    engine.register_fn("error", |msg: &str| {
        tracing::error!(target: "script", "{}", msg);
    });

    engine.register_fn("timestamp", || chrono::Utc::now().to_rfc3339());
    engine.register_fn("timestamp_ms", || chrono::Utc::now().timestamp_millis());

    engine.register_fn("parse_json", |s: &str| -> Dynamic {
        match serde_json::from_str::<Value>(s) {
            Ok(v) => json_to_dynamic(&v),
            Err(_) => Dynamic::UNIT,
        }
    });
    engine.register_fn("to_json", |val: Dynamic| -> String {
        serde_json::to_string(&dynamic_to_json(&val)).unwrap_or_else(|_| "null".to_string())
    });

    engine.register_fn(
        "identifier",
        |date: &str,
         language: &str,
         publisher: &str,
         site: &str,
         post_type: &str,
         original_id: &str|
         -> Result<String, Box<EvalAltResult>> {
            identifier::parse_date(date)
                .and_then(|date| identifier::stringify(&date, language, publisher, site, post_type, original_id))
                .map_err(|e| e.to_string().into())
        },
    );
    engine.register_fn("identifier_path", |id: &str| identifier::path_from_identifier(id));

    engine
}

// JSON <-> Dynamic conversion

fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(arr) => Dynamic::from(arr.iter().map(json_to_dynamic).collect::<rhai::Array>()),
        Value::Object(obj) => {
            let mut map = rhai::Map::new();
            for (k, v) in obj {
                map.insert(k.as_str().into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

fn dynamic_to_json(value: &Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Value::Number(i.into())
    } else if let Ok(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else if value.is_string() {
        Value::String(value.clone().into_string().unwrap_or_default())
    } else if value.is_array() {
        let arr = value.clone().into_array().unwrap_or_default();
        Value::Array(arr.iter().map(dynamic_to_json).collect())
    } else if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_string(), dynamic_to_json(&v)))
                .collect(),
        )
    } else {
        Value::String(value.to_string())
    }
}
