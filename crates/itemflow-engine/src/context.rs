//! Run context threaded through every pipeline stage.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

static NULL: Value = Value::Null;

/// User- and template-visible scope.
///
/// A plain string-to-JSON map. Well-known entries are reached through the
/// named accessors; anything else is caller-provided environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicContext {
    values: Map<String, Value>,
}

impl PublicContext {
    pub const RESULT: &'static str = "result";
    pub const ITEMS: &'static str = "items";
    pub const SOURCE_INDEX: &'static str = "source_index";
    pub const ITEM: &'static str = "item";
    pub const INDEX: &'static str = "index";
    pub const STEPS: &'static str = "steps";
    pub const ENV: &'static str = "env";

    /// Create a new, empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from caller-provided values.
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Set a value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Get a value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Remove a value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    /// Raw result of the current source (or its successor stage).
    pub fn result(&self) -> &Value {
        self.values.get(Self::RESULT).unwrap_or(&NULL)
    }

    pub fn set_result(&mut self, result: Value) {
        self.set(Self::RESULT, result);
    }

    /// Current item list.
    pub fn items(&self) -> &Value {
        self.values.get(Self::ITEMS).unwrap_or(&NULL)
    }

    pub fn set_items(&mut self, items: Vec<Value>) {
        self.set(Self::ITEMS, Value::Array(items));
    }

    pub fn source_index(&self) -> Option<usize> {
        self.values
            .get(Self::SOURCE_INDEX)
            .and_then(Value::as_u64)
            .map(|i| i as usize)
    }

    pub fn set_source_index(&mut self, index: usize) {
        self.set(Self::SOURCE_INDEX, Value::from(index));
    }

    /// Expose the item currently flowing through the step stage.
    pub fn set_current_item(&mut self, index: usize, item: Value) {
        self.set(Self::INDEX, Value::from(index));
        self.set(Self::ITEM, item);
    }

    /// Record a step's output under `steps.<id>`.
    pub fn set_step_output(&mut self, step_id: &str, output: Value) {
        let steps = self
            .values
            .entry(Self::STEPS)
            .or_insert_with(|| Value::Object(Map::new()));
        if !steps.is_object() {
            *steps = Value::Object(Map::new());
        }
        if let Value::Object(map) = steps {
            map.insert(step_id.to_string(), output);
        }
    }

    /// Output of a previously executed step.
    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.values.get(Self::STEPS).and_then(|steps| steps.get(step_id))
    }

    /// Forget per-item step outputs.
    pub fn clear_step_outputs(&mut self) {
        self.values.remove(Self::STEPS);
    }

    /// Merge another map into this one, overwriting existing names.
    pub fn merge(&mut self, other: &Map<String, Value>) {
        for (k, v) in other {
            self.values.insert(k.clone(), v.clone());
        }
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Convert to a map for template rendering: every value at top level,
    /// plus the whole scope again under `ctx`.
    pub fn to_template_context(&self) -> Map<String, Value> {
        let mut ctx = self.values.clone();
        ctx.insert("ctx".to_string(), Value::Object(self.values.clone()));
        ctx
    }
}

/// Engine-private bookkeeping for one workflow source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalState {
    /// Previously committed dedup keys, oldest first.
    keys: Vec<String>,

    /// Dedup keys parallel to the current item list (`None` when an item has
    /// no usable key).
    item_keys: Vec<Option<String>>,

    seen: HashSet<String>,
}

impl InternalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from keys committed in an earlier run.
    pub fn with_keys(keys: Vec<String>) -> Self {
        let seen = keys.iter().cloned().collect();
        Self {
            keys,
            item_keys: Vec::new(),
            seen,
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Append a key once an item has been accepted. Returns false if it was
    /// already recorded.
    pub fn record_key(&mut self, key: impl Into<String>) -> bool {
        let key = key.into();
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.keys.push(key);
        true
    }

    /// Drop the oldest keys so at most `max` remain.
    pub fn trim_history(&mut self, max: usize) -> usize {
        if self.keys.len() <= max {
            return 0;
        }
        let excess = self.keys.len() - max;
        for key in self.keys.drain(..excess) {
            self.seen.remove(&key);
        }
        excess
    }

    pub fn item_keys(&self) -> &[Option<String>] {
        &self.item_keys
    }

    pub fn set_item_keys(&mut self, item_keys: Vec<Option<String>>) {
        self.item_keys = item_keys;
    }

    pub fn truncate_item_keys(&mut self, len: usize) {
        self.item_keys.truncate(len);
    }

    /// Dedup key of the item at `index` in the current list.
    pub fn item_key(&self, index: usize) -> Option<&str> {
        self.item_keys.get(index).and_then(|k| k.as_deref())
    }
}

/// Mutable scope of one workflow run, passed by `&mut` through every stage.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub public: PublicContext,
    pub internal: InternalState,
}

impl RunContext {
    pub fn new(public: PublicContext) -> Self {
        Self {
            public,
            internal: InternalState::new(),
        }
    }
}
