//! Source-item pipeline: extraction, dedup and limiting.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{PublicContext, RunContext};
use crate::error::{EngineError, EngineResult};
use crate::value_path;

/// Field names probed, in order, after the configured `key`.
pub const FALLBACK_KEYS: [&str; 8] = ["id", "guid", "_id", "objectId", "objectID", "ID", "url", "link"];

/// Per-source pipeline options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOptions {
    /// Stable source identifier used as the dedup-key prefix. Falls back to
    /// the source's position in the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Item field tried before [`FALLBACK_KEYS`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Path to the item array inside the raw result.
    #[serde(default, alias = "items_path", skip_serializing_if = "Option::is_none")]
    pub items_path: Option<String>,

    #[serde(default)]
    pub reverse: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Keep items whose key was already processed.
    #[serde(default)]
    pub force: bool,
}

impl SourceOptions {
    /// Prefix shared by every dedup key of this source.
    pub fn key_prefix(&self, source_index: usize) -> String {
        match &self.id {
            Some(id) => format!("{}_", id),
            None => format!("{}_", source_index),
        }
    }
}

/// Options of a `limit` filter stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Dedup key of `item`, or `None` when no candidate field holds a string.
pub fn compute_key(item: &Value, source_index: usize, options: &SourceOptions) -> Option<String> {
    let candidates = options.key.as_deref().into_iter().chain(FALLBACK_KEYS);
    let item_key = candidates
        .filter_map(|field| item.get(field))
        .find_map(Value::as_str)?;
    Some(format!("{}{}", options.key_prefix(source_index), item_key))
}

/// Turn the raw source result into the deduplicated item list.
///
/// Survivors are written to both `items` and `result`; their keys go to
/// `internal.item_keys` in the same order. Committed keys are not touched.
pub fn extract_and_dedupe(ctx: &mut RunContext, options: &SourceOptions) -> EngineResult<()> {
    let result = ctx.public.result();
    let (path, extracted) = match options.items_path.as_deref() {
        Some(path) => (path, value_path::resolve(result, path)),
        None => ("result", Some(result)),
    };
    let mut items = match extracted {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => return Err(EngineError::shape(path, other)),
        None => return Err(EngineError::shape(path, &Value::Null)),
    };

    if options.reverse {
        items.reverse();
    }
    if let Some(limit) = options.limit {
        items.truncate(limit);
    }

    let source_index = ctx.public.source_index().unwrap_or(0);
    let mut survivors = Vec::with_capacity(items.len());
    let mut item_keys = Vec::with_capacity(items.len());

    for item in items {
        let key = compute_key(&item, source_index, options);
        match key.as_deref() {
            None => {
                tracing::warn!(source_index, "Item has no unique key, it cannot be deduplicated");
            }
            Some(key) if ctx.internal.has_key(key) => {
                if !options.force {
                    tracing::debug!(key = %key, "Skipping already processed item");
                    continue;
                }
                tracing::info!(key = %key, "Re-adding already processed item (force)");
            }
            Some(_) => {}
        }
        survivors.push(item);
        item_keys.push(key);
    }

    tracing::debug!(source_index, items = survivors.len(), "Extracted source items");

    ctx.public.set_result(Value::Array(survivors.clone()));
    ctx.public.set_items(survivors);
    ctx.internal.set_item_keys(item_keys);
    Ok(())
}

/// Cap the current item list at `options.limit`.
pub fn filter_limit(ctx: &mut RunContext, options: &FilterOptions) -> EngineResult<()> {
    let Value::Array(items) = ctx.public.items() else {
        return Err(EngineError::shape(PublicContext::ITEMS, ctx.public.items()));
    };
    let Some(limit) = options.limit else {
        return Ok(());
    };
    if items.len() <= limit {
        return Ok(());
    }

    let mut items = items.clone();
    items.truncate(limit);
    ctx.public.set_items(items);
    ctx.internal.truncate_item_keys(limit);
    Ok(())
}
