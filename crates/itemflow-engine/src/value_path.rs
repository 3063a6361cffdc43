//! Dotted/bracketed path lookup on JSON values (`data.items[0].title`).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\[(\d+)\]|\["([^"]*)"\]|([^.\[\]]+)"#).expect("segment pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn segments(path: &str) -> Vec<Segment<'_>> {
    SEGMENT
        .captures_iter(path)
        .filter_map(|caps| {
            if let Some(index) = caps.get(1) {
                index.as_str().parse().ok().map(Segment::Index)
            } else if let Some(quoted) = caps.get(2) {
                Some(Segment::Key(quoted.as_str()))
            } else {
                caps.get(3).map(|key| Segment::Key(key.as_str()))
            }
        })
        .collect()
}

/// Resolve `path` against `value`. An empty path yields the value itself.
///
/// Numeric dotted segments index into arrays, so `items.0` and `items[0]`
/// are equivalent.
pub fn resolve<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for segment in segments(path) {
        current = match (segment, current) {
            (Segment::Index(i), Value::Array(arr)) => arr.get(i)?,
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Key(key), Value::Array(arr)) => arr.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
