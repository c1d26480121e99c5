pub use serde_json::Value as JsonValue;

/// One step of a path through a tree.
#[derive(Debug, Clone, Copy)]
pub enum PathSeg<'a> {
    Key(&'a str),
    Index(usize),
}

/// Parse text into a tree, or `None` if it is not JSON.
pub fn parse(text: &str) -> Option<JsonValue> {
    serde_json::from_str(text).ok()
}

/// Follow `path` from `root`. Fails on any missing key, out-of-range index or
/// node of the wrong kind.
pub fn navigate<'a>(root: &'a JsonValue, path: &[PathSeg<'_>]) -> Option<&'a JsonValue> {
    path.iter().try_fold(root, |node, seg| match (seg, node) {
        (PathSeg::Key(key), JsonValue::Object(map)) => map.get(*key),
        (PathSeg::Index(i), JsonValue::Array(items)) => items.get(*i),
        _ => None,
    })
}

pub fn as_text(value: &JsonValue) -> Option<&str> {
    match value {
        JsonValue::String(s) => Some(s),
        _ => None,
    }
}

/// Integer view of a node: integers as-is, floats truncated toward zero,
/// numeric strings parsed the same way.
pub fn as_int_lenient(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

/// Boolean view of a node: booleans as-is, `"true"`/`"false"` strings in any case.
pub fn as_bool_lenient(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
