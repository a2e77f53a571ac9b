//! Lenient coercions from YAML nodes to model values.

use serde_yaml::Value;

pub(crate) fn string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn boolean(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::Bool(true)))
}

pub(crate) fn unsigned(value: Option<&Value>) -> Option<usize> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|v| usize::try_from(v).ok()),
        _ => None,
    }
}

/// A scalar is promoted to a one-element list; sequence entries that are not
/// scalars are skipped.
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Sequence(items)) => {
            items.iter().filter_map(|v| string(Some(v))).collect()
        }
        Some(scalar) => string(Some(scalar)).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Ordered `(key, scalar)` pairs of a mapping node; non-string keys and
/// non-scalar values are skipped.
pub(crate) fn string_map(value: Option<&Value>) -> Vec<(String, String)> {
    let Some(Value::Mapping(map)) = value else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| Some((k.as_str()?.to_string(), string(Some(v))?)))
        .collect()
}

/// Ordered `(key, list)` pairs of a mapping node whose values are scalars or
/// sequences of scalars.
pub(crate) fn string_list_map(value: Option<&Value>) -> Vec<(String, Vec<String>)> {
    let Some(Value::Mapping(map)) = value else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| Some((k.as_str()?.to_string(), string_list(Some(v)))))
        .collect()
}

pub(crate) fn get<'a>(map: &'a serde_yaml::Mapping, key: &str) -> Option<&'a Value> {
    map.get(key)
}
