use crate::model::IssuesResult;
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Fields whose value is a map keyed by identifiers rather than by field names.
pub const KEYED_MAPS: &[&str] = &[
    "issuesData",
    "componentDetails",
    "depsFilePaths",
    "fileSignaturesDetails",
    "vulnerableByDistro",
];

pub fn camel_case(key: &str) -> Cow<'_, str> {
    if !key.contains('_') {
        return Cow::Borrowed(key);
    }

    let mut out = String::with_capacity(key.len());
    let mut in_word = false;
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            if in_word {
                // runs of inner underscores collapse into one word break
                upper_next = true;
            } else {
                out.push('_');
            }
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
            in_word = true;
        }
    }
    if upper_next {
        out.push('_');
    }
    Cow::Owned(out)
}

fn is_keyed_map(key: &str) -> bool {
    KEYED_MAPS.contains(&key)
}

fn decode_object(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| {
            let key = camel_case(&key).into_owned();
            let value = if is_keyed_map(&key) {
                decode_keyed(value)
            } else {
                decode(value)
            };
            (key, value)
        })
        .collect()
}

fn decode_keyed(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, decode(value)))
                .collect(),
        ),
        other => decode(other),
    }
}

/// Rewrite every field name of a wire document into the client's casing.
pub fn decode(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(decode_object(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(decode).collect()),
        other => other,
    }
}

pub fn decode_issues_result(value: Value) -> serde_json::Result<IssuesResult> {
    serde_json::from_value(decode(value))
}
