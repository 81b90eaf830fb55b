//! String coercion and dotted-path lookup.
//!
//! Every comparison in the rule language is made between string forms: `true` matches
//! the boolean `true`, `12345` matches the number `12345`. Policy files are written
//! against this behavior, so all comparisons go through [`to_compat_string`].

use serde_json::Value;

/// Converts a JSON value to the string form used in comparisons.
///
/// Numbers print without a trailing `.0` when integral, arrays join their elements with
/// `,` (nulls become empty), objects become `[object Object]`.
pub fn to_compat_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_string(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_compat_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn number_string(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// True when `actual` is present, not null, and its string form equals `expected`.
pub fn compat_equals(actual: Option<&Value>, expected: &str) -> bool {
    match actual {
        Some(Value::Null) | None => false,
        Some(value) => to_compat_string(value) == expected,
    }
}

/// True when the value is absent or JSON null.
pub fn is_missing(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Resolves a dotted path such as `target.user.domain_id`.
///
/// Object keys are matched exactly; array segments must be numeric indices.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Strips a `%(path)s` wrapper, returning the inner path. Other text is returned as is.
pub fn strip_placeholder(text: &str) -> &str {
    text.strip_prefix("%(")
        .and_then(|rest| rest.strip_suffix(")s"))
        .unwrap_or(text)
}

/// Shallow merge of two JSON objects; keys in `overrides` win.
///
/// Non-object inputs are treated as empty.
pub fn merge_params(defaults: &Value, overrides: &Value) -> Value {
    let mut merged = serde_json::Map::new();
    if let Value::Object(map) = defaults {
        merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if let Value::Object(map) = overrides {
        merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(to_compat_string(&json!(null)), "null");
        assert_eq!(to_compat_string(&json!(true)), "true");
        assert_eq!(to_compat_string(&json!(false)), "false");
        assert_eq!(to_compat_string(&json!(12345)), "12345");
        assert_eq!(to_compat_string(&json!(-7)), "-7");
        assert_eq!(to_compat_string(&json!(3.0)), "3");
        assert_eq!(to_compat_string(&json!(2.5)), "2.5");
        assert_eq!(to_compat_string(&json!("abc")), "abc");
    }

    #[test]
    fn test_compound_coercion() {
        assert_eq!(to_compat_string(&json!(["a", 1, null, true])), "a,1,,true");
        assert_eq!(to_compat_string(&json!({"a": 1})), "[object Object]");
    }

    #[test]
    fn test_compat_equals() {
        assert!(compat_equals(Some(&json!(1)), "1"));
        assert!(compat_equals(Some(&json!(true)), "true"));
        assert!(!compat_equals(Some(&json!(true)), "True"));
        assert!(!compat_equals(None, "null"));
        assert!(!compat_equals(Some(&json!(null)), "null"));
    }

    #[test]
    fn test_lookup_path() {
        let value = json!({"target": {"user": {"id": "u1"}, "ids": ["a", "b"]}});
        assert_eq!(lookup_path(&value, "target.user.id"), Some(&json!("u1")));
        assert_eq!(lookup_path(&value, "target.ids.1"), Some(&json!("b")));
        assert_eq!(lookup_path(&value, "target.missing"), None);
        assert_eq!(lookup_path(&value, "target.user.id.deeper"), None);
        assert_eq!(lookup_path(&value, ""), None);
    }

    #[test]
    fn test_strip_placeholder() {
        assert_eq!(strip_placeholder("%(target.id)s"), "target.id");
        assert_eq!(strip_placeholder("target.id"), "target.id");
    }

    #[test]
    fn test_merge_params() {
        let merged = merge_params(&json!({"a": 1, "b": 2}), &json!({"b": 3, "c": 4}));
        assert_eq!(merged, json!({"a": 1, "b": 3, "c": 4}));
        assert_eq!(merge_params(&json!(null), &json!(null)), json!({}));
    }
}
