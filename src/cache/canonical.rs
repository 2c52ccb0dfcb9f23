//! Deterministic string form of arbitrary JSON values.
//!
//! Objects are rendered with their keys sorted, so two maps with the same
//! content but different insertion order serialize identically. This string is
//! what the cache key deriver hashes.
//!
//! The rendering is not JSON: scalars use their natural form (strings are not
//! quoted) and `null` renders as the empty string. Object keys are quoted so
//! `{"a,b": 1}` cannot collide with `{"a": "", "b": 1}`.

use serde_json::Value;

/// Serialize `value` in canonical form. Total over every JSON value.
pub fn serialize(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Serialize an optional value; `None` renders the same as `null`.
pub fn serialize_opt(value: Option<&Value>) -> String {
    value.map(serialize).unwrap_or_default()
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // A key always renders as a JSON string literal; fall back to
                // the bare key if escaping somehow fails.
                let quoted =
                    serde_json::to_string(key).unwrap_or_else(|_| format!("\"{key}\""));
                out.push_str(&quoted);
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_value(out, v);
                }
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"d":4,"c":3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"c":3,"d":4},"b":1}"#).unwrap();
        assert_eq!(serialize(&a), serialize(&b));
        assert_eq!(serialize(&a), r#"{"a":{"c":3,"d":4},"b":1}"#);
    }

    #[test]
    fn test_array_order_is_preserved() {
        let v = json!([{"b": 2}, {"a": 1}]);
        assert_eq!(serialize(&v), r#"[{"b":2},{"a":1}]"#);
        assert_ne!(serialize(&json!([1, 2])), serialize(&json!([2, 1])));
    }

    #[test]
    fn test_scalars_use_natural_form() {
        assert_eq!(serialize(&json!("text")), "text");
        assert_eq!(serialize(&json!(42)), "42");
        assert_eq!(serialize(&json!(1.5)), "1.5");
        assert_eq!(serialize(&json!(true)), "true");
        assert_eq!(serialize(&Value::Null), "");
        assert_eq!(serialize_opt(None), "");
    }

    #[test]
    fn test_null_inside_object() {
        assert_eq!(serialize(&json!({"a": null})), r#"{"a":}"#);
    }

    #[test]
    fn test_keys_are_quoted_to_avoid_separator_collision() {
        let a = json!({"a,b": 1});
        let b = json!({"a": "", "b": 1});
        assert_ne!(serialize(&a), serialize(&b));
    }

    #[test]
    fn test_unicode_keys_and_values() {
        let v = json!({"行业": "银行", "code": "000001"});
        assert_eq!(serialize(&v), r#"{"code":000001,"行业":银行}"#);
    }
}
