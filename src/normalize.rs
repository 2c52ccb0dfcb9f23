//! Cleanup of numeric-like and string values coming from exported data.
//!
//! Records arrive from spreadsheets and hand-edited forms, so numbers show up
//! as `"1,234.50"`, `" \"42\" "`, `"--"` or real JSON numbers. The store runs
//! every configured numeric field through [`normalize`] on write and again on
//! read, so callers only ever see finite `f64`s.

use serde_json::{Map, Number, Value};

/// Placeholder strings that mean "no value".
const EMPTY_PLACEHOLDERS: &[&str] = &["\"\"", "''", "-", "--", "—"];

/// Clean a string-ish value: trim, unescape `\"`, strip wrapping quotes, and
/// map placeholders to the empty string. `null` becomes empty.
pub fn clean_str(value: &Value) -> String {
    let raw = match value {
        Value::Null => return String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    clean_text(&raw)
}

fn clean_text(raw: &str) -> String {
    let mut s = raw.trim().replace("\\\"", "\"");
    loop {
        let wrapped = s.len() >= 2
            && ((s.starts_with('"') && s.ends_with('"'))
                || (s.starts_with('\'') && s.ends_with('\'')));
        if !wrapped {
            break;
        }
        s = s[1..s.len() - 1].trim().to_string();
    }
    if EMPTY_PLACEHOLDERS.contains(&s.as_str()) {
        return String::new();
    }
    s
}

/// Coerce a numeric-like value to a finite number; anything unparsable is `0`.
pub fn normalize(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()).unwrap_or(0.0),
        Value::String(s) => parse_numeric_text(s),
        _ => 0.0,
    }
}

/// Parse free-form numeric text after stripping separators and quoting.
pub fn parse_numeric_text(raw: &str) -> f64 {
    let cleaned = clean_text(raw);
    if cleaned.is_empty() {
        return 0.0;
    }
    let compact: String = cleaned
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    compact
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .unwrap_or(0.0)
}

/// JSON form of [`normalize`]. Integral results stay integers.
pub fn normalize_value(value: &Value) -> Value {
    let n = normalize(value);
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or_else(|| Value::Number(Number::from(0)))
    }
}

/// Normalize the named numeric fields of a record in place.
///
/// Only fields that are present are touched; absent fields stay absent.
pub fn normalize_fields(fields: &mut Map<String, Value>, numeric_fields: &[String]) {
    for name in numeric_fields {
        if let Some(v) = fields.get_mut(name) {
            *v = normalize_value(v);
        }
    }
}

/// Clean every string field of a record in place, skipping numeric fields.
pub fn clean_string_fields(fields: &mut Map<String, Value>, numeric_fields: &[String]) {
    for (name, v) in fields.iter_mut() {
        if numeric_fields.iter().any(|n| n == name) {
            continue;
        }
        if let Value::String(s) = v {
            *s = clean_text(s);
        }
    }
}
