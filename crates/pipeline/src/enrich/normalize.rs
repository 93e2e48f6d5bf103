//! Attribute normalization.
//!
//! Keys become snake_case at every nesting level. String values are
//! coerced: email-like fields are trimmed and lower-cased, numeric strings
//! become floats, RFC 3339 strings become epoch milliseconds. Fields that
//! hold identifiers (ids, phone numbers, tokens) keep their string form.

use chrono::DateTime;
use serde_json::{Map, Number, Value};

use kurier_core::Attributes;

/// Key fragments marking a value as an identifier, never a number.
const IDENTIFIER_HINTS: &[&str] = &["phone", "token", "zip", "postal"];

pub fn normalize_attributes(attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .map(|(key, value)| {
            let key = to_snake_case(key);
            let value = normalize_value(&key, value);
            (key, value)
        })
        .collect()
}

fn normalize_value(key: &str, value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let normalized: Map<String, Value> = map
                .iter()
                .map(|(k, v)| {
                    let k = to_snake_case(k);
                    let v = normalize_value(&k, v);
                    (k, v)
                })
                .collect();
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| normalize_value(key, v)).collect()),
        Value::String(s) => normalize_string(key, s),
        other => other.clone(),
    }
}

fn normalize_string(key: &str, s: &str) -> Value {
    let trimmed = s.trim();
    if key.contains("email") || looks_like_email(trimmed) {
        return Value::String(trimmed.to_lowercase());
    }
    if is_identifier_key(key) {
        return Value::String(s.to_string());
    }
    if let Some(n) = parse_numeric(trimmed) {
        return Value::Number(n);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Value::from(ts.timestamp_millis());
    }
    Value::String(s.to_string())
}

fn is_identifier_key(key: &str) -> bool {
    key == "id" || key.ends_with("_id") || IDENTIFIER_HINTS.iter().any(|hint| key.contains(hint))
}

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.contains(char::is_whitespace)
}

/// Plain decimal or scientific notation only; `inf` and `NaN` stay strings.
fn parse_numeric(s: &str) -> Option<Number> {
    if !s.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if !s.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')) {
        return None;
    }
    let parsed: f64 = s.parse().ok()?;
    Number::from_f64(parsed)
}

/// `orderTotal` -> `order_total`, `userID` -> `user_id`, `HTTPServer` -> `http_server`.
pub fn to_snake_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == ' ' {
            if !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
