//! Lenient accessors for untyped upstream JSON.
//!
//! The provider emits ids and limits sometimes as numbers, sometimes as
//! strings, depending on the payload shape. These helpers coerce instead of
//! failing so a single odd field never discards a whole record.

use serde_json::Value;

/// String coercion: strings pass through, numbers are stringified.
pub(crate) fn coerce_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn coerce_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

pub(crate) fn coerce_i64(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Field lookup returning a stringified value, or `""` when absent/unusable.
pub(crate) fn string_field(obj: &Value, key: &str) -> String {
    obj.get(key).and_then(coerce_string).unwrap_or_default()
}

pub(crate) fn f64_field(obj: &Value, key: &str) -> f64 {
    obj.get(key).and_then(coerce_f64).unwrap_or(0.0)
}

pub(crate) fn i64_field(obj: &Value, key: &str) -> i64 {
    obj.get(key).and_then(coerce_i64).unwrap_or(0)
}

pub(crate) fn bool_field(obj: &Value, key: &str) -> bool {
    obj.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_field_stringifies_numbers() {
        let v = json!({"gmid": 5611233, "ename": "A v B"});
        assert_eq!(string_field(&v, "gmid"), "5611233");
        assert_eq!(string_field(&v, "ename"), "A v B");
        assert_eq!(string_field(&v, "missing"), "");
    }

    #[test]
    fn numeric_coercion_accepts_strings() {
        let v = json!({"min": "100", "sid": "42"});
        assert_eq!(f64_field(&v, "min"), 100.0);
        assert_eq!(i64_field(&v, "sid"), 42);
    }
}
