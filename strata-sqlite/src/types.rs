//! Type conversion utilities for SQLite.

use rusqlite::types::{Value, ValueRef};
use serde_json::Value as JsonValue;
use strata_migrate::Row;

/// Convert a JSON parameter to a SQLite value.
pub fn json_to_sqlite(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Integer(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
        },
        JsonValue::String(s) => Value::Text(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => Value::Text(value.to_string()),
    }
}

/// Convert a parameter slice for binding.
pub fn json_params(params: &[JsonValue]) -> Vec<Value> {
    params.iter().map(json_to_sqlite).collect()
}

/// Convert a SQLite ValueRef to a JSON Value.
pub fn from_sqlite_value(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => JsonValue::String(hex::encode(bytes)),
    }
}

/// Read every column of a result row into a [`Row`].
pub fn row_to_json(row: &rusqlite::Row<'_>, columns: &[String]) -> Row {
    let mut map = Row::new();
    for (i, col) in columns.iter().enumerate() {
        let value = row
            .get_ref(i)
            .map(from_sqlite_value)
            .unwrap_or(JsonValue::Null);
        map.insert(col.clone(), value);
    }
    map
}

/// Quote an identifier for use in generated SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_to_sqlite_scalars() {
        assert!(matches!(json_to_sqlite(&JsonValue::Null), Value::Null));
        assert!(matches!(json_to_sqlite(&json!(true)), Value::Integer(1)));
        assert!(matches!(json_to_sqlite(&json!(false)), Value::Integer(0)));
        assert!(matches!(json_to_sqlite(&json!(42)), Value::Integer(42)));
        assert!(matches!(json_to_sqlite(&json!("hello")), Value::Text(s) if s == "hello"));
    }

    #[test]
    fn test_json_to_sqlite_float() {
        match json_to_sqlite(&json!(2.5)) {
            Value::Real(f) => assert!((f - 2.5).abs() < f64::EPSILON),
            other => panic!("Expected Real, got {:?}", other),
        }
    }

    #[test]
    fn test_json_to_sqlite_nested() {
        let value = json_to_sqlite(&json!({ "tags": ["a", "b"] }));
        assert!(matches!(value, Value::Text(s) if s == r#"{"tags":["a","b"]}"#));
    }

    #[test]
    fn test_from_sqlite_value() {
        assert_eq!(from_sqlite_value(ValueRef::Null), JsonValue::Null);
        assert_eq!(from_sqlite_value(ValueRef::Integer(7)), json!(7));
        assert_eq!(from_sqlite_value(ValueRef::Text(b"abc")), json!("abc"));
        assert_eq!(from_sqlite_value(ValueRef::Blob(&[0xde, 0xad])), json!("dead"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("schema_migrations"), "\"schema_migrations\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }
}
