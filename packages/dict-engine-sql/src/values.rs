//! Column naming and value conversion between normalized JSON and SQLite.

use dict_engine_core::error::{DictError, Result};
use dict_engine_core::schema::{DictField, FieldType};
use rusqlite::types::Value as SqlValue;
use rusqlite::ErrorCode;
use serde_json::Value;

/// Alias of the root table in generated statements.
pub(crate) const ROOT_ALIAS: &str = "t";

/// Quotes an identifier.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Data table of a dictionary.
pub(crate) fn table_name(dict_id: &str) -> String {
    quote(&format!("d_{}", dict_id))
}

/// Alias of a joined dictionary table.
pub(crate) fn join_alias(dict_id: &str) -> String {
    quote(&format!("j_{}", dict_id))
}

pub(crate) fn index_name(dict_id: &str, index_id: &str) -> String {
    format!("ix_{}_{}", dict_id, index_id)
}

pub(crate) fn constraint_name(dict_id: &str, constraint_id: &str) -> String {
    format!("uq_{}_{}", dict_id, constraint_id)
}

/// Column qualified with a table alias.
pub(crate) fn column(alias: &str, field_id: &str) -> String {
    format!("{}.{}", alias, quote(field_id))
}

/// SQLite column type of a field.
///
/// Multi-valued and JSON fields are stored as JSON text.
pub(crate) fn column_type(field: &DictField) -> &'static str {
    if field.multivalued {
        return "TEXT";
    }
    match field.field_type {
        FieldType::Integer | FieldType::Boolean => "INTEGER",
        FieldType::Decimal => "REAL",
        _ => "TEXT",
    }
}

/// Returns true if the field is stored as JSON text.
pub(crate) fn is_json_column(field: &DictField) -> bool {
    field.multivalued || matches!(field.field_type, FieldType::Json | FieldType::GeoJson)
}

/// Converts a normalized field value to its column value.
pub(crate) fn to_sql(field: &DictField, value: &Value) -> SqlValue {
    if value.is_null() {
        return SqlValue::Null;
    }
    if field.multivalued {
        return SqlValue::Text(value.to_string());
    }
    scalar_to_sql(field.field_type, value)
}

/// Converts one scalar value; also used for elements of JSON arrays,
/// which SQLite's `json_each` yields with the same representation.
pub(crate) fn scalar_to_sql(field_type: FieldType, value: &Value) -> SqlValue {
    match (field_type, value) {
        (_, Value::Null) => SqlValue::Null,
        (FieldType::Json | FieldType::GeoJson, other) => SqlValue::Text(other.to_string()),
        (_, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        (FieldType::Decimal, Value::Number(n)) => SqlValue::Real(n.as_f64().unwrap_or_default()),
        (_, Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        (_, Value::String(s)) => SqlValue::Text(s.clone()),
        (_, other) => SqlValue::Text(other.to_string()),
    }
}

/// Converts a column value back to the normalized field value.
pub(crate) fn from_sql(dict_id: &str, field: &DictField, value: SqlValue) -> Result<Value> {
    if is_json_column(field) {
        return match value {
            SqlValue::Null => Ok(Value::Null),
            SqlValue::Text(text) => serde_json::from_str(&text).map_err(|e| {
                DictError::storage(format!("dict '{}' field '{}'", dict_id, field.id), e)
            }),
            other => Ok(scalar_from_sql(FieldType::Json, other)),
        };
    }
    Ok(scalar_from_sql(field.field_type, value))
}

/// Converts a scalar column or `json_each` value.
pub(crate) fn scalar_from_sql(field_type: FieldType, value: SqlValue) -> Value {
    match (field_type, value) {
        (_, SqlValue::Null) => Value::Null,
        (FieldType::Boolean, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (FieldType::Decimal, SqlValue::Integer(i)) => Value::from(i as f64),
        (FieldType::Json | FieldType::GeoJson, SqlValue::Text(text)) => {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        }
        (_, SqlValue::Integer(i)) => Value::from(i),
        (_, SqlValue::Real(f)) => Value::from(f),
        (_, SqlValue::Text(text)) => Value::String(text),
        (_, SqlValue::Blob(bytes)) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

/// SQL function lowercasing text with Unicode case rules.
///
/// SQLite's own `lower()` only folds ASCII letters.
pub(crate) const LOWER_FUNCTION: &str = "unicode_lower";

/// Translates a `like` pattern into a case-sensitive GLOB pattern.
pub(crate) fn like_to_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '%' => glob.push('*'),
            '_' => glob.push('?'),
            '*' => glob.push_str("[*]"),
            '?' => glob.push_str("[?]"),
            '[' => glob.push_str("[[]"),
            other => glob.push(other),
        }
    }
    glob
}

/// Wraps a driver error with the dictionary it concerns.
///
/// Constraint violations become `UniqueViolation`.
pub(crate) fn data_error(dict_id: &str, error: rusqlite::Error) -> DictError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &error {
        if failure.code == ErrorCode::ConstraintViolation {
            return DictError::UniqueViolation {
                dict: dict_id.to_string(),
                message: message.clone().unwrap_or_else(|| error.to_string()),
            };
        }
    }
    DictError::storage(format!("dict '{}'", dict_id), error)
}

/// Wraps a driver error raised by DDL.
pub(crate) fn scheme_error(dict_id: &str, error: rusqlite::Error) -> DictError {
    DictError::SchemaModification {
        dict: dict_id.to_string(),
        message: error.to_string(),
    }
}

/// Wraps a driver error raised on metadata tables.
pub(crate) fn meta_error(context: &str, error: rusqlite::Error) -> DictError {
    DictError::storage(context, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;
    use serde_json::json;

    #[timeout(1000)]
    #[test]
    fn test_glob_translation() {
        assert_eq!(like_to_glob("ab%"), "ab*");
        assert_eq!(like_to_glob("a_c"), "a?c");
        assert_eq!(like_to_glob("*[?]"), "[*][[][?]]");
    }

    #[timeout(1000)]
    #[test]
    fn test_value_round_trip_by_type() {
        let flag = DictField::new("flag", FieldType::Boolean);
        assert_eq!(to_sql(&flag, &json!(true)), SqlValue::Integer(1));
        assert_eq!(from_sql("d", &flag, SqlValue::Integer(0)).unwrap(), json!(false));

        let amount = DictField::new("amount", FieldType::Decimal);
        assert_eq!(to_sql(&amount, &json!(2.5)), SqlValue::Real(2.5));
        assert_eq!(from_sql("d", &amount, SqlValue::Integer(3)).unwrap(), json!(3.0));

        let tags = DictField::new("tags", FieldType::String).multivalued();
        let stored = to_sql(&tags, &json!(["a", "b"]));
        assert_eq!(stored, SqlValue::Text("[\"a\",\"b\"]".to_string()));
        assert_eq!(from_sql("d", &tags, stored).unwrap(), json!(["a", "b"]));

        let doc = DictField::new("doc", FieldType::Json).multivalued();
        assert_eq!(
            from_sql("d", &doc, to_sql(&doc, &json!([{"k": 1}, [2]]))).unwrap(),
            json!([{"k": 1}, [2]])
        );
    }
}
