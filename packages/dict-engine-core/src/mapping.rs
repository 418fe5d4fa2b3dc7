//! Value mapping between the wire representation and normalized field values.
//!
//! Every value stored by a backend passes through [`coerce_value`] first, so
//! backends only ever see normalized JSON:
//! - DECIMAL values are JSON floats, INTEGER values are JSON integers
//! - DATE values are `YYYY-MM-DD` strings
//! - TIMESTAMP values are UTC strings with microsecond precision, which keeps
//!   lexicographic order equal to chronological order
//! - multi-valued fields are JSON arrays of normalized elements

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::DictError;
use crate::query::ast::Constant;
use crate::schema::{Dict, DictField, FieldType};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Formats a timestamp in the normalized storage form.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a normalized (or any RFC 3339) timestamp.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Parses a `YYYY-MM-DD` date.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT).ok()
}

/// Coerces a wire value to the normalized form of the field's type.
///
/// Lossless coercions are accepted (integer to decimal, date to timestamp,
/// single value to a one-element array for multi-valued fields); anything
/// else fails with `ValueValidation`.
pub fn coerce_value(dict_id: &str, field: &DictField, value: &Value) -> Result<Value, DictError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if field.multivalued {
        let elements = match value {
            Value::Array(elements) => elements.as_slice(),
            single => std::slice::from_ref(single),
        };
        let coerced = elements
            .iter()
            .map(|element| {
                if element.is_null() {
                    Err(invalid(dict_id, field, "array elements cannot be null".to_string()))
                } else {
                    coerce_scalar(dict_id, field, element)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Array(coerced));
    }
    coerce_scalar(dict_id, field, value)
}

/// Coerces one non-null value to the field's scalar type.
pub fn coerce_scalar(dict_id: &str, field: &DictField, value: &Value) -> Result<Value, DictError> {
    let mismatch = || {
        invalid(
            dict_id,
            field,
            format!("expected {} value, got {}", field.field_type, value),
        )
    };
    match field.field_type {
        FieldType::String | FieldType::Enum | FieldType::Dict | FieldType::Attachment => {
            value.as_str().map(|s| Value::String(s.to_string())).ok_or_else(mismatch)
        }
        FieldType::Integer => {
            if let Some(i) = value.as_i64() {
                return Ok(Value::from(i));
            }
            match value.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::from(f as i64))
                }
                _ => Err(mismatch()),
            }
        }
        FieldType::Decimal => value.as_f64().map(Value::from).ok_or_else(mismatch),
        FieldType::Boolean => value.as_bool().map(Value::Bool).ok_or_else(mismatch),
        FieldType::Date => value
            .as_str()
            .and_then(parse_date)
            .map(|date| Value::String(date.format(DATE_FORMAT).to_string()))
            .ok_or_else(mismatch),
        FieldType::Timestamp => value
            .as_str()
            .and_then(parse_timestamp)
            .map(|ts| Value::String(format_timestamp(&ts)))
            .ok_or_else(mismatch),
        FieldType::Json => Ok(value.clone()),
        FieldType::GeoJson => match value.get("type").and_then(Value::as_str) {
            Some(_) if value.is_object() => Ok(value.clone()),
            _ => Err(invalid(
                dict_id,
                field,
                "GEO_JSON value must be an object with a 'type' member".to_string(),
            )),
        },
    }
}

/// Checks bounds and enum membership of a coerced value.
pub fn check_constraints(dict: &Dict, field: &DictField, value: &Value) -> Result<(), DictError> {
    match value {
        Value::Null => Ok(()),
        Value::Array(elements) if field.multivalued => elements
            .iter()
            .try_for_each(|element| check_scalar_constraints(dict, field, element)),
        scalar => check_scalar_constraints(dict, field, scalar),
    }
}

fn check_scalar_constraints(dict: &Dict, field: &DictField, value: &Value) -> Result<(), DictError> {
    let measured = match field.field_type {
        FieldType::Integer | FieldType::Decimal => value.as_f64(),
        FieldType::String => value.as_str().map(|s| s.chars().count() as f64),
        _ => None,
    };
    if let Some(measured) = measured {
        let what = if field.field_type == FieldType::String {
            "length"
        } else {
            "value"
        };
        if let Some(min) = field.min_size {
            if measured < min.as_f64() {
                return Err(invalid(
                    &dict.id,
                    field,
                    format!("{} {} is less than minimum {}", what, measured, min),
                ));
            }
        }
        if let Some(max) = field.max_size {
            if measured > max.as_f64() {
                return Err(invalid(
                    &dict.id,
                    field,
                    format!("{} {} is greater than maximum {}", what, measured, max),
                ));
            }
        }
    }

    if field.field_type == FieldType::Enum {
        let enum_id = field.enum_id.as_deref().unwrap_or_default();
        let dict_enum = dict.get_enum(enum_id).ok_or_else(|| DictError::EnumNotFound {
            dict: dict.id.clone(),
            enum_id: enum_id.to_string(),
        })?;
        let text = value.as_str().unwrap_or_default();
        if !dict_enum.contains(text) {
            return Err(invalid(
                &dict.id,
                field,
                format!("'{}' is not a value of enum '{}'", text, dict_enum.id),
            ));
        }
    }
    Ok(())
}

/// Casts a query constant to the normalized form of the field's declared type.
///
/// The constant is compared against single elements for multi-valued fields,
/// so the scalar type is used. `null` stays `null`.
pub fn cast_constant(
    dict_id: &str,
    field: &DictField,
    constant: &Constant,
) -> Result<Value, DictError> {
    let raw = match constant {
        Constant::Null => return Ok(Value::Null),
        Constant::String(s) => Value::String(s.clone()),
        Constant::Integer(i) => Value::from(*i),
        Constant::Decimal(d) => Value::from(*d),
        Constant::Boolean(b) => Value::Bool(*b),
        Constant::Date(date) => match field.field_type {
            FieldType::Timestamp => date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Value::String(format_timestamp(&naive.and_utc())))
                .unwrap_or(Value::Null),
            _ => Value::String(date.format(DATE_FORMAT).to_string()),
        },
        Constant::Timestamp(ts) => match field.field_type {
            FieldType::Date => Value::String(ts.date_naive().format(DATE_FORMAT).to_string()),
            _ => Value::String(format_timestamp(ts)),
        },
    };
    let scalar = DictField {
        multivalued: false,
        ..field.clone()
    };
    match field.field_type {
        // JSON constants compare as their literal form
        FieldType::Json | FieldType::GeoJson => Ok(raw),
        _ => coerce_scalar(dict_id, &scalar, &raw),
    }
}

fn invalid(dict_id: &str, field: &DictField, message: String) -> DictError {
    DictError::ValueValidation {
        dict: dict_id.to_string(),
        field: field.id.clone(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DictEnum, FieldSize};
    use ntest::timeout;
    use serde_json::json;

    fn dict() -> Dict {
        Dict::new("d", "sql")
            .with_enum(DictEnum::new("colors", vec!["red".into(), "green".into()]))
            .with_field(DictField::new("color", FieldType::Enum).with_enum("colors"))
    }

    #[timeout(1000)]
    #[test]
    fn test_integer_widens_to_decimal() {
        let field = DictField::new("price", FieldType::Decimal);
        assert_eq!(coerce_value("d", &field, &json!(3)).unwrap(), json!(3.0));
    }

    #[timeout(1000)]
    #[test]
    fn test_integral_float_narrows_to_integer() {
        let field = DictField::new("count", FieldType::Integer);
        assert_eq!(coerce_value("d", &field, &json!(4.0)).unwrap(), json!(4));
        assert!(coerce_value("d", &field, &json!(4.5)).is_err());
        assert!(coerce_value("d", &field, &json!("4")).is_err());
    }

    #[timeout(1000)]
    #[test]
    fn test_timestamp_is_normalized_to_utc() {
        let field = DictField::new("at", FieldType::Timestamp);
        let value = coerce_value("d", &field, &json!("2020-01-01T03:00:00+03:00")).unwrap();
        assert_eq!(value, json!("2020-01-01T00:00:00.000000Z"));

        let midnight = coerce_value("d", &field, &json!("2020-01-02")).unwrap();
        assert_eq!(midnight, json!("2020-01-02T00:00:00.000000Z"));
    }

    #[timeout(1000)]
    #[test]
    fn test_multivalued_wraps_single_value() {
        let field = DictField::new("tags", FieldType::String).multivalued();
        assert_eq!(coerce_value("d", &field, &json!("a")).unwrap(), json!(["a"]));
        assert!(coerce_value("d", &field, &json!(["a", null])).is_err());
    }

    #[timeout(1000)]
    #[test]
    fn test_string_length_bounds() {
        let dict = Dict::new("d", "sql");
        let field = DictField::new("code", FieldType::String)
            .with_min_size(FieldSize::Integer(2))
            .with_max_size(FieldSize::Integer(3));
        assert!(check_constraints(&dict, &field, &json!("ab")).is_ok());
        assert!(check_constraints(&dict, &field, &json!("a")).is_err());
        assert!(check_constraints(&dict, &field, &json!("abcd")).is_err());
    }

    #[timeout(1000)]
    #[test]
    fn test_enum_membership() {
        let dict = dict();
        let field = dict.field("color").unwrap().clone();
        assert!(check_constraints(&dict, &field, &json!("red")).is_ok());
        let err = check_constraints(&dict, &field, &json!("blue")).unwrap_err();
        assert!(matches!(err, DictError::ValueValidation { .. }));
    }

    #[timeout(1000)]
    #[test]
    fn test_cast_uses_declared_type() {
        let decimal = DictField::new("price", FieldType::Decimal);
        assert_eq!(
            cast_constant("d", &decimal, &Constant::Integer(10)).unwrap(),
            json!(10.0)
        );

        let date = DictField::new("day", FieldType::Date);
        assert_eq!(
            cast_constant("d", &date, &Constant::String("2020-01-01".into())).unwrap(),
            json!("2020-01-01")
        );
        assert!(cast_constant("d", &date, &Constant::Integer(1)).is_err());

        let text = DictField::new("name", FieldType::String);
        assert!(cast_constant("d", &text, &Constant::Integer(1)).is_err());
    }
}
