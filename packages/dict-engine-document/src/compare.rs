//! Ordering and equality of normalized field values.
//!
//! Values are ordered by class first, then within the class:
//! null, numbers and booleans (booleans as 0 and 1), strings, then
//! anything else by its JSON text.

use std::cmp::Ordering;

use serde_json::Value;

fn class(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) | Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) | Value::Object(_) => 3,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Total order used for sorting and distinct values.
pub(crate) fn sort_cmp(a: &Value, b: &Value) -> Ordering {
    class(a).cmp(&class(b)).then_with(|| match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    })
}

/// Compares two non-null values of the same class.
///
/// Returns `None` when either side is null or the classes differ, in which
/// case no comparison operator matches.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() || class(a) != class(b) {
        return None;
    }
    Some(sort_cmp(a, b))
}

/// Equality under [`compare`], so `10` equals `10.0`.
pub(crate) fn equals(a: &Value, b: &Value) -> bool {
    compare(a, b) == Some(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;
    use serde_json::json;

    #[timeout(1000)]
    #[test]
    fn test_numbers_compare_across_representations() {
        assert!(equals(&json!(10), &json!(10.0)));
        assert_eq!(compare(&json!(2), &json!(10.5)), Some(Ordering::Less));
        assert_eq!(compare(&json!(true), &json!(1)), Some(Ordering::Equal));
    }

    #[timeout(1000)]
    #[test]
    fn test_null_and_mixed_classes_never_compare() {
        assert_eq!(compare(&Value::Null, &Value::Null), None);
        assert_eq!(compare(&json!("1"), &json!(1)), None);
    }

    #[timeout(1000)]
    #[test]
    fn test_sort_order_by_class() {
        let mut values = vec![json!("b"), json!(3), Value::Null, json!("a"), json!([1])];
        values.sort_by(sort_cmp);
        assert_eq!(values, vec![Value::Null, json!(3), json!("a"), json!("b"), json!([1])]);
    }
}
