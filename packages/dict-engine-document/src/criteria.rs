//! Criteria trees evaluated against stored documents.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use dict_engine_core::error::{DictError, Result};
use dict_engine_core::query::CompareOperator;
use dict_engine_core::mapping::format_timestamp;
use dict_engine_core::schema::{
    DictItem, CREATED_FIELD, DELETED_FIELD, DELETION_REASON_FIELD, ID_FIELD, UPDATED_FIELD,
    VERSION_FIELD,
};
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::compare::{compare, equals};

/// Location of a value: a root field or a field of a looked-up document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    /// Looked-up dictionary (`None` = root document)
    pub lookup: Option<String>,
    pub field: String,
    /// Array-valued field
    pub multivalued: bool,
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lookup {
            Some(dict) => write!(f, "{}.{}", dict, self.field),
            None => write!(f, "{}", self.field),
        }
    }
}

/// `like` pattern compiled to an anchored regular expression.
#[derive(Debug, Clone)]
pub struct LikePattern {
    source: String,
    regex: Regex,
}

impl LikePattern {
    /// Compiles a pattern where `%` matches any run and `_` one character.
    pub fn new(pattern: &str, case_insensitive: bool) -> Result<Self> {
        let mut expression = String::with_capacity(pattern.len() + 8);
        expression.push('^');
        let mut literal = [0u8; 4];
        for ch in pattern.chars() {
            match ch {
                '%' => expression.push_str(".*"),
                '_' => expression.push('.'),
                other => expression.push_str(&regex::escape(other.encode_utf8(&mut literal))),
            }
        }
        expression.push('$');
        let regex = RegexBuilder::new(&expression)
            .case_insensitive(case_insensitive)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| DictError::QuerySyntax {
                position: 0,
                message: format!("invalid pattern '{}': {}", pattern, e),
            })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for LikePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.regex.as_str() == other.regex.as_str()
    }
}

/// Array operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayMode {
    /// Every listed value is an element
    ContainsAll,
    /// At least one listed value is an element
    ContainsAny,
}

/// Document filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// Matches every document
    All,
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    /// Field is absent or null
    IsNull(FieldPath),
    /// Field is present and not null
    NotNull(FieldPath),
    /// Comparison with a non-null value; for arrays, any element matches
    Compare {
        path: FieldPath,
        operator: CompareOperator,
        value: Value,
    },
    /// Array has no element equal to the value
    NoElementEquals { path: FieldPath, value: Value },
    /// Membership; `or_null` also matches absent values
    In {
        path: FieldPath,
        values: Vec<Value>,
        or_null: bool,
    },
    Pattern { path: FieldPath, pattern: LikePattern },
    Array {
        path: FieldPath,
        mode: ArrayMode,
        values: Vec<Value>,
    },
}

/// A root document with the documents its lookups resolved to.
pub struct DocumentView<'a> {
    pub root: &'a DictItem,
    pub lookups: HashMap<&'a str, &'a DictItem>,
}

impl<'a> DocumentView<'a> {
    pub fn root(root: &'a DictItem) -> Self {
        Self {
            root,
            lookups: HashMap::new(),
        }
    }

    /// Non-null value at `path`. Service fields are read from the item itself.
    pub fn value(&self, path: &FieldPath) -> Option<Cow<'a, Value>> {
        let document: &'a DictItem = match &path.lookup {
            None => self.root,
            Some(dict) => self.lookups.get(dict.as_str())?,
        };
        let service = match path.field.as_str() {
            ID_FIELD => Value::String(document.id.clone()),
            VERSION_FIELD => Value::from(document.version),
            CREATED_FIELD => Value::String(format_timestamp(&document.created)),
            UPDATED_FIELD => Value::String(format_timestamp(&document.updated)),
            DELETED_FIELD => Value::String(format_timestamp(document.deleted.as_ref()?)),
            DELETION_REASON_FIELD => Value::String(document.deletion_reason.clone()?),
            _ => {
                return document
                    .data
                    .get(&path.field)
                    .filter(|v| !v.is_null())
                    .map(Cow::Borrowed)
            }
        };
        Some(Cow::Owned(service))
    }
}

/// Values to test: the elements of an array field, or the single value.
fn candidates<'a>(path: &FieldPath, value: &'a Value) -> &'a [Value] {
    match value {
        Value::Array(elements) if path.multivalued => elements,
        single => std::slice::from_ref(single),
    }
}

fn operator_holds(operator: CompareOperator, actual: &Value, expected: &Value) -> bool {
    use std::cmp::Ordering::*;
    match (operator, compare(actual, expected)) {
        (_, None) => false,
        (CompareOperator::Eq, Some(o)) => o == Equal,
        (CompareOperator::Neq, Some(o)) => o != Equal,
        (CompareOperator::Ls, Some(o)) => o == Less,
        (CompareOperator::Gt, Some(o)) => o == Greater,
        (CompareOperator::Leq, Some(o)) => o != Greater,
        (CompareOperator::Geq, Some(o)) => o != Less,
    }
}

impl Criteria {
    /// Evaluates the criteria against one document.
    pub fn matches(&self, document: &DocumentView<'_>) -> bool {
        match self {
            Criteria::All => true,
            Criteria::And(parts) => parts.iter().all(|c| c.matches(document)),
            Criteria::Or(parts) => parts.iter().any(|c| c.matches(document)),
            Criteria::IsNull(path) => document.value(path).is_none(),
            Criteria::NotNull(path) => document.value(path).is_some(),
            Criteria::Compare {
                path,
                operator,
                value,
            } => document.value(path).is_some_and(|actual| {
                candidates(path, &actual)
                    .iter()
                    .any(|element| operator_holds(*operator, element, value))
            }),
            Criteria::NoElementEquals { path, value } => document
                .value(path)
                .map_or(true, |actual| {
                    !candidates(path, &actual).iter().any(|e| equals(e, value))
                }),
            Criteria::In {
                path,
                values,
                or_null,
            } => match document.value(path) {
                None => *or_null,
                Some(actual) => candidates(path, &actual)
                    .iter()
                    .any(|element| values.iter().any(|v| equals(element, v))),
            },
            Criteria::Pattern { path, pattern } => document.value(path).is_some_and(|actual| {
                candidates(path, &actual)
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|text| pattern.is_match(text))
            }),
            Criteria::Array { path, mode, values } => {
                let actual = document.value(path);
                let elements = actual
                    .as_deref()
                    .map(|actual| candidates(path, actual))
                    .unwrap_or_default();
                let contains = |v: &Value| elements.iter().any(|e| equals(e, v));
                match mode {
                    ArrayMode::ContainsAll => values.iter().all(contains),
                    ArrayMode::ContainsAny => values.iter().any(contains),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dict_engine_core::schema::ItemData;
    use ntest::timeout;
    use serde_json::json;

    fn path(field: &str) -> FieldPath {
        FieldPath {
            lookup: None,
            field: field.to_string(),
            multivalued: field == "tags",
        }
    }

    fn doc(pairs: &[(&str, Value)]) -> DictItem {
        let data: ItemData = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        DictItem::with_id("1", data)
    }

    #[timeout(1000)]
    #[test]
    fn test_like_pattern_escapes_regex() {
        let pattern = LikePattern::new("a.b%", false).unwrap();
        assert!(pattern.is_match("a.bcd"));
        assert!(!pattern.is_match("axbcd"));
        assert!(LikePattern::new("A_C", true).unwrap().is_match("abc"));
        assert!(!LikePattern::new("A_C", false).unwrap().is_match("abc"));
    }

    #[timeout(1000)]
    #[test]
    fn test_missing_values_never_compare() {
        let item = doc(&[("amount", json!(5))]);
        let view = DocumentView::root(&item);
        let on = |field: &str, operator| Criteria::Compare {
            path: path(field),
            operator,
            value: json!(1),
        };
        assert!(on("amount", CompareOperator::Gt).matches(&view));
        assert!(!on("other", CompareOperator::Neq).matches(&view));
        assert!(Criteria::IsNull(path("other")).matches(&view));
    }

    #[timeout(1000)]
    #[test]
    fn test_array_criteria() {
        let item = doc(&[("tags", json!(["red", "blue"]))]);
        let view = DocumentView::root(&item);
        let array = |mode, values: Vec<Value>| Criteria::Array {
            path: path("tags"),
            mode,
            values,
        };
        assert!(array(ArrayMode::ContainsAll, vec![json!("red"), json!("blue")]).matches(&view));
        assert!(!array(ArrayMode::ContainsAll, vec![json!("red"), json!("green")]).matches(&view));
        assert!(array(ArrayMode::ContainsAny, vec![json!("green"), json!("blue")]).matches(&view));
        assert!(!Criteria::NoElementEquals {
            path: path("tags"),
            value: json!("red"),
        }
        .matches(&view));
    }

    #[timeout(1000)]
    #[test]
    fn test_service_fields_are_readable() {
        let item = doc(&[]);
        let view = DocumentView::root(&item);
        assert_eq!(view.value(&path("id")).as_deref(), Some(&json!("1")));
        assert_eq!(view.value(&path("version")).as_deref(), Some(&json!(1)));
        assert!(view.value(&path("created")).is_some());
        assert!(Criteria::IsNull(path("deleted")).matches(&view));
    }
}
