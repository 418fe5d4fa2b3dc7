//! Backend-neutral filter expression tree.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::error::DictError;
use crate::mapping::format_timestamp;

/// Typed literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    String(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Null,
}

impl Constant {
    pub fn is_null(&self) -> bool {
        matches!(self, Constant::Null)
    }

    /// Converts the literal to its wire value.
    pub fn to_value(&self) -> Value {
        match self {
            Constant::String(s) => Value::String(s.clone()),
            Constant::Integer(n) => Value::from(*n),
            Constant::Decimal(n) => Value::from(*n),
            Constant::Boolean(b) => Value::Bool(*b),
            Constant::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Constant::Timestamp(ts) => Value::String(format_timestamp(ts)),
            Constant::Null => Value::Null,
        }
    }

    /// Returns the literal as a string for pattern operators.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Constant::Integer(n) => write!(f, "{}", n),
            Constant::Decimal(n) if n.is_finite() && n.fract() == 0.0 => write!(f, "{}.0", n),
            Constant::Decimal(n) => write!(f, "{}", n),
            Constant::Boolean(b) => write!(f, "{}", b),
            Constant::Date(d) => write!(f, "'{}'::date", d.format("%Y-%m-%d")),
            Constant::Timestamp(ts) => write!(f, "'{}'::timestamp", format_timestamp(ts)),
            Constant::Null => write!(f, "null"),
        }
    }
}

/// Field reference, optionally qualified with a dictionary id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    /// Qualifying dictionary id (`None` = root dictionary)
    pub dict: Option<String>,
    pub field: String,
}

impl FieldRef {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            dict: None,
            field: field.into(),
        }
    }

    pub fn qualified(dict: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            dict: Some(dict.into()),
            field: field.into(),
        }
    }

    /// Parses `field` or `dict.field`.
    pub fn parse_path(path: &str) -> Self {
        match path.split_once('.') {
            Some((dict, field)) => Self::qualified(dict, field),
            None => Self::new(path),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dict {
            Some(dict) => write!(f, "{}.{}", dict, self.field),
            None => write!(f, "{}", self.field),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOperator {
    Eq,
    Neq,
    Ls,
    Gt,
    Leq,
    Geq,
}

impl CompareOperator {
    /// Returns the operator that keeps the comparison true when operands swap.
    pub fn flip(self) -> Self {
        match self {
            CompareOperator::Eq => CompareOperator::Eq,
            CompareOperator::Neq => CompareOperator::Neq,
            CompareOperator::Ls => CompareOperator::Gt,
            CompareOperator::Gt => CompareOperator::Ls,
            CompareOperator::Leq => CompareOperator::Geq,
            CompareOperator::Geq => CompareOperator::Leq,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOperator::Eq => "=",
            CompareOperator::Neq => "!=",
            CompareOperator::Ls => "<",
            CompareOperator::Gt => ">",
            CompareOperator::Leq => "<=",
            CompareOperator::Geq => ">=",
        }
    }
}

/// `field <op> constant`
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: FieldRef,
    pub operator: CompareOperator,
    pub value: Constant,
}

/// Boolean connective.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicExpression {
    And(Box<QueryExpression>, Box<QueryExpression>),
    Or(Box<QueryExpression>, Box<QueryExpression>),
    Not(Box<QueryExpression>),
}

/// `field like 'pattern'` with SQL wildcards `%` and `_`.
#[derive(Debug, Clone, PartialEq)]
pub struct LikeExpression {
    pub field: FieldRef,
    pub pattern: String,
}

/// `field in (constants)`
#[derive(Debug, Clone, PartialEq)]
pub struct InExpression {
    pub field: FieldRef,
    pub values: Vec<Constant>,
}

/// Array containment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayMatch {
    /// Array contains every constant
    All,
    /// Array contains at least one constant
    Any,
}

/// `field all (constants)` / `field any (constants)` over a multi-valued field.
#[derive(Debug, Clone, PartialEq)]
pub struct AllOrAnyExpression {
    pub field: FieldRef,
    pub mode: ArrayMatch,
    pub values: Vec<Constant>,
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryExpression {
    /// No filter
    #[default]
    Empty,
    Predicate(Predicate),
    Logic(LogicExpression),
    Like(LikeExpression),
    Ilike(LikeExpression),
    In(InExpression),
    AllOrAny(AllOrAnyExpression),
}

/// Visitor over [`QueryExpression`] nodes, one method per node kind.
///
/// Translators implement this to produce backend-native queries.
pub trait QueryVisitor {
    type Output;

    fn visit_empty(&mut self) -> Result<Self::Output, DictError>;
    fn visit_predicate(&mut self, predicate: &Predicate) -> Result<Self::Output, DictError>;
    fn visit_logic(&mut self, logic: &LogicExpression) -> Result<Self::Output, DictError>;
    fn visit_like(&mut self, like: &LikeExpression) -> Result<Self::Output, DictError>;
    fn visit_ilike(&mut self, ilike: &LikeExpression) -> Result<Self::Output, DictError>;
    fn visit_in(&mut self, in_expr: &InExpression) -> Result<Self::Output, DictError>;
    fn visit_all_or_any(&mut self, expr: &AllOrAnyExpression) -> Result<Self::Output, DictError>;
}

impl QueryExpression {
    /// Dispatches to the visitor method for this node.
    pub fn accept<V: QueryVisitor>(&self, visitor: &mut V) -> Result<V::Output, DictError> {
        match self {
            QueryExpression::Empty => visitor.visit_empty(),
            QueryExpression::Predicate(p) => visitor.visit_predicate(p),
            QueryExpression::Logic(l) => visitor.visit_logic(l),
            QueryExpression::Like(l) => visitor.visit_like(l),
            QueryExpression::Ilike(l) => visitor.visit_ilike(l),
            QueryExpression::In(i) => visitor.visit_in(i),
            QueryExpression::AllOrAny(a) => visitor.visit_all_or_any(a),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, QueryExpression::Empty)
    }

    pub fn and(left: QueryExpression, right: QueryExpression) -> Self {
        QueryExpression::Logic(LogicExpression::And(Box::new(left), Box::new(right)))
    }

    pub fn or(left: QueryExpression, right: QueryExpression) -> Self {
        QueryExpression::Logic(LogicExpression::Or(Box::new(left), Box::new(right)))
    }

    pub fn not(inner: QueryExpression) -> Self {
        QueryExpression::Logic(LogicExpression::Not(Box::new(inner)))
    }

    /// Collects every field reference in the tree, in source order.
    pub fn field_refs(&self) -> Vec<&FieldRef> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs<'a>(&'a self, refs: &mut Vec<&'a FieldRef>) {
        match self {
            QueryExpression::Empty => {}
            QueryExpression::Predicate(p) => refs.push(&p.field),
            QueryExpression::Like(l) | QueryExpression::Ilike(l) => refs.push(&l.field),
            QueryExpression::In(i) => refs.push(&i.field),
            QueryExpression::AllOrAny(a) => refs.push(&a.field),
            QueryExpression::Logic(LogicExpression::And(l, r))
            | QueryExpression::Logic(LogicExpression::Or(l, r)) => {
                l.collect_refs(refs);
                r.collect_refs(refs);
            }
            QueryExpression::Logic(LogicExpression::Not(inner)) => inner.collect_refs(refs),
        }
    }

    /// Returns the dictionary qualifiers used by field references.
    pub fn referenced_dicts(&self) -> BTreeSet<String> {
        self.field_refs()
            .into_iter()
            .filter_map(|r| r.dict.clone())
            .collect()
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, values: &[Constant]) -> fmt::Result {
    f.write_str("(")?;
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", value)?;
    }
    f.write_str(")")
}

impl fmt::Display for QueryExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryExpression::Empty => Ok(()),
            QueryExpression::Predicate(p) => {
                write!(f, "{} {} {}", p.field, p.operator.symbol(), p.value)
            }
            QueryExpression::Logic(LogicExpression::And(l, r)) => write!(f, "({} and {})", l, r),
            QueryExpression::Logic(LogicExpression::Or(l, r)) => write!(f, "({} or {})", l, r),
            QueryExpression::Logic(LogicExpression::Not(inner)) => write!(f, "not ({})", inner),
            QueryExpression::Like(l) => {
                write!(f, "{} like {}", l.field, Constant::String(l.pattern.clone()))
            }
            QueryExpression::Ilike(l) => {
                write!(f, "{} ilike {}", l.field, Constant::String(l.pattern.clone()))
            }
            QueryExpression::In(i) => {
                write!(f, "{} in ", i.field)?;
                write_list(f, &i.values)
            }
            QueryExpression::AllOrAny(a) => {
                let keyword = match a.mode {
                    ArrayMatch::All => "all",
                    ArrayMatch::Any => "any",
                };
                write!(f, "{} {} ", a.field, keyword)?;
                write_list(f, &a.values)
            }
        }
    }
}
