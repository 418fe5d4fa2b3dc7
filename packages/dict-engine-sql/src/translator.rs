//! Translation of filter expressions into SQLite WHERE fragments.

use dict_engine_core::backend::Translator;
use dict_engine_core::error::{DictError, Result};
use dict_engine_core::mapping::cast_constant;
use dict_engine_core::query::{
    resolve_field, AllOrAnyExpression, ArrayMatch, CompareOperator, Constant, DictResolver,
    FieldRef, InExpression, LikeExpression, LogicExpression, Predicate, QueryExpression,
    QueryVisitor, ResolvedField,
};
use dict_engine_core::schema::{Dict, FieldType};
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::values::{
    column, join_alias, like_to_glob, scalar_to_sql, table_name, LOWER_FUNCTION, ROOT_ALIAS,
};

/// Join of a referenced dictionary through a root DICT field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlJoin {
    /// Referenced dictionary
    pub dict_id: String,
    /// Root DICT field holding the referenced item id
    pub via: String,
}

impl SqlJoin {
    /// Renders the `LEFT JOIN` clause.
    pub fn clause(&self) -> String {
        let alias = join_alias(&self.dict_id);
        format!(
            "LEFT JOIN {} AS {} ON {} = {}",
            table_name(&self.dict_id),
            alias,
            column(&alias, "id"),
            column(ROOT_ALIAS, &self.via)
        )
    }
}

/// Translated filter: WHERE fragment, positional parameters and joins.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub where_clause: String,
    pub params: Vec<SqlValue>,
    pub joins: Vec<SqlJoin>,
}

/// Translator for the SQLite backend.
#[derive(Debug, Clone)]
pub struct SqlTranslator {
    engine: String,
}

impl SqlTranslator {
    /// Creates a translator for dictionaries owned by `engine`.
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
        }
    }

    /// Resolves a field to its column expression, registering a join if needed.
    ///
    /// Joins are only possible with dictionaries of the same engine and
    /// through single-valued DICT fields.
    pub(crate) fn column_for(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        field: &FieldRef,
        joins: &mut Vec<SqlJoin>,
    ) -> Result<(String, ResolvedField)> {
        let resolved = resolve_field(dict, resolver, field)?;
        let Some(via) = resolved.via.clone() else {
            return Ok((column(ROOT_ALIAS, &resolved.field.id), resolved));
        };
        if resolved.engine != self.engine {
            return Err(DictError::UnsupportedOperator {
                engine: self.engine.clone(),
                operator: format!(
                    "join with dict '{}' of engine '{}'",
                    resolved.dict_id, resolved.engine
                ),
            });
        }
        if dict.field(&via).is_some_and(|f| f.multivalued) {
            return Err(DictError::UnsupportedOperator {
                engine: self.engine.clone(),
                operator: format!("join through multi-valued field '{}'", via),
            });
        }
        if !joins.iter().any(|j| j.dict_id == resolved.dict_id) {
            joins.push(SqlJoin {
                dict_id: resolved.dict_id.clone(),
                via,
            });
        }
        let expr = column(&join_alias(&resolved.dict_id), &resolved.field.id);
        Ok((expr, resolved))
    }
}

impl Translator for SqlTranslator {
    type Query = SqlQuery;

    fn process(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        expression: &QueryExpression,
    ) -> Result<SqlQuery> {
        let mut visitor = SqlVisitor {
            translator: self,
            dict,
            resolver,
            params: Vec::new(),
            joins: Vec::new(),
        };
        let where_clause = expression.accept(&mut visitor)?;
        Ok(SqlQuery {
            where_clause,
            params: visitor.params,
            joins: visitor.joins,
        })
    }
}

struct SqlVisitor<'a> {
    translator: &'a SqlTranslator,
    dict: &'a Dict,
    resolver: &'a dyn DictResolver,
    params: Vec<SqlValue>,
    joins: Vec<SqlJoin>,
}

impl SqlVisitor<'_> {
    fn column(&mut self, field: &FieldRef) -> Result<(String, ResolvedField)> {
        self.translator
            .column_for(self.dict, self.resolver, field, &mut self.joins)
    }

    fn cast(&self, resolved: &ResolvedField, constant: &Constant) -> Result<Value> {
        cast_constant(&resolved.dict_id, &resolved.field, constant)
    }

    fn bind(&mut self, resolved: &ResolvedField, value: &Value) -> &'static str {
        self.params.push(scalar_to_sql(resolved.field.field_type, value));
        "?"
    }

    fn unsupported(&self, operator: String) -> DictError {
        DictError::UnsupportedOperator {
            engine: self.translator.engine.clone(),
            operator,
        }
    }

    /// Binds a list of cast constants, dropping duplicates and nulls.
    ///
    /// Returns the placeholders and whether a null was present.
    fn bind_list(
        &mut self,
        resolved: &ResolvedField,
        values: &[Constant],
    ) -> Result<(String, usize, bool)> {
        let mut distinct: Vec<Value> = Vec::new();
        let mut has_null = false;
        for constant in values {
            let value = self.cast(resolved, constant)?;
            if value.is_null() {
                has_null = true;
            } else if !distinct.contains(&value) {
                distinct.push(value);
            }
        }
        let placeholders: Vec<&str> = distinct.iter().map(|v| self.bind(resolved, v)).collect();
        Ok((placeholders.join(", "), distinct.len(), has_null))
    }

    fn check_pattern_type(&self, resolved: &ResolvedField, operator: &str) -> Result<()> {
        match resolved.field.field_type {
            FieldType::String
            | FieldType::Enum
            | FieldType::Dict
            | FieldType::Attachment
            | FieldType::Date
            | FieldType::Timestamp => Ok(()),
            other => Err(self.unsupported(format!(
                "{} on {} field '{}'",
                operator, other, resolved.field.id
            ))),
        }
    }
}

/// Wraps an element condition over a JSON array column.
fn any_element(column: &str, condition: &str) -> String {
    format!("EXISTS (SELECT 1 FROM json_each({}) WHERE {})", column, condition)
}

impl QueryVisitor for SqlVisitor<'_> {
    type Output = String;

    fn visit_empty(&mut self) -> Result<String> {
        Ok("1 = 1".to_string())
    }

    fn visit_predicate(&mut self, predicate: &Predicate) -> Result<String> {
        let (column, resolved) = self.column(&predicate.field)?;
        let value = self.cast(&resolved, &predicate.value)?;

        if value.is_null() {
            return match predicate.operator {
                CompareOperator::Eq => Ok(format!("{} IS NULL", column)),
                CompareOperator::Neq => Ok(format!("{} IS NOT NULL", column)),
                other => Err(self.unsupported(format!("{} null", other.symbol()))),
            };
        }

        let placeholder = self.bind(&resolved, &value);
        if resolved.field.multivalued {
            return Ok(match predicate.operator {
                CompareOperator::Neq => {
                    format!("NOT {}", any_element(&column, &format!("value = {}", placeholder)))
                }
                other => any_element(&column, &format!("value {} {}", other.symbol(), placeholder)),
            });
        }
        Ok(format!("{} {} {}", column, predicate.operator.symbol(), placeholder))
    }

    fn visit_logic(&mut self, logic: &LogicExpression) -> Result<String> {
        match logic {
            LogicExpression::And(left, right) => {
                let left = left.accept(self)?;
                let right = right.accept(self)?;
                Ok(format!("({} AND {})", left, right))
            }
            LogicExpression::Or(left, right) => {
                let left = left.accept(self)?;
                let right = right.accept(self)?;
                Ok(format!("({} OR {})", left, right))
            }
            LogicExpression::Not(inner) => Ok(format!("NOT ({})", inner.accept(self)?)),
        }
    }

    fn visit_like(&mut self, like: &LikeExpression) -> Result<String> {
        let (column, resolved) = self.column(&like.field)?;
        self.check_pattern_type(&resolved, "like")?;
        self.params.push(SqlValue::Text(like_to_glob(&like.pattern)));
        if resolved.field.multivalued {
            return Ok(any_element(&column, "value GLOB ?"));
        }
        Ok(format!("{} GLOB ?", column))
    }

    fn visit_ilike(&mut self, ilike: &LikeExpression) -> Result<String> {
        let (column, resolved) = self.column(&ilike.field)?;
        self.check_pattern_type(&resolved, "ilike")?;
        self.params
            .push(SqlValue::Text(like_to_glob(&ilike.pattern.to_lowercase())));
        if resolved.field.multivalued {
            return Ok(any_element(
                &column,
                &format!("{}(value) GLOB ?", LOWER_FUNCTION),
            ));
        }
        Ok(format!("{}({}) GLOB ?", LOWER_FUNCTION, column))
    }

    fn visit_in(&mut self, in_expr: &InExpression) -> Result<String> {
        let (column, resolved) = self.column(&in_expr.field)?;
        let (placeholders, count, has_null) = self.bind_list(&resolved, &in_expr.values)?;

        if resolved.field.multivalued {
            if has_null {
                return Err(self.unsupported("null in array membership".to_string()));
            }
            return Ok(any_element(&column, &format!("value IN ({})", placeholders)));
        }
        Ok(match (count, has_null) {
            (0, _) => format!("{} IS NULL", column),
            (_, true) => format!("({} IN ({}) OR {} IS NULL)", column, placeholders, column),
            (_, false) => format!("{} IN ({})", column, placeholders),
        })
    }

    fn visit_all_or_any(&mut self, expr: &AllOrAnyExpression) -> Result<String> {
        let (column, resolved) = self.column(&expr.field)?;
        let keyword = match expr.mode {
            ArrayMatch::All => "all",
            ArrayMatch::Any => "any",
        };
        if !resolved.field.multivalued {
            return Err(self.unsupported(format!(
                "{} on single-valued field '{}'",
                keyword, resolved.field.id
            )));
        }
        let (placeholders, count, has_null) = self.bind_list(&resolved, &expr.values)?;
        if has_null {
            return Err(self.unsupported(format!("null in {}", keyword)));
        }
        Ok(match expr.mode {
            ArrayMatch::Any => any_element(&column, &format!("value IN ({})", placeholders)),
            ArrayMatch::All => format!(
                "(SELECT COUNT(DISTINCT value) FROM json_each({}) WHERE value IN ({})) = {}",
                column, placeholders, count
            ),
        })
    }
}

/// Renders `FROM <table> AS t <joins>`.
pub(crate) fn from_clause(dict: &Dict, joins: &[SqlJoin]) -> String {
    let mut from = format!("FROM {} AS {}", table_name(&dict.id), ROOT_ALIAS);
    for join in joins {
        from.push(' ');
        from.push_str(&join.clause());
    }
    from
}

#[cfg(test)]
mod tests {
    use super::*;
    use dict_engine_core::query::{parse, StaticResolver};
    use dict_engine_core::schema::DictField;
    use ntest::timeout;
    use std::sync::Arc;

    fn dicts() -> (Dict, StaticResolver) {
        let customers = Dict::new("customers", "sql")
            .with_field(DictField::new("name", FieldType::String));
        let orders = Dict::new("orders", "sql")
            .with_field(DictField::new("title", FieldType::String))
            .with_field(DictField::new("amount", FieldType::Decimal))
            .with_field(DictField::new("tags", FieldType::String).multivalued())
            .with_field(
                DictField::new("customer", FieldType::Dict).with_dict_ref("customers", "name"),
            );
        let resolver = StaticResolver::new(vec![Arc::new(customers), Arc::new(orders.clone())]);
        (orders, resolver)
    }

    fn translate(query: &str) -> Result<SqlQuery> {
        let (orders, resolver) = dicts();
        SqlTranslator::new("sql").process(&orders, &resolver, &parse(query)?)
    }

    #[timeout(1000)]
    #[test]
    fn test_translation_is_repeatable() {
        let (orders, resolver) = dicts();
        let translator = SqlTranslator::new("sql");
        let expression = parse(
            "customers.name ilike 'a%' and (amount >= 10 or tags all ('x', 'y', 'x')) \
             and title in ('a', null) and not (customers.name = 'b')",
        )
        .unwrap();

        let first = translator.process(&orders, &resolver, &expression).unwrap();
        let second = translator.process(&orders, &resolver, &expression).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.joins,
            vec![SqlJoin {
                dict_id: "customers".into(),
                via: "customer".into(),
            }]
        );
        assert_eq!(
            first.where_clause.matches('?').count(),
            first.params.len()
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_ilike_folds_both_sides() {
        let query = translate("title ilike 'ÄP_%'").unwrap();
        assert_eq!(query.where_clause, "unicode_lower(t.\"title\") GLOB ?");
        assert_eq!(query.params, vec![SqlValue::Text("äp?*".into())]);

        let query = translate("tags ilike 'X*'").unwrap();
        assert_eq!(
            query.where_clause,
            "EXISTS (SELECT 1 FROM json_each(t.\"tags\") WHERE unicode_lower(value) GLOB ?)"
        );
        assert_eq!(query.params, vec![SqlValue::Text("x[*]".into())]);
    }

    #[timeout(1000)]
    #[test]
    fn test_null_comparisons() {
        assert_eq!(translate("amount = null").unwrap().where_clause, "t.\"amount\" IS NULL");
        assert_eq!(
            translate("title in (null)").unwrap().where_clause,
            "t.\"title\" IS NULL"
        );
        assert!(matches!(
            translate("amount > null").unwrap_err(),
            DictError::UnsupportedOperator { .. }
        ));
        assert!(matches!(
            translate("tags in ('a', null)").unwrap_err(),
            DictError::UnsupportedOperator { .. }
        ));
    }
}
