//! Translation of filter expressions into document criteria.

use dict_engine_core::backend::Translator;
use dict_engine_core::error::{DictError, Result};
use dict_engine_core::mapping::cast_constant;
use dict_engine_core::query::{
    resolve_field, AllOrAnyExpression, ArrayMatch, CompareOperator, Constant, DictResolver,
    FieldRef, InExpression, LikeExpression, LogicExpression, Predicate, QueryExpression,
    QueryVisitor, ResolvedField,
};
use dict_engine_core::schema::{Dict, FieldType};
use serde_json::Value;

use crate::compare::equals;
use crate::criteria::{ArrayMode, Criteria, FieldPath, LikePattern};

/// Referenced document fetched through a root DICT field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub dict_id: String,
    /// Root DICT field holding the referenced item id
    pub via: String,
}

/// Translated filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    pub criteria: Criteria,
    pub lookups: Vec<Lookup>,
}

/// Translator for the document backend.
///
/// `not` has no criteria counterpart and is rejected.
#[derive(Debug, Clone)]
pub struct DocumentTranslator {
    engine: String,
}

impl DocumentTranslator {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
        }
    }

    fn unsupported(&self, operator: String) -> DictError {
        DictError::UnsupportedOperator {
            engine: self.engine.clone(),
            operator,
        }
    }

    /// Resolves a field to its document path, registering a lookup if needed.
    pub(crate) fn path_for(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        field: &FieldRef,
        lookups: &mut Vec<Lookup>,
    ) -> Result<(FieldPath, ResolvedField)> {
        let resolved = resolve_field(dict, resolver, field)?;
        let path = FieldPath {
            lookup: resolved.via.as_ref().map(|_| resolved.dict_id.clone()),
            field: resolved.field.id.clone(),
            multivalued: resolved.field.multivalued,
        };
        let Some(via) = resolved.via.clone() else {
            return Ok((path, resolved));
        };
        if resolved.engine != self.engine {
            return Err(self.unsupported(format!(
                "lookup in dict '{}' of engine '{}'",
                resolved.dict_id, resolved.engine
            )));
        }
        if dict.field(&via).is_some_and(|f| f.multivalued) {
            return Err(self.unsupported(format!("lookup through multi-valued field '{}'", via)));
        }
        if !lookups.iter().any(|l| l.dict_id == resolved.dict_id) {
            lookups.push(Lookup {
                dict_id: resolved.dict_id.clone(),
                via,
            });
        }
        Ok((path, resolved))
    }
}

impl Translator for DocumentTranslator {
    type Query = DocumentQuery;

    fn process(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        expression: &QueryExpression,
    ) -> Result<DocumentQuery> {
        let mut visitor = CriteriaVisitor {
            translator: self,
            dict,
            resolver,
            lookups: Vec::new(),
        };
        let criteria = expression.accept(&mut visitor)?;
        Ok(DocumentQuery {
            criteria,
            lookups: visitor.lookups,
        })
    }
}

struct CriteriaVisitor<'a> {
    translator: &'a DocumentTranslator,
    dict: &'a Dict,
    resolver: &'a dyn DictResolver,
    lookups: Vec<Lookup>,
}

impl CriteriaVisitor<'_> {
    fn path(&mut self, field: &FieldRef) -> Result<(FieldPath, ResolvedField)> {
        self.translator
            .path_for(self.dict, self.resolver, field, &mut self.lookups)
    }

    /// Casts a list, dropping duplicates; returns whether a null was present.
    fn cast_list(
        &self,
        resolved: &ResolvedField,
        constants: &[Constant],
    ) -> Result<(Vec<Value>, bool)> {
        let mut values: Vec<Value> = Vec::new();
        let mut has_null = false;
        for constant in constants {
            let value = cast_constant(&resolved.dict_id, &resolved.field, constant)?;
            if value.is_null() {
                has_null = true;
            } else if !values.iter().any(|v| equals(v, &value)) {
                values.push(value);
            }
        }
        Ok((values, has_null))
    }

    fn pattern(&mut self, like: &LikeExpression, case_insensitive: bool) -> Result<Criteria> {
        let (path, resolved) = self.path(&like.field)?;
        let operator = if case_insensitive { "ilike" } else { "like" };
        match resolved.field.field_type {
            FieldType::String
            | FieldType::Enum
            | FieldType::Dict
            | FieldType::Attachment
            | FieldType::Date
            | FieldType::Timestamp => {}
            other => {
                return Err(self.translator.unsupported(format!(
                    "{} on {} field '{}'",
                    operator, other, resolved.field.id
                )))
            }
        }
        Ok(Criteria::Pattern {
            path,
            pattern: LikePattern::new(&like.pattern, case_insensitive)?,
        })
    }
}

impl QueryVisitor for CriteriaVisitor<'_> {
    type Output = Criteria;

    fn visit_empty(&mut self) -> Result<Criteria> {
        Ok(Criteria::All)
    }

    fn visit_predicate(&mut self, predicate: &Predicate) -> Result<Criteria> {
        let (path, resolved) = self.path(&predicate.field)?;
        let value = cast_constant(&resolved.dict_id, &resolved.field, &predicate.value)?;

        if value.is_null() {
            return match predicate.operator {
                CompareOperator::Eq => Ok(Criteria::IsNull(path)),
                CompareOperator::Neq => Ok(Criteria::NotNull(path)),
                other => Err(self
                    .translator
                    .unsupported(format!("{} null", other.symbol()))),
            };
        }
        if path.multivalued && predicate.operator == CompareOperator::Neq {
            return Ok(Criteria::NoElementEquals { path, value });
        }
        Ok(Criteria::Compare {
            path,
            operator: predicate.operator,
            value,
        })
    }

    fn visit_logic(&mut self, logic: &LogicExpression) -> Result<Criteria> {
        match logic {
            LogicExpression::And(left, right) => {
                Ok(Criteria::And(vec![left.accept(self)?, right.accept(self)?]))
            }
            LogicExpression::Or(left, right) => {
                Ok(Criteria::Or(vec![left.accept(self)?, right.accept(self)?]))
            }
            LogicExpression::Not(_) => Err(self.translator.unsupported("not".to_string())),
        }
    }

    fn visit_like(&mut self, like: &LikeExpression) -> Result<Criteria> {
        self.pattern(like, false)
    }

    fn visit_ilike(&mut self, ilike: &LikeExpression) -> Result<Criteria> {
        self.pattern(ilike, true)
    }

    fn visit_in(&mut self, in_expr: &InExpression) -> Result<Criteria> {
        let (path, resolved) = self.path(&in_expr.field)?;
        let (values, has_null) = self.cast_list(&resolved, &in_expr.values)?;
        if path.multivalued && has_null {
            return Err(self
                .translator
                .unsupported("null in array membership".to_string()));
        }
        Ok(Criteria::In {
            path,
            values,
            or_null: has_null,
        })
    }

    fn visit_all_or_any(&mut self, expr: &AllOrAnyExpression) -> Result<Criteria> {
        let (path, resolved) = self.path(&expr.field)?;
        let (keyword, mode) = match expr.mode {
            ArrayMatch::All => ("all", ArrayMode::ContainsAll),
            ArrayMatch::Any => ("any", ArrayMode::ContainsAny),
        };
        if !path.multivalued {
            return Err(self.translator.unsupported(format!(
                "{} on single-valued field '{}'",
                keyword, resolved.field.id
            )));
        }
        let (values, has_null) = self.cast_list(&resolved, &expr.values)?;
        if has_null {
            return Err(self.translator.unsupported(format!("null in {}", keyword)));
        }
        Ok(Criteria::Array { path, mode, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dict_engine_core::query::{parse, StaticResolver};
    use dict_engine_core::schema::DictField;
    use ntest::timeout;
    use serde_json::json;
    use std::sync::Arc;

    fn dicts() -> (Dict, StaticResolver) {
        let customers = Dict::new("customers", "document")
            .with_field(DictField::new("name", FieldType::String));
        let orders = Dict::new("orders", "document")
            .with_field(DictField::new("title", FieldType::String))
            .with_field(DictField::new("amount", FieldType::Decimal))
            .with_field(DictField::new("tags", FieldType::String).multivalued())
            .with_field(DictField::new("customer", FieldType::Dict).with_dict_ref("customers", "name"));
        let resolver = StaticResolver::new(vec![Arc::new(customers), Arc::new(orders.clone())]);
        (orders, resolver)
    }

    fn translate(query: &str) -> Result<DocumentQuery> {
        let (orders, resolver) = dicts();
        DocumentTranslator::new("document").process(&orders, &resolver, &parse(query)?)
    }

    #[timeout(1000)]
    #[test]
    fn test_not_is_rejected() {
        let err = translate("not (title = 'a')").unwrap_err();
        assert!(matches!(err, DictError::UnsupportedOperator { ref operator, .. } if operator == "not"));
        assert!(matches!(
            translate("title not like 'a%'").unwrap_err(),
            DictError::UnsupportedOperator { .. }
        ));
    }

    #[timeout(1000)]
    #[test]
    fn test_constants_are_cast_by_field_type() {
        let query = translate("amount > 10").unwrap();
        let Criteria::Compare { value, .. } = query.criteria else {
            panic!("expected comparison");
        };
        assert_eq!(value, json!(10.0));
        assert!(translate("amount > 'ten'").is_err());
    }

    #[timeout(1000)]
    #[test]
    fn test_lookup_registered_once() {
        let query = translate("customers.name = 'a' or customers.name = 'b'").unwrap();
        assert_eq!(
            query.lookups,
            vec![Lookup {
                dict_id: "customers".into(),
                via: "customer".into(),
            }]
        );
    }

    #[timeout(1000)]
    #[test]
    fn test_translation_is_deterministic() {
        let text = "title in ('a', 'a', null) and tags all ('x', 'y')";
        assert_eq!(translate(text).unwrap(), translate(text).unwrap());
        let query = translate(text).unwrap();
        let Criteria::And(parts) = query.criteria else {
            panic!("expected conjunction");
        };
        assert_eq!(
            parts[0],
            Criteria::In {
                path: FieldPath {
                    lookup: None,
                    field: "title".into(),
                    multivalued: false,
                },
                values: vec![json!("a")],
                or_null: true,
            }
        );
    }
}
