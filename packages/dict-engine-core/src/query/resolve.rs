//! Field resolution against the root dictionary and the dictionaries it references.

use std::sync::Arc;

use crate::error::DictError;
use crate::schema::{Dict, DictField};

use super::ast::FieldRef;

/// Looks up dictionaries referenced by a query.
pub trait DictResolver {
    /// Returns the active dictionary with the given id, or `DictNotFound`.
    fn resolve_dict(&self, dict_id: &str) -> Result<Arc<Dict>, DictError>;
}

/// A field reference resolved to its definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    /// Root DICT field the reference is joined through (`None` = root field)
    pub via: Option<String>,
    /// Dictionary owning the field
    pub dict_id: String,
    /// Engine owning that dictionary
    pub engine: String,
    pub field: DictField,
}

impl ResolvedField {
    pub fn is_joined(&self) -> bool {
        self.via.is_some()
    }
}

/// Resolves a field reference.
///
/// Unqualified names (and names qualified with the root id) resolve on the
/// root dictionary. A qualifier naming another dictionary must be referenced
/// by a DICT field of the root; the field is then resolved on that dictionary.
pub fn resolve_field(
    root: &Dict,
    resolver: &dyn DictResolver,
    field_ref: &FieldRef,
) -> Result<ResolvedField, DictError> {
    match field_ref.dict.as_deref() {
        None => root_field(root, &field_ref.field),
        Some(dict_id) if dict_id == root.id => root_field(root, &field_ref.field),
        Some(dict_id) => {
            let via = root
                .field_referencing(dict_id)
                .ok_or_else(|| DictError::UnreferencedDict {
                    dict: root.id.clone(),
                    referenced: dict_id.to_string(),
                })?;
            let target = resolver.resolve_dict(dict_id)?;
            let field = target.get_field(&field_ref.field)?.clone();
            Ok(ResolvedField {
                via: Some(via.id.clone()),
                dict_id: target.id.clone(),
                engine: target.engine.clone(),
                field,
            })
        }
    }
}

fn root_field(root: &Dict, field_id: &str) -> Result<ResolvedField, DictError> {
    Ok(ResolvedField {
        via: None,
        dict_id: root.id.clone(),
        engine: root.engine.clone(),
        field: root.get_field(field_id)?.clone(),
    })
}

/// Resolver over a fixed set of dictionaries.
pub struct StaticResolver {
    dicts: Vec<Arc<Dict>>,
}

impl StaticResolver {
    pub fn new(dicts: Vec<Arc<Dict>>) -> Self {
        Self { dicts }
    }
}

impl DictResolver for StaticResolver {
    fn resolve_dict(&self, dict_id: &str) -> Result<Arc<Dict>, DictError> {
        self.dicts
            .iter()
            .find(|d| d.id == dict_id && !d.is_deleted())
            .cloned()
            .ok_or_else(|| DictError::DictNotFound {
                dict: dict_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use ntest::timeout;

    fn dicts() -> (Dict, StaticResolver) {
        let customers = Dict::new("customers", "sql")
            .with_field(DictField::new("name", FieldType::String));
        let orders = Dict::new("orders", "sql")
            .with_field(DictField::new("total", FieldType::Decimal))
            .with_field(
                DictField::new("customer", FieldType::Dict).with_dict_ref("customers", "name"),
            );
        let resolver = StaticResolver::new(vec![Arc::new(customers), Arc::new(orders.clone())]);
        (orders, resolver)
    }

    #[timeout(1000)]
    #[test]
    fn test_root_and_joined_fields() {
        let (orders, resolver) = dicts();

        let total = resolve_field(&orders, &resolver, &FieldRef::new("total")).unwrap();
        assert!(!total.is_joined());
        assert_eq!(total.field.field_type, FieldType::Decimal);

        let name =
            resolve_field(&orders, &resolver, &FieldRef::qualified("customers", "name")).unwrap();
        assert_eq!(name.via.as_deref(), Some("customer"));
        assert_eq!(name.dict_id, "customers");
    }

    #[timeout(1000)]
    #[test]
    fn test_resolution_errors() {
        let (orders, resolver) = dicts();

        assert!(matches!(
            resolve_field(&orders, &resolver, &FieldRef::new("missing")),
            Err(DictError::FieldNotFound { .. })
        ));
        assert!(matches!(
            resolve_field(&orders, &resolver, &FieldRef::qualified("products", "name")),
            Err(DictError::UnreferencedDict { .. })
        ));
        assert!(matches!(
            resolve_field(&orders, &resolver, &FieldRef::qualified("customers", "age")),
            Err(DictError::FieldNotFound { .. })
        ));
    }
}
