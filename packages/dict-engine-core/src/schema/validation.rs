//! Validation of dictionary definitions at schema-write time.

use std::collections::HashSet;

use crate::error::DictError;
use crate::mapping;

use super::dict::Dict;
use super::field::{is_service_field, DictField, FieldSize, FieldType};

/// Rejects caller-supplied fields that redeclare a service field.
///
/// # Arguments
/// * `dict_id` - Dictionary the fields belong to
/// * `fields` - Caller-defined fields (before service field injection)
pub(crate) fn validate_user_fields(dict_id: &str, fields: &[DictField]) -> Result<(), DictError> {
    for field in fields {
        if is_service_field(&field.id) {
            return Err(DictError::ForbiddenFieldName {
                dict: dict_id.to_string(),
                field: field.id.clone(),
            });
        }
    }
    Ok(())
}

/// Validates a complete dictionary definition.
///
/// # Arguments
/// * `dict` - Dictionary with service fields already injected
/// * `max_field_id_length` - Upper bound on field id length
/// * `dict_exists` - Lookup used to check DICT field references
///
/// # Returns
/// `Result<(), DictError>` naming the first offending field, enum, index or constraint.
pub(crate) fn validate_dict<F>(
    dict: &Dict,
    max_field_id_length: usize,
    dict_exists: F,
) -> Result<(), DictError>
where
    F: Fn(&str) -> bool,
{
    validate_identifier(&dict.id, &dict.id, "dict id", usize::MAX)?;

    let mut enum_ids = HashSet::new();
    for dict_enum in &dict.enums {
        if !enum_ids.insert(dict_enum.id.as_str()) {
            return Err(DictError::EnumAlreadyExists {
                dict: dict.id.clone(),
                enum_id: dict_enum.id.clone(),
            });
        }
    }

    let mut field_ids = HashSet::new();
    for field in &dict.fields {
        if !field_ids.insert(field.id.as_str()) {
            return Err(DictError::FieldAlreadyExists {
                dict: dict.id.clone(),
                field: field.id.clone(),
            });
        }
        validate_field(dict, field, max_field_id_length, &dict_exists)?;
    }

    let mut structure_ids = HashSet::new();
    for index in &dict.indexes {
        if !structure_ids.insert(index.id.as_str()) {
            return Err(DictError::IndexAlreadyExists {
                dict: dict.id.clone(),
                index: index.id.clone(),
            });
        }
        validate_covered_fields(dict, &index.id, &index.fields)?;
    }
    for constraint in &dict.constraints {
        if !structure_ids.insert(constraint.id.as_str()) {
            return Err(DictError::ConstraintAlreadyExists {
                dict: dict.id.clone(),
                constraint: constraint.id.clone(),
            });
        }
        validate_covered_fields(dict, &constraint.id, &constraint.fields)?;
    }

    Ok(())
}

/// Validates a single field definition against its dictionary.
pub(crate) fn validate_field<F>(
    dict: &Dict,
    field: &DictField,
    max_field_id_length: usize,
    dict_exists: &F,
) -> Result<(), DictError>
where
    F: Fn(&str) -> bool,
{
    validate_identifier(&dict.id, &field.id, "field id", max_field_id_length)?;

    let invalid = |message: String| DictError::FieldValidation {
        dict: dict.id.clone(),
        field: field.id.clone(),
        message,
    };

    match field.field_type {
        FieldType::Enum => {
            let enum_id = field
                .enum_id
                .as_deref()
                .ok_or_else(|| invalid("ENUM field must reference an enum".to_string()))?;
            if dict.get_enum(enum_id).is_none() {
                return Err(DictError::EnumNotFound {
                    dict: dict.id.clone(),
                    enum_id: enum_id.to_string(),
                });
            }
        }
        FieldType::Dict => {
            let dict_ref = field
                .dict_ref
                .as_ref()
                .ok_or_else(|| invalid("DICT field must reference a dict".to_string()))?;
            if dict_ref.dict_id != dict.id && !dict_exists(&dict_ref.dict_id) {
                return Err(DictError::DictNotFound {
                    dict: dict_ref.dict_id.clone(),
                });
            }
        }
        _ => {
            if field.enum_id.is_some() {
                return Err(invalid(format!("{} field cannot reference an enum", field.field_type)));
            }
            if field.dict_ref.is_some() {
                return Err(invalid(format!("{} field cannot reference a dict", field.field_type)));
            }
        }
    }

    for size in [field.min_size, field.max_size].into_iter().flatten() {
        validate_size_type(field, size).map_err(invalid)?;
    }
    if let (Some(min), Some(max)) = (field.min_size, field.max_size) {
        if min.as_f64() > max.as_f64() {
            return Err(invalid(format!("minSize {} is greater than maxSize {}", min, max)));
        }
    }

    if let Some(default) = &field.default_value {
        let coerced = mapping::coerce_value(&dict.id, field, default)?;
        mapping::check_constraints(dict, field, &coerced)?;
    }

    Ok(())
}

/// Checks that a size bound belongs to the field's type family.
fn validate_size_type(field: &DictField, size: FieldSize) -> Result<(), String> {
    match (field.field_type, size) {
        (FieldType::Integer, FieldSize::Integer(_)) => Ok(()),
        (FieldType::String, FieldSize::Integer(len)) if len >= 0 => Ok(()),
        (FieldType::String, FieldSize::Integer(len)) => {
            Err(format!("string length bound {} is negative", len))
        }
        (FieldType::Decimal, _) => Ok(()),
        (FieldType::Integer, FieldSize::Decimal(v)) | (FieldType::String, FieldSize::Decimal(v)) => {
            Err(format!("{} field requires an integer bound, got {}", field.field_type, v))
        }
        (other, _) => Err(format!("{} field does not support size bounds", other)),
    }
}

/// Checks that an index or constraint covers existing fields.
fn validate_covered_fields(dict: &Dict, owner: &str, fields: &[String]) -> Result<(), DictError> {
    if fields.is_empty() {
        return Err(DictError::FieldValidation {
            dict: dict.id.clone(),
            field: owner.to_string(),
            message: "must cover at least one field".to_string(),
        });
    }
    for field_id in fields {
        dict.get_field(field_id)?;
    }
    Ok(())
}

/// Validates that an identifier is usable as a column and query name.
fn validate_identifier(
    dict_id: &str,
    id: &str,
    what: &str,
    max_length: usize,
) -> Result<(), DictError> {
    let invalid = |message: String| DictError::FieldValidation {
        dict: dict_id.to_string(),
        field: id.to_string(),
        message,
    };
    if id.is_empty() {
        return Err(invalid(format!("{} is empty", what)));
    }
    if id.chars().count() > max_length {
        return Err(invalid(format!(
            "{} is longer than {} characters",
            what, max_length
        )));
    }
    let mut chars = id.chars();
    let starts_well = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_well || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid(format!(
            "{} must start with a letter and contain only letters, digits and '_'",
            what
        )));
    }
    Ok(())
}
