//! Dictionary schema: fields, enums, indexes and constraints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DictError;

use super::field::{is_service_field, DictField, FieldType};

/// Sort direction of an index or a sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Returns the SQL keyword for this direction.
    pub fn keyword(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Named set of string values scoped to a dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictEnum {
    pub id: String,
    pub name: String,
    pub values: Vec<String>,
}

impl DictEnum {
    pub fn new(id: impl Into<String>, values: Vec<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            values,
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }
}

/// Index over an ordered list of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictIndex {
    pub id: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Unique constraint over an ordered list of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictConstraint {
    pub id: String,
    pub fields: Vec<String>,
}

/// A named, user-defined record schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dict {
    /// Stable identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Fields in declaration order, service fields first
    pub fields: Vec<DictField>,
    #[serde(default)]
    pub enums: Vec<DictEnum>,
    #[serde(default)]
    pub indexes: Vec<DictIndex>,
    #[serde(default)]
    pub constraints: Vec<DictConstraint>,
    /// Name of the storage engine owning this dictionary's data
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_permission: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_permission: Option<String>,
    /// Soft-delete timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
}

impl Dict {
    /// Creates an empty dictionary owned by the given engine.
    ///
    /// Service fields are injected by the service layer on create.
    pub fn new(id: impl Into<String>, engine: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            fields: Vec::new(),
            enums: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
            engine: engine.into(),
            view_permission: None,
            edit_permission: None,
            deleted: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_field(mut self, field: DictField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_enum(mut self, dict_enum: DictEnum) -> Self {
        self.enums.push(dict_enum);
        self
    }

    pub fn with_index(mut self, index: DictIndex) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_constraint(mut self, constraint: DictConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    /// Looks up a field by id.
    pub fn field(&self, field_id: &str) -> Option<&DictField> {
        self.fields.iter().find(|f| f.id == field_id)
    }

    /// Looks up a field by id, failing with `FieldNotFound`.
    pub fn get_field(&self, field_id: &str) -> Result<&DictField, DictError> {
        self.field(field_id).ok_or_else(|| DictError::FieldNotFound {
            dict: self.id.clone(),
            field: field_id.to_string(),
        })
    }

    /// Iterates over caller-defined (non-service) fields.
    pub fn user_fields(&self) -> impl Iterator<Item = &DictField> {
        self.fields.iter().filter(|f| !is_service_field(&f.id))
    }

    pub fn get_enum(&self, enum_id: &str) -> Option<&DictEnum> {
        self.enums.iter().find(|e| e.id == enum_id)
    }

    pub fn get_index(&self, index_id: &str) -> Option<&DictIndex> {
        self.indexes.iter().find(|i| i.id == index_id)
    }

    pub fn get_constraint(&self, constraint_id: &str) -> Option<&DictConstraint> {
        self.constraints.iter().find(|c| c.id == constraint_id)
    }

    /// Returns the first DICT field referencing the given dictionary.
    pub fn field_referencing(&self, dict_id: &str) -> Option<&DictField> {
        self.fields.iter().find(|f| {
            f.field_type == FieldType::Dict
                && f.dict_ref.as_ref().is_some_and(|r| r.dict_id == dict_id)
        })
    }

    /// Renames a field and every index/constraint reference to it.
    pub fn rename_field(&mut self, old_id: &str, new_id: &str) -> Result<(), DictError> {
        if self.field(new_id).is_some() {
            return Err(DictError::FieldAlreadyExists {
                dict: self.id.clone(),
                field: new_id.to_string(),
            });
        }
        let dict_id = self.id.clone();
        let field = self
            .fields
            .iter_mut()
            .find(|f| f.id == old_id)
            .ok_or_else(|| DictError::FieldNotFound {
                dict: dict_id,
                field: old_id.to_string(),
            })?;
        if field.name == field.id {
            field.name = new_id.to_string();
        }
        field.id = new_id.to_string();

        let rename = |ids: &mut Vec<String>| {
            for id in ids.iter_mut().filter(|id| *id == old_id) {
                *id = new_id.to_string();
            }
        };
        for index in &mut self.indexes {
            rename(&mut index.fields);
        }
        for constraint in &mut self.constraints {
            rename(&mut constraint.fields);
        }
        Ok(())
    }
}
