//! Field definition within a dictionary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Service field holding the item id.
pub const ID_FIELD: &str = "id";
/// Service field holding the creation timestamp.
pub const CREATED_FIELD: &str = "created";
/// Service field holding the last update timestamp.
pub const UPDATED_FIELD: &str = "updated";
/// Service field holding the soft-delete timestamp.
pub const DELETED_FIELD: &str = "deleted";
/// Service field holding the soft-delete reason.
pub const DELETION_REASON_FIELD: &str = "deletionReason";
/// Service field holding prior-state snapshots.
pub const HISTORY_FIELD: &str = "history";
/// Service field holding the optimistic-lock version.
pub const VERSION_FIELD: &str = "version";

/// Engine-reserved field ids, present in every dictionary.
pub const SERVICE_FIELDS: [&str; 7] = [
    ID_FIELD,
    CREATED_FIELD,
    UPDATED_FIELD,
    DELETED_FIELD,
    DELETION_REASON_FIELD,
    HISTORY_FIELD,
    VERSION_FIELD,
];

/// Returns true if the id is reserved for a service field.
pub fn is_service_field(field_id: &str) -> bool {
    SERVICE_FIELDS.contains(&field_id)
}

/// Builds the service field definitions injected into every dictionary.
pub fn service_fields() -> Vec<DictField> {
    vec![
        DictField::new(ID_FIELD, FieldType::String).required(),
        DictField::new(CREATED_FIELD, FieldType::Timestamp),
        DictField::new(UPDATED_FIELD, FieldType::Timestamp),
        DictField::new(DELETED_FIELD, FieldType::Timestamp),
        DictField::new(DELETION_REASON_FIELD, FieldType::String),
        DictField::new(HISTORY_FIELD, FieldType::Json).multivalued(),
        DictField::new(VERSION_FIELD, FieldType::Integer).required(),
    ]
}

/// Field value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Json,
    Enum,
    /// Reference to an item of another dictionary
    Dict,
    Attachment,
    GeoJson,
}

impl FieldType {
    /// Returns true for INTEGER and DECIMAL.
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Decimal)
    }

    /// Returns true for types whose values are stored as plain strings.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            FieldType::String | FieldType::Enum | FieldType::Dict | FieldType::Attachment
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "STRING",
            FieldType::Integer => "INTEGER",
            FieldType::Decimal => "DECIMAL",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Date => "DATE",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Dict => "DICT",
            FieldType::Attachment => "ATTACHMENT",
            FieldType::GeoJson => "GEO_JSON",
        };
        f.write_str(name)
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" | "text" => Ok(FieldType::String),
            "integer" | "int" | "bigint" => Ok(FieldType::Integer),
            "decimal" | "numeric" => Ok(FieldType::Decimal),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "date" => Ok(FieldType::Date),
            "timestamp" => Ok(FieldType::Timestamp),
            "json" => Ok(FieldType::Json),
            "enum" => Ok(FieldType::Enum),
            "dict" => Ok(FieldType::Dict),
            "attachment" => Ok(FieldType::Attachment),
            "geo_json" | "geojson" => Ok(FieldType::GeoJson),
            other => Err(format!("unknown field type '{}'", other)),
        }
    }
}

/// Size bound of a field: numeric range or string length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSize {
    Integer(i64),
    Decimal(f64),
}

impl FieldSize {
    /// Returns the bound as a float for range comparisons.
    pub fn as_f64(self) -> f64 {
        match self {
            FieldSize::Integer(v) => v as f64,
            FieldSize::Decimal(v) => v,
        }
    }
}

impl fmt::Display for FieldSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSize::Integer(v) => write!(f, "{}", v),
            FieldSize::Decimal(v) => write!(f, "{}", v),
        }
    }
}

/// Reference from a DICT field to another dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictRef {
    /// Referenced dictionary id
    pub dict_id: String,
    /// Display field of the referenced dictionary
    pub field_id: String,
}

/// Field definition within a dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictField {
    /// Field id (at most 32 characters)
    pub id: String,
    /// Display name
    pub name: String,
    /// Value type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    /// Array-valued field
    #[serde(default)]
    pub multivalued: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size: Option<FieldSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<FieldSize>,
    /// Enum id for ENUM fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_id: Option<String>,
    /// Referenced dictionary for DICT fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dict_ref: Option<DictRef>,
}

impl DictField {
    /// Creates an optional, single-valued field whose display name is its id.
    pub fn new(id: impl Into<String>, field_type: FieldType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            field_type,
            required: false,
            multivalued: false,
            default_value: None,
            min_size: None,
            max_size: None,
            enum_id: None,
            dict_ref: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn multivalued(mut self) -> Self {
        self.multivalued = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_min_size(mut self, size: FieldSize) -> Self {
        self.min_size = Some(size);
        self
    }

    pub fn with_max_size(mut self, size: FieldSize) -> Self {
        self.max_size = Some(size);
        self
    }

    pub fn with_enum(mut self, enum_id: impl Into<String>) -> Self {
        self.enum_id = Some(enum_id.into());
        self
    }

    pub fn with_dict_ref(mut self, dict_id: impl Into<String>, field_id: impl Into<String>) -> Self {
        self.dict_ref = Some(DictRef {
            dict_id: dict_id.into(),
            field_id: field_id.into(),
        });
        self
    }

    /// Returns true if this is one of the engine-reserved fields.
    pub fn is_service(&self) -> bool {
        is_service_field(&self.id)
    }
}
