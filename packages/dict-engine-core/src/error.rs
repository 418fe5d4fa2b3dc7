//! Dictionary engine error types.

use thiserror::Error;

/// Dictionary engine errors.
///
/// Variants are grouped the way callers handle them: schema, data, query,
/// migration and engine configuration. Every variant names the dictionary,
/// field, item or script it refers to.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DictError {
    // Schema errors
    /// Dictionary not found
    #[error("Dict '{dict}' not found")]
    DictNotFound { dict: String },

    /// Dictionary already exists
    #[error("Dict '{dict}' already exists")]
    DictAlreadyExists { dict: String },

    /// Enum not found in dictionary
    #[error("Enum '{enum_id}' not found in dict '{dict}'")]
    EnumNotFound { dict: String, enum_id: String },

    /// Enum already exists in dictionary
    #[error("Enum '{enum_id}' already exists in dict '{dict}'")]
    EnumAlreadyExists { dict: String, enum_id: String },

    /// Field not found in dictionary
    #[error("Field '{field}' not found in dict '{dict}'")]
    FieldNotFound { dict: String, field: String },

    /// Field already exists in dictionary
    #[error("Field '{field}' already exists in dict '{dict}'")]
    FieldAlreadyExists { dict: String, field: String },

    /// Field id is reserved for service fields
    #[error("Field name '{field}' is forbidden in dict '{dict}'")]
    ForbiddenFieldName { dict: String, field: String },

    /// Field definition failed validation
    #[error("Field '{field}' of dict '{dict}' is invalid: {message}")]
    FieldValidation {
        dict: String,
        field: String,
        message: String,
    },

    /// Index not found in dictionary
    #[error("Index '{index}' not found in dict '{dict}'")]
    IndexNotFound { dict: String, index: String },

    /// Index already exists in dictionary
    #[error("Index '{index}' already exists in dict '{dict}'")]
    IndexAlreadyExists { dict: String, index: String },

    /// Constraint not found in dictionary
    #[error("Constraint '{constraint}' not found in dict '{dict}'")]
    ConstraintNotFound { dict: String, constraint: String },

    /// Constraint already exists in dictionary
    #[error("Constraint '{constraint}' already exists in dict '{dict}'")]
    ConstraintAlreadyExists { dict: String, constraint: String },

    /// Storage rejected a schema change
    #[error("Failed to modify scheme of dict '{dict}': {message}")]
    SchemaModification { dict: String, message: String },

    // Data errors
    /// Item not found (or soft-deleted)
    #[error("Item '{item}' not found in dict '{dict}'")]
    ItemNotFound { dict: String, item: String },

    /// Optimistic version check failed
    #[error("Item '{item}' in dict '{dict}' was modified concurrently: expected version {expected}, found {actual}")]
    ConcurrentUpdate {
        dict: String,
        item: String,
        expected: i64,
        actual: i64,
    },

    /// Value failed type or constraint checks
    #[error("Invalid value for field '{field}' in dict '{dict}': {message}")]
    ValueValidation {
        dict: String,
        field: String,
        message: String,
    },

    /// Unique constraint violated
    #[error("Unique constraint violated in dict '{dict}': {message}")]
    UniqueViolation { dict: String, message: String },

    // Query errors
    /// Query text could not be parsed
    #[error("Syntax error at position {position}: {message}")]
    QuerySyntax { position: usize, message: String },

    /// Qualified field names a dictionary that the root dictionary does not reference
    #[error("Dict '{referenced}' is not referenced by any field of dict '{dict}'")]
    UnreferencedDict { dict: String, referenced: String },

    /// Operator is not supported by the backend
    #[error("Operator '{operator}' is not supported by engine '{engine}'")]
    UnsupportedOperator { engine: String, operator: String },

    // Migration errors
    /// Two scripts share a version key
    #[error("Migrations '{first}' and '{second}' have the same version {version}")]
    MigrationSameVersion {
        version: String,
        first: String,
        second: String,
    },

    /// An applied script changed on disk
    #[error("Checksum mismatch for migration '{script}': recorded {recorded}, current {current}")]
    ChecksumMismatch {
        script: String,
        recorded: u32,
        current: u32,
    },

    /// Script text failed to parse or validate
    #[error("Invalid migration script '{script}': {message}")]
    MigrationScript { script: String, message: String },

    /// Script failed while being applied; the transaction was rolled back
    #[error("Migration '{script}' was not applied: {source}")]
    MigrationApplied {
        script: String,
        #[source]
        source: Box<DictError>,
    },

    // Engine configuration errors
    /// Engine name is not registered
    #[error("Engine '{0}' is not configured")]
    UnknownEngine(String),

    /// Lock requested for a dictionary that has no lock entry
    #[error("No lock registered for dict '{0}'")]
    LockNotRegistered(String),

    /// Underlying storage failure
    #[error("Storage error in {context}: {message}")]
    Storage { context: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Result alias used across the dictionary engine.
pub type Result<T> = std::result::Result<T, DictError>;

impl DictError {
    /// Wraps a storage driver message with the dictionary or item it concerns.
    pub fn storage(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        DictError::Storage {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Returns true for errors that must stop the surrounding operation
    /// (migrations, engine configuration) rather than be reported to a user.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DictError::MigrationSameVersion { .. }
                | DictError::ChecksumMismatch { .. }
                | DictError::MigrationScript { .. }
                | DictError::MigrationApplied { .. }
                | DictError::UnknownEngine(_)
                | DictError::LockNotRegistered(_)
        )
    }
}

impl From<serde_json::Error> for DictError {
    fn from(error: serde_json::Error) -> Self {
        DictError::SerializationError(error.to_string())
    }
}

/// Classifies I/O errors with the operation they came from.
pub fn io_error(error: std::io::Error, context: &str) -> DictError {
    DictError::IoError(format!("{}: {}", context, error))
}
