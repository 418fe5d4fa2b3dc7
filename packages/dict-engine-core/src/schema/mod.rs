//! Schema model: dictionaries, fields, items and the migration ledger.

mod dict;
mod field;
mod item;
pub(crate) mod validation;
mod version;

pub use dict::{Dict, DictConstraint, DictEnum, DictIndex, SortDirection};
pub use field::{
    is_service_field, service_fields, DictField, DictRef, FieldSize, FieldType, CREATED_FIELD,
    DELETED_FIELD, DELETION_REASON_FIELD, HISTORY_FIELD, ID_FIELD, SERVICE_FIELDS, UPDATED_FIELD,
    VERSION_FIELD,
};
pub use item::{DictItem, HistoryEntry, ItemData};
pub use version::VersionScheme;

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
