//! Collection-level schema changes.
//!
//! Documents carry no physical schema: removed fields are stripped from
//! stored data, renamed fields are rekeyed and indexes are only recorded in
//! the definition. Unique constraints are checked against existing data.

use dict_engine_core::backend::DictSchemeBackend;
use dict_engine_core::error::{DictError, Result};
use dict_engine_core::schema::{Dict, DictConstraint, DictIndex};

use crate::data::duplicate_key;
use crate::engine::DocumentBackend;
use crate::store::DocumentStore;

fn check_constraint(store: &DocumentStore, dict: &Dict, constraint: &DictConstraint) -> Result<()> {
    let active: Vec<_> = store
        .collection(&dict.id)
        .iter()
        .filter(|item| !item.is_deleted())
        .collect();
    for (position, item) in active.iter().enumerate() {
        if let Some(key) = duplicate_key(constraint, item, active[..position].iter().copied()) {
            return Err(DictError::SchemaModification {
                dict: dict.id.clone(),
                message: format!(
                    "constraint '{}' is violated by existing items with key {}",
                    constraint.id, key
                ),
            });
        }
    }
    Ok(())
}

impl DictSchemeBackend for DocumentBackend {
    fn create_dict_scheme(&self, dict: &Dict) -> Result<()> {
        self.mutate(|store| {
            store.collection_mut(&dict.id);
            Ok(())
        })?;
        tracing::info!("Created collection for dict '{}'", dict.id);
        Ok(())
    }

    fn update_dict_scheme(&self, old: &Dict, new: &Dict) -> Result<()> {
        self.mutate(|store| {
            for constraint in &new.constraints {
                if old.get_constraint(&constraint.id) != Some(constraint) {
                    check_constraint(store, new, constraint)?;
                }
            }
            let removed: Vec<&str> = old
                .fields
                .iter()
                .filter(|f| new.field(&f.id).is_none())
                .map(|f| f.id.as_str())
                .collect();
            if !removed.is_empty() {
                for item in store.collection_mut(&new.id) {
                    for field_id in &removed {
                        item.data.remove(*field_id);
                    }
                }
            }
            Ok(())
        })?;
        tracing::info!("Updated collection for dict '{}'", new.id);
        Ok(())
    }

    fn rename_dict_field(&self, dict: &Dict, old_field_id: &str, new_field_id: &str) -> Result<()> {
        self.mutate(|store| {
            for item in store.collection_mut(&dict.id) {
                if let Some(value) = item.data.remove(old_field_id) {
                    item.data.insert(new_field_id.to_string(), value);
                }
            }
            Ok(())
        })?;
        tracing::info!(
            "Renamed field '{}' to '{}' in dict '{}'",
            old_field_id,
            new_field_id,
            dict.id
        );
        Ok(())
    }

    fn create_index(&self, dict: &Dict, index: &DictIndex) -> Result<()> {
        tracing::debug!("Index '{}' on dict '{}' is kept in the definition only", index.id, dict.id);
        Ok(())
    }

    fn delete_index(&self, dict: &Dict, index_id: &str) -> Result<()> {
        tracing::debug!("Dropped index '{}' of dict '{}'", index_id, dict.id);
        Ok(())
    }

    fn create_constraint(&self, dict: &Dict, constraint: &DictConstraint) -> Result<()> {
        let store = self.read();
        check_constraint(&store, dict, constraint)
    }

    fn delete_constraint(&self, dict: &Dict, constraint_id: &str) -> Result<()> {
        tracing::debug!("Dropped constraint '{}' of dict '{}'", constraint_id, dict.id);
        Ok(())
    }
}
