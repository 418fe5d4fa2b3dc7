//! Data façade: validated item CRUD and filtering.

use std::sync::Arc;

use serde_json::Value;

use crate::backend::{Page, Pageable, StorageEngine};
use crate::error::{DictError, Result};
use crate::mapping::{check_constraints, coerce_value};
use crate::query::{resolve_field, FieldRef, QueryExpression};
use crate::schema::{is_service_field, Dict, DictField, DictItem, FieldType, ItemData};

use super::DictService;

/// Dictionary data service.
///
/// Every operation holds the read side of the dictionary's lock, so schema
/// changes never interleave with a data operation on the same dictionary.
/// Writes also hold the engine's writer lock; bulk writes by filter run in
/// one engine transaction and change nothing when any item fails.
#[derive(Clone, Debug)]
pub struct DictDataService {
    dicts: DictService,
}

impl DictDataService {
    pub fn new(dicts: DictService) -> Self {
        Self { dicts }
    }

    pub fn dict_service(&self) -> &DictService {
        &self.dicts
    }

    /// Runs `f` with the active dictionary and its engine under the read lock.
    fn with_dict<T>(
        &self,
        dict_id: &str,
        f: impl FnOnce(&Dict, &StorageEngine) -> Result<T>,
    ) -> Result<T> {
        self.dicts.get(dict_id)?;
        self.dicts.locks().with_read(dict_id, || {
            let dict = self.dicts.get(dict_id)?;
            let storage = self.dicts.storage(&dict)?;
            f(&dict, storage)
        })
    }

    /// Like `with_dict`, holding the engine's writer lock.
    fn with_dict_exclusive<T>(
        &self,
        dict_id: &str,
        f: impl FnOnce(&Dict, &StorageEngine) -> Result<T>,
    ) -> Result<T> {
        let dict = self.dicts.get(dict_id)?;
        self.dicts
            .storage(&dict)?
            .exclusive(|| self.with_dict(dict_id, f))
    }

    /// Like `with_dict`, inside a transaction on the dictionary's engine.
    fn with_dict_in_transaction<T>(
        &self,
        dict_id: &str,
        f: impl FnOnce(&Dict, &StorageEngine) -> Result<T>,
    ) -> Result<T> {
        let dict = self.dicts.get(dict_id)?;
        self.dicts
            .storage(&dict)?
            .in_transaction(|| self.with_dict(dict_id, f))
    }

    /// Returns an active item.
    ///
    /// # Arguments
    /// * `dict_id` - Dictionary id
    /// * `item_id` - Item id
    ///
    /// # Returns
    /// `Result<DictItem, DictError>`; missing and soft-deleted items are `ItemNotFound`.
    pub fn get_by_id(&self, dict_id: &str, item_id: &str) -> Result<DictItem> {
        self.with_dict(dict_id, |dict, storage| {
            storage
                .data
                .get_by_id(dict, item_id)?
                .ok_or_else(|| item_not_found(dict, item_id))
        })
    }

    /// Returns an item including soft-deleted state, for administrative reads.
    ///
    /// Works on soft-deleted dictionaries too.
    pub fn get_raw_by_id(&self, dict_id: &str, item_id: &str) -> Result<DictItem> {
        let dict = self
            .dicts
            .get_raw(dict_id)
            .ok_or_else(|| DictError::DictNotFound {
                dict: dict_id.to_string(),
            })?;
        self.dicts.locks().with_read(dict_id, || {
            self.dicts
                .storage(&dict)?
                .data
                .get_raw_by_id(&dict, item_id)?
                .ok_or_else(|| item_not_found(&dict, item_id))
        })
    }

    pub fn get_by_ids(&self, dict_id: &str, item_ids: &[String]) -> Result<Vec<DictItem>> {
        self.with_dict(dict_id, |dict, storage| storage.data.get_by_ids(dict, item_ids))
    }

    /// Returns one page of items matching the filter.
    ///
    /// # Arguments
    /// * `dict_id` - Dictionary id
    /// * `required_fields` - Field paths to return (`field` or `dictId.field`); empty = all
    /// * `filter` - Parsed filter
    /// * `pageable` - Page request; the size is capped by the configured maximum
    ///
    /// # Returns
    /// `Result<Page<DictItem>, DictError>`; no match is an empty page.
    pub fn get_by_filter(
        &self,
        dict_id: &str,
        required_fields: &[String],
        filter: &QueryExpression,
        pageable: &Pageable,
    ) -> Result<Page<DictItem>> {
        let pageable = pageable.clone().capped(self.dicts.config().max_page_size);
        self.with_dict(dict_id, |dict, storage| {
            let fields: Vec<FieldRef> = required_fields
                .iter()
                .map(|path| FieldRef::parse_path(path))
                .collect();
            for field in fields.iter().chain(pageable.sort.iter().map(|s| &s.field)) {
                resolve_field(dict, &self.dicts, field)?;
            }
            tracing::debug!("Filtering dict '{}' by '{}'", dict.id, filter);
            storage
                .data
                .get_by_filter(dict, &self.dicts, &fields, filter, &pageable)
        })
    }

    pub fn exists_by_id(&self, dict_id: &str, item_id: &str) -> Result<bool> {
        self.with_dict(dict_id, |dict, storage| storage.data.exists_by_id(dict, item_id))
    }

    pub fn exists_by_filter(&self, dict_id: &str, filter: &QueryExpression) -> Result<bool> {
        self.with_dict(dict_id, |dict, storage| {
            storage.data.exists_by_filter(dict, &self.dicts, filter)
        })
    }

    pub fn count_by_filter(&self, dict_id: &str, filter: &QueryExpression) -> Result<u64> {
        self.with_dict(dict_id, |dict, storage| {
            storage.data.count_by_filter(dict, &self.dicts, filter)
        })
    }

    /// Returns the distinct non-null values of a field over matching items.
    pub fn get_distinct_values_by_filter(
        &self,
        dict_id: &str,
        field_id: &str,
        filter: &QueryExpression,
    ) -> Result<Vec<Value>> {
        self.with_dict(dict_id, |dict, storage| {
            dict.get_field(field_id)?;
            storage
                .data
                .get_distinct_values_by_filter(dict, &self.dicts, field_id, filter)
        })
    }

    /// Validates and inserts one item.
    ///
    /// # Arguments
    /// * `dict_id` - Dictionary id
    /// * `data` - Field values; missing fields take their declared defaults
    ///
    /// # Returns
    /// `Result<DictItem, DictError>` with the stored item at version 1.
    pub fn create(&self, dict_id: &str, data: ItemData) -> Result<DictItem> {
        self.with_dict_exclusive(dict_id, |dict, storage| {
            let data = self.normalize(dict, &data)?;
            let item = storage.data.create(dict, DictItem::new(data))?;
            tracing::debug!("Created item '{}' in dict '{}'", item.id, dict.id);
            Ok(item)
        })
    }

    /// Validates and inserts items; nothing is stored if any item fails.
    pub fn create_many(&self, dict_id: &str, data: Vec<ItemData>) -> Result<Vec<DictItem>> {
        self.with_dict_exclusive(dict_id, |dict, storage| {
            let items = data
                .iter()
                .map(|d| self.normalize(dict, d).map(DictItem::new))
                .collect::<Result<Vec<_>>>()?;
            let items = storage.data.create_many(dict, items)?;
            tracing::debug!("Created {} items in dict '{}'", items.len(), dict.id);
            Ok(items)
        })
    }

    /// Replaces the data of an item.
    ///
    /// # Arguments
    /// * `dict_id` - Dictionary id
    /// * `item_id` - Item id
    /// * `data` - Complete new field values
    /// * `expected_version` - Version the caller last read
    ///
    /// # Returns
    /// `Result<DictItem, DictError>`; a stale version is `ConcurrentUpdate` and changes nothing.
    pub fn update(
        &self,
        dict_id: &str,
        item_id: &str,
        data: ItemData,
        expected_version: i64,
    ) -> Result<DictItem> {
        self.with_dict_exclusive(dict_id, |dict, storage| {
            let data = self.normalize(dict, &data)?;
            let item = storage.data.update(dict, item_id, data, expected_version)?;
            tracing::debug!(
                "Updated item '{}' in dict '{}' to version {}",
                item.id,
                dict.id,
                item.version
            );
            Ok(item)
        })
    }

    /// Merges `patch` into every item matching the filter.
    ///
    /// Returns the number of items updated; if any item fails, none is.
    pub fn update_by_filter(
        &self,
        dict_id: &str,
        filter: &QueryExpression,
        patch: &ItemData,
    ) -> Result<u64> {
        self.with_dict_in_transaction(dict_id, |dict, storage| {
            let matching =
                storage
                    .data
                    .get_by_filter(dict, &self.dicts, &[], filter, &Pageable::unpaged())?;
            let mut updated = 0;
            for item in matching.content {
                let mut data = item.data.clone();
                data.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
                let data = self.normalize(dict, &data)?;
                storage.data.update(dict, &item.id, data, item.version)?;
                updated += 1;
            }
            tracing::debug!("Updated {} items in dict '{}' by filter", updated, dict.id);
            Ok(updated)
        })
    }

    /// Deletes an item: soft keeps the row with `deleted` and the reason set.
    pub fn delete(
        &self,
        dict_id: &str,
        item_id: &str,
        soft: bool,
        reason: Option<&str>,
    ) -> Result<()> {
        self.with_dict_exclusive(dict_id, |dict, storage| {
            storage.data.delete(dict, item_id, soft, reason)?;
            tracing::debug!(
                "Deleted item '{}' in dict '{}' (soft: {})",
                item_id,
                dict.id,
                soft
            );
            Ok(())
        })
    }

    /// Deletes every active item; returns the number deleted.
    pub fn delete_all(&self, dict_id: &str, soft: bool, reason: Option<&str>) -> Result<u64> {
        self.with_dict_exclusive(dict_id, |dict, storage| {
            let deleted = storage.data.delete_all(dict, soft, reason)?;
            tracing::debug!("Deleted {} items in dict '{}'", deleted, dict.id);
            Ok(deleted)
        })
    }

    /// Deletes every item matching the filter; returns the number deleted.
    pub fn delete_by_filter(
        &self,
        dict_id: &str,
        filter: &QueryExpression,
        soft: bool,
        reason: Option<&str>,
    ) -> Result<u64> {
        self.with_dict_in_transaction(dict_id, |dict, storage| {
            let id_only = [FieldRef::new(crate::schema::ID_FIELD)];
            let matching =
                storage
                    .data
                    .get_by_filter(dict, &self.dicts, &id_only, filter, &Pageable::unpaged())?;
            for item in &matching.content {
                storage.data.delete(dict, &item.id, soft, reason)?;
            }
            let deleted = matching.content.len() as u64;
            tracing::debug!("Deleted {} items in dict '{}' by filter", deleted, dict.id);
            Ok(deleted)
        })
    }

    /// Validates caller data against the dictionary and normalizes it.
    ///
    /// Unknown keys are `FieldNotFound`, service keys `ForbiddenFieldName`.
    /// Missing or null values take the field default; a required field with
    /// neither fails. Null values are dropped from the result.
    fn normalize(&self, dict: &Dict, data: &ItemData) -> Result<ItemData> {
        for key in data.keys() {
            if is_service_field(key) {
                return Err(DictError::ForbiddenFieldName {
                    dict: dict.id.clone(),
                    field: key.clone(),
                });
            }
            dict.get_field(key)?;
        }

        let mut normalized = ItemData::new();
        for field in dict.user_fields() {
            let supplied = data.get(&field.id).filter(|v| !v.is_null());
            let Some(value) = supplied.or(field.default_value.as_ref()) else {
                if field.required {
                    return Err(DictError::ValueValidation {
                        dict: dict.id.clone(),
                        field: field.id.clone(),
                        message: "value is required".to_string(),
                    });
                }
                continue;
            };
            let value = coerce_value(&dict.id, field, value)?;
            check_constraints(dict, field, &value)?;
            if field.field_type == FieldType::Dict {
                self.check_references(dict, field, &value)?;
            }
            normalized.insert(field.id.clone(), value);
        }
        Ok(normalized)
    }

    /// Checks that every id held by a DICT field exists in the target dictionary.
    fn check_references(&self, dict: &Dict, field: &DictField, value: &Value) -> Result<()> {
        let Some(dict_ref) = &field.dict_ref else {
            return Ok(());
        };
        let target: Arc<Dict> = self.dicts.get(&dict_ref.dict_id)?;
        let storage = self.dicts.storage(&target)?;
        let ids = match value {
            Value::Array(ids) => ids.iter().filter_map(Value::as_str).collect::<Vec<_>>(),
            single => single.as_str().into_iter().collect(),
        };
        for id in ids {
            if !storage.data.exists_by_id(&target, id)? {
                return Err(DictError::ValueValidation {
                    dict: dict.id.clone(),
                    field: field.id.clone(),
                    message: format!("item '{}' does not exist in dict '{}'", id, target.id),
                });
            }
        }
        Ok(())
    }
}

fn item_not_found(dict: &Dict, item_id: &str) -> DictError {
    DictError::ItemNotFound {
        dict: dict.id.clone(),
        item: item_id.to_string(),
    }
}
