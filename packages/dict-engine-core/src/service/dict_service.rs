//! Schema façade: dictionary CRUD over the registered engines.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::backend::StorageEngine;
use crate::cache::DictCache;
use crate::config::DictEngineConfig;
use crate::error::{DictError, Result};
use crate::lock::DictLockTable;
use crate::query::DictResolver;
use crate::registry::EngineRegistry;
use crate::schema::validation::{validate_dict, validate_user_fields};
use crate::schema::{
    is_service_field, service_fields, Dict, DictConstraint, DictEnum, DictField, DictIndex,
    FieldType,
};

struct ServiceState {
    config: DictEngineConfig,
    registry: EngineRegistry,
    cache: DictCache,
    locks: DictLockTable,
    /// Serializes schema changes so cross-dictionary checks see a stable catalog
    schema_changes: Mutex<()>,
}

/// Dictionary schema service.
///
/// Every schema mutation runs under the dictionary's write lock and replaces
/// the cache entry in the same critical section as the storage change. The
/// storage change and the metadata record are written in one engine
/// transaction.
/// Cloning is cheap; clones share the cache and the lock table.
#[derive(Clone)]
pub struct DictService {
    state: Arc<ServiceState>,
}

impl DictService {
    /// Bootstraps metadata storage on every engine and loads all dictionaries.
    ///
    /// # Arguments
    /// * `config` - Engine configuration
    /// * `registry` - Registered storage engines
    ///
    /// # Returns
    /// `Result<DictService, DictError>` with locks registered and the cache warm.
    pub fn bootstrap(config: DictEngineConfig, registry: EngineRegistry) -> Result<Self> {
        registry.default_engine()?;
        for storage in registry.iter() {
            let engine = &storage.engine;
            if !engine.dict_exists()? {
                tracing::info!("Creating dict metadata storage on engine '{}'", engine.name());
                engine.create_dict()?;
            }
            if !engine.version_scheme_exists()? {
                tracing::info!("Creating migration ledger on engine '{}'", engine.name());
                engine.create_version_scheme()?;
            }
        }

        let service = Self {
            state: Arc::new(ServiceState {
                config,
                registry,
                cache: DictCache::new(),
                locks: DictLockTable::new(),
                schema_changes: Mutex::new(()),
            }),
        };
        service.reload()?;
        Ok(service)
    }

    /// Reloads every dictionary from metadata storage into the cache.
    ///
    /// Used at bootstrap and after a rolled-back migration.
    pub fn reload(&self) -> Result<()> {
        let mut dicts = Vec::new();
        for storage in self.state.registry.iter() {
            for dict in storage.meta.find_all()? {
                if dict.engine != storage.name() {
                    tracing::warn!(
                        "Dict '{}' stored on engine '{}' names engine '{}', skipping",
                        dict.id,
                        storage.name(),
                        dict.engine
                    );
                    continue;
                }
                self.state.locks.register(&dict.id);
                dicts.push(dict);
            }
        }
        tracing::info!("Loaded {} dicts", dicts.len());
        self.state.cache.replace_all(dicts);
        Ok(())
    }

    pub fn config(&self) -> &DictEngineConfig {
        &self.state.config
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.state.registry
    }

    pub fn locks(&self) -> &DictLockTable {
        &self.state.locks
    }

    /// Returns the engine owning the dictionary's data.
    pub fn storage(&self, dict: &Dict) -> Result<&StorageEngine> {
        self.state.registry.get(&dict.engine)
    }

    /// Returns an active dictionary.
    ///
    /// # Arguments
    /// * `dict_id` - Dictionary id
    ///
    /// # Returns
    /// `Result<Arc<Dict>, DictError>`; soft-deleted dictionaries are `DictNotFound`.
    pub fn get(&self, dict_id: &str) -> Result<Arc<Dict>> {
        self.get_raw(dict_id)
            .filter(|dict| !dict.is_deleted())
            .ok_or_else(|| DictError::DictNotFound {
                dict: dict_id.to_string(),
            })
    }

    /// Returns a dictionary whether soft-deleted or not.
    pub fn get_raw(&self, dict_id: &str) -> Option<Arc<Dict>> {
        self.state.cache.get(dict_id)
    }

    /// Returns every active dictionary sorted by id.
    pub fn list(&self) -> Vec<Arc<Dict>> {
        self.state
            .cache
            .all()
            .into_iter()
            .filter(|dict| !dict.is_deleted())
            .collect()
    }

    /// Creates a dictionary.
    ///
    /// Service fields are injected ahead of the caller's fields; an empty
    /// engine name selects the default engine.
    ///
    /// # Arguments
    /// * `dict` - Definition without service fields
    ///
    /// # Returns
    /// `Result<Arc<Dict>, DictError>` with the stored definition.
    pub fn create(&self, mut dict: Dict) -> Result<Arc<Dict>> {
        if dict.engine.is_empty() {
            dict.engine = self.state.config.default_engine.clone();
        }
        let storage = self.state.registry.get(&dict.engine)?.clone();

        validate_user_fields(&dict.id, &dict.fields)?;
        let mut fields = service_fields();
        fields.append(&mut dict.fields);
        dict.fields = fields;
        dict.deleted = None;

        self.state.locks.register(&dict.id);
        let dict_id = dict.id.clone();
        let _writer = storage.lock_writer();
        let _schema = self.state.schema_changes.lock();
        self.state.locks.with_write(&dict_id, || {
            self.validate(&dict)?;
            if self.get_raw(&dict.id).is_some() || storage.meta.find_by_id(&dict.id)?.is_some() {
                return Err(DictError::DictAlreadyExists {
                    dict: dict.id.clone(),
                });
            }
            storage.in_transaction(|| {
                storage.scheme.create_dict_scheme(&dict)?;
                storage.meta.save(&dict)
            })?;
            tracing::info!(
                "Created dict '{}' on engine '{}' with {} fields",
                dict.id,
                dict.engine,
                dict.user_fields().count()
            );
            Ok(self.state.cache.put(dict))
        })
    }

    /// Replaces a dictionary definition.
    ///
    /// Fields, enums, indexes and constraints are diffed against the stored
    /// definition and storage is altered to match. Field types, the engine
    /// and the id cannot change.
    pub fn update(&self, dict: Dict) -> Result<Arc<Dict>> {
        let dict_id = dict.id.clone();
        self.modify(
            &dict_id,
            |old| {
                if dict.engine != old.engine && !dict.engine.is_empty() {
                    return Err(DictError::SchemaModification {
                        dict: old.id.clone(),
                        message: format!(
                            "engine cannot change from '{}' to '{}'",
                            old.engine, dict.engine
                        ),
                    });
                }
                let standard = service_fields();
                let mut user_fields = Vec::new();
                for field in dict.fields {
                    if is_service_field(&field.id) {
                        if !standard.contains(&field) {
                            return Err(DictError::ForbiddenFieldName {
                                dict: old.id.clone(),
                                field: field.id,
                            });
                        }
                    } else {
                        user_fields.push(field);
                    }
                }
                check_field_types(old, &user_fields)?;

                let mut fields = standard;
                fields.extend(user_fields);
                Ok(Dict {
                    fields,
                    engine: old.engine.clone(),
                    deleted: old.deleted,
                    ..dict
                })
            },
            |storage, old, new| storage.scheme.update_dict_scheme(old, new),
        )
    }

    /// Soft-deletes a dictionary. Its data stays in storage.
    ///
    /// Fails with `SchemaModification` while another active dictionary
    /// references it through a DICT field.
    pub fn delete(&self, dict_id: &str) -> Result<()> {
        self.modify(
            dict_id,
            |old| {
                if let Some(referrer) = self
                    .list()
                    .into_iter()
                    .find(|d| d.id != old.id && d.field_referencing(&old.id).is_some())
                {
                    return Err(DictError::SchemaModification {
                        dict: old.id.clone(),
                        message: format!("referenced by dict '{}'", referrer.id),
                    });
                }
                let mut new = old.clone();
                new.deleted = Some(Utc::now());
                Ok(new)
            },
            |_, _, _| Ok(()),
        )?;
        Ok(())
    }

    /// Adds one field.
    pub fn add_field(&self, dict_id: &str, field: DictField) -> Result<Arc<Dict>> {
        self.modify(
            dict_id,
            |old| {
                validate_user_fields(&old.id, std::slice::from_ref(&field))?;
                if old.field(&field.id).is_some() {
                    return Err(DictError::FieldAlreadyExists {
                        dict: old.id.clone(),
                        field: field.id.clone(),
                    });
                }
                Ok(old.clone().with_field(field))
            },
            |storage, old, new| storage.scheme.update_dict_scheme(old, new),
        )
    }

    /// Removes one field and its data.
    ///
    /// Fails with `SchemaModification` while an index or constraint covers it.
    pub fn remove_field(&self, dict_id: &str, field_id: &str) -> Result<Arc<Dict>> {
        self.modify(
            dict_id,
            |old| {
                if is_service_field(field_id) {
                    return Err(DictError::ForbiddenFieldName {
                        dict: old.id.clone(),
                        field: field_id.to_string(),
                    });
                }
                old.get_field(field_id)?;
                let covering = old
                    .indexes
                    .iter()
                    .map(|i| (&i.id, &i.fields))
                    .chain(old.constraints.iter().map(|c| (&c.id, &c.fields)))
                    .find(|(_, fields)| fields.iter().any(|f| f == field_id));
                if let Some((owner, _)) = covering {
                    return Err(DictError::SchemaModification {
                        dict: old.id.clone(),
                        message: format!("field '{}' is covered by '{}'", field_id, owner),
                    });
                }
                let mut new = old.clone();
                new.fields.retain(|f| f.id != field_id);
                Ok(new)
            },
            |storage, old, new| storage.scheme.update_dict_scheme(old, new),
        )
    }

    /// Renames a field; index and constraint references follow.
    pub fn rename_field(&self, dict_id: &str, old_id: &str, new_id: &str) -> Result<Arc<Dict>> {
        self.modify(
            dict_id,
            |old| {
                for id in [old_id, new_id] {
                    if is_service_field(id) {
                        return Err(DictError::ForbiddenFieldName {
                            dict: old.id.clone(),
                            field: id.to_string(),
                        });
                    }
                }
                let mut new = old.clone();
                new.rename_field(old_id, new_id)?;
                Ok(new)
            },
            |storage, _, new| storage.scheme.rename_dict_field(new, old_id, new_id),
        )
    }

    pub fn create_enum(&self, dict_id: &str, dict_enum: DictEnum) -> Result<Arc<Dict>> {
        self.modify(
            dict_id,
            |old| {
                if old.get_enum(&dict_enum.id).is_some() {
                    return Err(DictError::EnumAlreadyExists {
                        dict: old.id.clone(),
                        enum_id: dict_enum.id.clone(),
                    });
                }
                Ok(old.clone().with_enum(dict_enum))
            },
            |_, _, _| Ok(()),
        )
    }

    /// Replaces the value set (and name) of an existing enum.
    pub fn update_enum(&self, dict_id: &str, dict_enum: DictEnum) -> Result<Arc<Dict>> {
        self.modify(
            dict_id,
            |old| {
                let mut new = old.clone();
                let slot = new
                    .enums
                    .iter_mut()
                    .find(|e| e.id == dict_enum.id)
                    .ok_or_else(|| DictError::EnumNotFound {
                        dict: old.id.clone(),
                        enum_id: dict_enum.id.clone(),
                    })?;
                *slot = dict_enum;
                Ok(new)
            },
            |_, _, _| Ok(()),
        )
    }

    /// Deletes an enum no field refers to.
    pub fn delete_enum(&self, dict_id: &str, enum_id: &str) -> Result<Arc<Dict>> {
        self.modify(
            dict_id,
            |old| {
                old.get_enum(enum_id).ok_or_else(|| DictError::EnumNotFound {
                    dict: old.id.clone(),
                    enum_id: enum_id.to_string(),
                })?;
                if let Some(field) = old.fields.iter().find(|f| {
                    f.field_type == FieldType::Enum && f.enum_id.as_deref() == Some(enum_id)
                }) {
                    return Err(DictError::SchemaModification {
                        dict: old.id.clone(),
                        message: format!("enum '{}' is used by field '{}'", enum_id, field.id),
                    });
                }
                let mut new = old.clone();
                new.enums.retain(|e| e.id != enum_id);
                Ok(new)
            },
            |_, _, _| Ok(()),
        )
    }

    pub fn create_index(&self, dict_id: &str, index: DictIndex) -> Result<Arc<Dict>> {
        let index_id = index.id.clone();
        self.modify(
            dict_id,
            |old| {
                check_structure_id_free(old, &index.id)?;
                Ok(old.clone().with_index(index))
            },
            |storage, _, new| match new.get_index(&index_id) {
                Some(index) => storage.scheme.create_index(new, index),
                None => Ok(()),
            },
        )
    }

    pub fn delete_index(&self, dict_id: &str, index_id: &str) -> Result<Arc<Dict>> {
        self.modify(
            dict_id,
            |old| {
                old.get_index(index_id).ok_or_else(|| DictError::IndexNotFound {
                    dict: old.id.clone(),
                    index: index_id.to_string(),
                })?;
                let mut new = old.clone();
                new.indexes.retain(|i| i.id != index_id);
                Ok(new)
            },
            |storage, _, new| storage.scheme.delete_index(new, index_id),
        )
    }

    pub fn create_constraint(
        &self,
        dict_id: &str,
        constraint: DictConstraint,
    ) -> Result<Arc<Dict>> {
        let constraint_id = constraint.id.clone();
        self.modify(
            dict_id,
            |old| {
                check_structure_id_free(old, &constraint.id)?;
                Ok(old.clone().with_constraint(constraint))
            },
            |storage, _, new| match new.get_constraint(&constraint_id) {
                Some(constraint) => storage.scheme.create_constraint(new, constraint),
                None => Ok(()),
            },
        )
    }

    pub fn delete_constraint(&self, dict_id: &str, constraint_id: &str) -> Result<Arc<Dict>> {
        self.modify(
            dict_id,
            |old| {
                old.get_constraint(constraint_id)
                    .ok_or_else(|| DictError::ConstraintNotFound {
                        dict: old.id.clone(),
                        constraint: constraint_id.to_string(),
                    })?;
                let mut new = old.clone();
                new.constraints.retain(|c| c.id != constraint_id);
                Ok(new)
            },
            |storage, _, new| storage.scheme.delete_constraint(new, constraint_id),
        )
    }

    fn validate(&self, dict: &Dict) -> Result<()> {
        validate_dict(dict, self.state.config.max_field_id_length, |id| {
            self.get(id).is_ok()
        })
    }

    /// Runs a schema change under the dictionary's write lock.
    ///
    /// `change` derives the new definition from the current one; `apply`
    /// alters storage. `apply` and the metadata write share one engine
    /// transaction, and the cache entry is replaced only after it commits.
    fn modify<C, A>(&self, dict_id: &str, change: C, apply: A) -> Result<Arc<Dict>>
    where
        C: FnOnce(&Dict) -> Result<Dict>,
        A: FnOnce(&StorageEngine, &Dict, &Dict) -> Result<()>,
    {
        let current = self.get(dict_id)?;
        let storage = self.storage(&current)?;
        let _writer = storage.lock_writer();
        let _schema = self.state.schema_changes.lock();
        self.state.locks.with_write(dict_id, || {
            let old = self.get(dict_id)?;
            let new = change(old.as_ref())?;
            self.validate(&new)?;
            storage.in_transaction(|| {
                apply(storage, old.as_ref(), &new)?;
                storage.meta.save(&new)
            })?;
            tracing::info!("Updated scheme of dict '{}'", new.id);
            Ok(self.state.cache.put(new))
        })
    }
}

impl DictResolver for DictService {
    fn resolve_dict(&self, dict_id: &str) -> Result<Arc<Dict>> {
        self.get(dict_id)
    }
}

impl std::fmt::Debug for DictService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictService")
            .field("registry", &self.state.registry)
            .finish()
    }
}

/// Rejects type or cardinality changes of existing fields.
fn check_field_types(old: &Dict, fields: &[DictField]) -> Result<()> {
    for field in fields {
        if let Some(existing) = old.field(&field.id) {
            if existing.field_type != field.field_type || existing.multivalued != field.multivalued
            {
                return Err(DictError::SchemaModification {
                    dict: old.id.clone(),
                    message: format!(
                        "field '{}' cannot change type from {} to {}",
                        field.id, existing.field_type, field.field_type
                    ),
                });
            }
        }
    }
    Ok(())
}

fn check_structure_id_free(dict: &Dict, id: &str) -> Result<()> {
    if dict.get_index(id).is_some() {
        return Err(DictError::IndexAlreadyExists {
            dict: dict.id.clone(),
            index: id.to_string(),
        });
    }
    if dict.get_constraint(id).is_some() {
        return Err(DictError::ConstraintAlreadyExists {
            dict: dict.id.clone(),
            constraint: id.to_string(),
        });
    }
    Ok(())
}
