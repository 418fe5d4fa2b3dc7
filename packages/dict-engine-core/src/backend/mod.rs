//! Storage backend abstraction.
//!
//! A storage technology implements five traits:
//! - [`Engine`] bootstraps metadata storage and scopes transactions
//! - [`DictMetaBackend`] persists [`Dict`] definitions
//! - [`DictSchemeBackend`] applies schema DDL per dictionary
//! - [`DictDataBackend`] reads and writes [`DictItem`]s
//! - [`VersionSchemeBackend`] keeps the migration ledger
//!
//! [`StorageEngine`] bundles them behind one name for the registry.

mod page;

use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use serde_json::Value;

use crate::error::Result;
use crate::query::{DictResolver, FieldRef, QueryExpression};
use crate::schema::{Dict, DictConstraint, DictIndex, DictItem, ItemData, VersionScheme};

pub use page::{Page, Pageable, SortOrder};

/// A storage technology.
pub trait Engine: Send + Sync {
    /// Registry name of the engine.
    fn name(&self) -> &str;

    /// Returns true if the dict metadata table/collection exists.
    fn dict_exists(&self) -> Result<bool>;

    /// Creates the dict metadata table/collection.
    fn create_dict(&self) -> Result<()>;

    /// Drops the dict metadata table/collection.
    fn drop_dict(&self) -> Result<()>;

    /// Returns true if the migration ledger exists.
    fn version_scheme_exists(&self) -> Result<bool>;

    /// Creates the migration ledger.
    fn create_version_scheme(&self) -> Result<()>;

    /// Drops the migration ledger.
    fn drop_version_scheme(&self) -> Result<()>;

    /// Opens a transaction spanning subsequent schema and data operations.
    fn begin_transaction(&self) -> Result<()>;

    /// Commits the open transaction.
    fn commit_transaction(&self) -> Result<()>;

    /// Rolls back the open transaction, schema changes included.
    fn rollback_transaction(&self) -> Result<()>;
}

/// Persistence of dictionary definitions.
pub trait DictMetaBackend: Send + Sync {
    /// Returns every stored dictionary, soft-deleted ones included.
    fn find_all(&self) -> Result<Vec<Dict>>;

    fn find_by_id(&self, dict_id: &str) -> Result<Option<Dict>>;

    /// Inserts or replaces the stored definition.
    fn save(&self, dict: &Dict) -> Result<()>;
}

/// Physical schema changes for one dictionary.
///
/// Implementations wrap storage failures in `SchemaModification` naming the
/// dictionary.
pub trait DictSchemeBackend: Send + Sync {
    /// Creates storage for a new dictionary, its indexes and constraints.
    fn create_dict_scheme(&self, dict: &Dict) -> Result<()>;

    /// Brings storage from `old` to `new`: added and removed fields,
    /// indexes and constraints.
    fn update_dict_scheme(&self, old: &Dict, new: &Dict) -> Result<()>;

    /// Renames a field; `dict` is the definition after the rename.
    fn rename_dict_field(&self, dict: &Dict, old_field_id: &str, new_field_id: &str)
        -> Result<()>;

    fn create_index(&self, dict: &Dict, index: &DictIndex) -> Result<()>;

    fn delete_index(&self, dict: &Dict, index_id: &str) -> Result<()>;

    fn create_constraint(&self, dict: &Dict, constraint: &DictConstraint) -> Result<()>;

    fn delete_constraint(&self, dict: &Dict, constraint_id: &str) -> Result<()>;
}

/// Data access for dictionary items.
///
/// Item data handed to a backend is already validated and normalized.
/// Unless stated otherwise, soft-deleted items are invisible.
pub trait DictDataBackend: Send + Sync {
    /// Returns the active item with the given id.
    fn get_by_id(&self, dict: &Dict, item_id: &str) -> Result<Option<DictItem>>;

    /// Returns the item with the given id, soft-deleted or not.
    fn get_raw_by_id(&self, dict: &Dict, item_id: &str) -> Result<Option<DictItem>>;

    /// Returns the active items among `item_ids`, in storage order.
    fn get_by_ids(&self, dict: &Dict, item_ids: &[String]) -> Result<Vec<DictItem>>;

    /// Returns one page of items matching `expression`.
    ///
    /// `required_fields` projects item data; empty means every root field.
    /// Qualified entries (`dictId.fieldId`) are read through a join on the
    /// DICT field referencing that dictionary and returned under their
    /// qualified name. Qualified sort keys join the same way.
    fn get_by_filter(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        required_fields: &[FieldRef],
        expression: &QueryExpression,
        pageable: &Pageable,
    ) -> Result<Page<DictItem>>;

    fn exists_by_id(&self, dict: &Dict, item_id: &str) -> Result<bool>;

    fn exists_by_filter(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        expression: &QueryExpression,
    ) -> Result<bool>;

    fn count_by_filter(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        expression: &QueryExpression,
    ) -> Result<u64>;

    /// Inserts a new item.
    fn create(&self, dict: &Dict, item: DictItem) -> Result<DictItem>;

    /// Inserts items atomically: all or none.
    fn create_many(&self, dict: &Dict, items: Vec<DictItem>) -> Result<Vec<DictItem>>;

    /// Replaces item data if the stored version equals `expected_version`.
    ///
    /// The version check and the write are atomic. The prior state is
    /// appended to history and the version incremented; only changed fields
    /// are written.
    fn update(
        &self,
        dict: &Dict,
        item_id: &str,
        data: ItemData,
        expected_version: i64,
    ) -> Result<DictItem>;

    /// Deletes an item: soft (sets `deleted` and the reason) or hard.
    fn delete(&self, dict: &Dict, item_id: &str, soft: bool, reason: Option<&str>) -> Result<()>;

    /// Deletes every active item; returns the number deleted.
    fn delete_all(&self, dict: &Dict, soft: bool, reason: Option<&str>) -> Result<u64>;

    /// Returns the distinct non-null values of a root field over matching items,
    /// sorted ascending.
    fn get_distinct_values_by_filter(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        field_id: &str,
        expression: &QueryExpression,
    ) -> Result<Vec<Value>>;
}

/// The migration ledger.
pub trait VersionSchemeBackend: Send + Sync {
    /// Returns every applied script ordered by installation.
    fn find_all(&self) -> Result<Vec<VersionScheme>>;

    fn find_by_script(&self, script: &str) -> Result<Option<VersionScheme>>;

    fn save(&self, version: &VersionScheme) -> Result<()>;
}

/// Converts a parsed expression into a backend-native query.
pub trait Translator {
    type Query;

    /// Translates `expression` against the root dictionary `dict`.
    ///
    /// Field references are resolved through `resolver`; unknown fields fail
    /// with `FieldNotFound` and operators the backend cannot express fail
    /// with `UnsupportedOperator`.
    fn process(
        &self,
        dict: &Dict,
        resolver: &dyn DictResolver,
        expression: &QueryExpression,
    ) -> Result<Self::Query>;
}

/// All backend roles of one storage technology.
///
/// Transactions are engine-wide, so writers on one engine are serialized by
/// a reentrant lock: the owning thread may nest transactions, other threads
/// wait until the outermost one finishes.
#[derive(Clone)]
pub struct StorageEngine {
    pub engine: Arc<dyn Engine>,
    pub meta: Arc<dyn DictMetaBackend>,
    pub scheme: Arc<dyn DictSchemeBackend>,
    pub data: Arc<dyn DictDataBackend>,
    pub versions: Arc<dyn VersionSchemeBackend>,
    writer: Arc<ReentrantMutex<()>>,
}

impl StorageEngine {
    /// Bundles a backend implementing every role.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: Engine
            + DictMetaBackend
            + DictSchemeBackend
            + DictDataBackend
            + VersionSchemeBackend
            + 'static,
    {
        Self {
            engine: backend.clone(),
            meta: backend.clone(),
            scheme: backend.clone(),
            data: backend.clone(),
            versions: backend,
            writer: Arc::new(ReentrantMutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    /// Takes the engine's writer lock until the guard drops.
    pub fn lock_writer(&self) -> ReentrantMutexGuard<'_, ()> {
        self.writer.lock()
    }

    /// Runs `f` holding the writer lock, without opening a transaction.
    pub fn exclusive<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.lock_writer();
        f()
    }

    /// Runs `f` inside an engine transaction.
    ///
    /// Commits when `f` succeeds; otherwise rolls back and returns the error
    /// from `f`.
    pub fn in_transaction<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.lock_writer();
        self.engine.begin_transaction()?;
        match f() {
            Ok(value) => {
                self.engine.commit_transaction()?;
                Ok(value)
            }
            Err(cause) => {
                if let Err(e) = self.engine.rollback_transaction() {
                    tracing::warn!("Rollback failed on engine '{}': {}", self.name(), e);
                }
                Err(cause)
            }
        }
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("name", &self.name())
            .finish()
    }
}
