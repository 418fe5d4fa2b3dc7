//! Document backend state, metadata collections and transactions.

use std::collections::BTreeMap;

use dict_engine_core::backend::{DictMetaBackend, Engine, VersionSchemeBackend};
use dict_engine_core::config::{DictEngineConfig, DOCUMENT_ENGINE};
use dict_engine_core::error::{DictError, Result};
use dict_engine_core::schema::{Dict, VersionScheme};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::store::{DocumentStore, Snapshot};
use crate::translator::DocumentTranslator;

/// Document dictionary backend.
///
/// Collections live in memory; with a data directory configured, every
/// committed change is written to a snapshot file. Transactions keep a stack
/// of store copies and restore the top one on rollback.
pub struct DocumentBackend {
    name: String,
    store: RwLock<DocumentStore>,
    /// Store copies taken by open transactions, innermost last
    transactions: Mutex<Vec<DocumentStore>>,
    snapshot: Option<Snapshot>,
    translator: DocumentTranslator,
}

impl DocumentBackend {
    /// Opens the backend configured in `config`.
    ///
    /// # Arguments
    /// * `config` - `document_data_dir` (`None` = memory only)
    ///
    /// # Returns
    /// `Result<DocumentBackend, DictError>` registered under the name `document`,
    /// with the snapshot loaded if one exists.
    pub fn open(config: &DictEngineConfig) -> Result<Self> {
        let snapshot = config.document_data_dir.as_ref().map(Snapshot::new);
        let store = match &snapshot {
            Some(snapshot) => snapshot.load()?,
            None => DocumentStore::default(),
        };
        Ok(Self {
            name: DOCUMENT_ENGINE.to_string(),
            store: RwLock::new(store),
            transactions: Mutex::new(Vec::new()),
            snapshot,
            translator: DocumentTranslator::new(DOCUMENT_ENGINE),
        })
    }

    /// Creates a memory-only backend.
    pub fn in_memory() -> Self {
        Self {
            name: DOCUMENT_ENGINE.to_string(),
            store: RwLock::new(DocumentStore::default()),
            transactions: Mutex::new(Vec::new()),
            snapshot: None,
            translator: DocumentTranslator::new(DOCUMENT_ENGINE),
        }
    }

    /// Registers the backend under another engine name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.translator = DocumentTranslator::new(self.name.clone());
        self
    }

    pub(crate) fn translator(&self) -> &DocumentTranslator {
        &self.translator
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, DocumentStore> {
        self.store.read()
    }

    /// Applies `f` to the store under the write lock.
    ///
    /// Outside a transaction the change is written to the snapshot file.
    pub(crate) fn mutate<T>(&self, f: impl FnOnce(&mut DocumentStore) -> Result<T>) -> Result<T> {
        let mut store = self.store.write();
        let result = f(&mut store)?;
        if self.transactions.lock().is_empty() {
            self.persist(&store)?;
        }
        Ok(result)
    }

    fn persist(&self, store: &DocumentStore) -> Result<()> {
        match &self.snapshot {
            Some(snapshot) => snapshot.save(store),
            None => Ok(()),
        }
    }

    fn missing(&self, collection: &str) -> DictError {
        DictError::storage(
            format!("engine '{}'", self.name),
            format!("collection '{}' does not exist", collection),
        )
    }
}

impl Engine for DocumentBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn dict_exists(&self) -> Result<bool> {
        Ok(self.read().dicts.is_some())
    }

    fn create_dict(&self) -> Result<()> {
        self.mutate(|store| {
            store.dicts.get_or_insert_with(BTreeMap::new);
            Ok(())
        })
    }

    fn drop_dict(&self) -> Result<()> {
        self.mutate(|store| {
            store.dicts = None;
            Ok(())
        })
    }

    fn version_scheme_exists(&self) -> Result<bool> {
        Ok(self.read().versions.is_some())
    }

    fn create_version_scheme(&self) -> Result<()> {
        self.mutate(|store| {
            store.versions.get_or_insert_with(Vec::new);
            Ok(())
        })
    }

    fn drop_version_scheme(&self) -> Result<()> {
        self.mutate(|store| {
            store.versions = None;
            Ok(())
        })
    }

    fn begin_transaction(&self) -> Result<()> {
        let store = self.store.read();
        let mut transactions = self.transactions.lock();
        transactions.push(store.clone());
        tracing::debug!("Opened document transaction (depth {})", transactions.len());
        Ok(())
    }

    fn commit_transaction(&self) -> Result<()> {
        let store = self.store.read();
        let mut transactions = self.transactions.lock();
        if transactions.pop().is_none() {
            return Err(DictError::storage("commit transaction", "no open transaction"));
        }
        if transactions.is_empty() {
            self.persist(&store)?;
        }
        Ok(())
    }

    fn rollback_transaction(&self) -> Result<()> {
        let mut store = self.store.write();
        let mut transactions = self.transactions.lock();
        let saved = transactions
            .pop()
            .ok_or_else(|| DictError::storage("rollback transaction", "no open transaction"))?;
        *store = saved;
        tracing::warn!(
            "Rolled back document transaction (depth {})",
            transactions.len() + 1
        );
        Ok(())
    }
}

impl DictMetaBackend for DocumentBackend {
    fn find_all(&self) -> Result<Vec<Dict>> {
        let store = self.read();
        let dicts = store.dicts.as_ref().ok_or_else(|| self.missing("dict"))?;
        Ok(dicts.values().cloned().collect())
    }

    fn find_by_id(&self, dict_id: &str) -> Result<Option<Dict>> {
        let store = self.read();
        let dicts = store.dicts.as_ref().ok_or_else(|| self.missing("dict"))?;
        Ok(dicts.get(dict_id).cloned())
    }

    fn save(&self, dict: &Dict) -> Result<()> {
        self.mutate(|store| {
            let dicts = store.dicts.as_mut().ok_or_else(|| self.missing("dict"))?;
            dicts.insert(dict.id.clone(), dict.clone());
            Ok(())
        })
    }
}

impl VersionSchemeBackend for DocumentBackend {
    fn find_all(&self) -> Result<Vec<VersionScheme>> {
        let store = self.read();
        store
            .versions
            .clone()
            .ok_or_else(|| self.missing("version_scheme"))
    }

    fn find_by_script(&self, script: &str) -> Result<Option<VersionScheme>> {
        let store = self.read();
        let versions = store
            .versions
            .as_ref()
            .ok_or_else(|| self.missing("version_scheme"))?;
        Ok(versions.iter().find(|v| v.script == script).cloned())
    }

    fn save(&self, version: &VersionScheme) -> Result<()> {
        self.mutate(|store| {
            let versions = store
                .versions
                .as_mut()
                .ok_or_else(|| self.missing("version_scheme"))?;
            if versions.iter().any(|v| v.script == version.script) {
                return Err(DictError::storage(
                    "version_scheme",
                    format!("script '{}' is already recorded", version.script),
                ));
            }
            versions.push(version.clone());
            Ok(())
        })
    }
}

impl std::fmt::Debug for DocumentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentBackend")
            .field("name", &self.name)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;
    use tempfile::tempdir;

    #[timeout(1000)]
    #[test]
    fn test_bootstrap_collections() {
        let backend = DocumentBackend::in_memory();
        assert!(!backend.dict_exists().unwrap());
        assert!(DictMetaBackend::find_all(&backend).is_err());
        backend.create_dict().unwrap();
        backend.create_version_scheme().unwrap();
        assert!(backend.dict_exists().unwrap());
        assert!(backend.version_scheme_exists().unwrap());
    }

    #[timeout(1000)]
    #[test]
    fn test_rollback_restores_store() {
        let backend = DocumentBackend::in_memory();
        backend.create_dict().unwrap();
        backend.begin_transaction().unwrap();
        DictMetaBackend::save(&backend, &Dict::new("a", "document")).unwrap();
        backend.begin_transaction().unwrap();
        DictMetaBackend::save(&backend, &Dict::new("b", "document")).unwrap();
        backend.rollback_transaction().unwrap();
        backend.commit_transaction().unwrap();

        let ids: Vec<String> = DictMetaBackend::find_all(&backend)
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["a"]);
        assert!(backend.commit_transaction().is_err());
    }

    #[timeout(1000)]
    #[test]
    fn test_version_ledger_rejects_duplicate_script() {
        let backend = DocumentBackend::in_memory();
        backend.create_version_scheme().unwrap();
        VersionSchemeBackend::save(&backend, &VersionScheme::new("1", "V1__a.dql", u32::MAX))
            .unwrap();
        assert!(
            VersionSchemeBackend::save(&backend, &VersionScheme::new("1", "V1__a.dql", 1)).is_err()
        );
        let found = backend.find_by_script("V1__a.dql").unwrap().unwrap();
        assert_eq!(found.checksum, u32::MAX);
    }

    #[timeout(1000)]
    #[test]
    fn test_changes_persist_outside_transactions_only() {
        let dir = tempdir().unwrap();
        let config = DictEngineConfig {
            document_data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let backend = DocumentBackend::open(&config).unwrap();
        backend.create_dict().unwrap();
        backend.begin_transaction().unwrap();
        DictMetaBackend::save(&backend, &Dict::new("a", "document")).unwrap();

        let reopened = DocumentBackend::open(&config).unwrap();
        assert!(DictMetaBackend::find_all(&reopened).unwrap().is_empty());

        backend.commit_transaction().unwrap();
        let reopened = DocumentBackend::open(&config).unwrap();
        assert_eq!(DictMetaBackend::find_all(&reopened).unwrap().len(), 1);
    }
}
