//! SQLite connection, metadata tables and transactions.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dict_engine_core::backend::{DictMetaBackend, Engine, VersionSchemeBackend};
use dict_engine_core::config::{DictEngineConfig, SQL_ENGINE};
use dict_engine_core::error::{DictError, Result};
use dict_engine_core::mapping::{format_timestamp, parse_timestamp};
use dict_engine_core::schema::{Dict, VersionScheme};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::translator::SqlTranslator;
use crate::values::{meta_error, LOWER_FUNCTION};

const DICT_TABLE: &str = "dict";
const VERSION_SCHEME_TABLE: &str = "version_scheme";

/// Relational dictionary backend on one shared SQLite connection.
///
/// Implements every backend role; register it with
/// [`StorageEngine::from_backend`](dict_engine_core::backend::StorageEngine::from_backend).
pub struct SqliteBackend {
    name: String,
    connection: Arc<Mutex<Connection>>,
    /// Depth of open engine transactions (savepoints)
    savepoints: Mutex<usize>,
    translator: SqlTranslator,
}

impl SqliteBackend {
    /// Opens the database configured in `config`.
    ///
    /// # Arguments
    /// * `config` - `sqlite_path` (`None` = in-memory) and busy timeout are used
    ///
    /// # Returns
    /// `Result<SqliteBackend, DictError>` registered under the name `sql`.
    pub fn open(config: &DictEngineConfig) -> Result<Self> {
        let connection = match &config.sqlite_path {
            Some(path) => open_file(path)?,
            None => Connection::open_in_memory().map_err(|e| meta_error("open database", e))?,
        };
        apply_pragmas(&connection, config.sqlite_busy_timeout_ms)?;
        tracing::info!(
            "Opened SQLite database {}",
            config
                .sqlite_path
                .as_ref()
                .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string())
        );
        Ok(Self::from_connection(connection, SQL_ENGINE))
    }

    /// Opens a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::open(&DictEngineConfig::default())
    }

    fn from_connection(connection: Connection, name: &str) -> Self {
        Self {
            name: name.to_string(),
            connection: Arc::new(Mutex::new(connection)),
            savepoints: Mutex::new(0),
            translator: SqlTranslator::new(name),
        }
    }

    /// Registers the backend under another engine name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.translator = SqlTranslator::new(self.name.clone());
        self
    }

    pub(crate) fn connection(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock()
    }

    pub(crate) fn translator(&self) -> &SqlTranslator {
        &self.translator
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        self.connection()
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
            .map_err(|e| meta_error("inspect schema", e))
    }

    fn execute_meta(&self, context: &str, sql: &str) -> Result<()> {
        self.connection()
            .execute_batch(sql)
            .map_err(|e| meta_error(context, e))
    }
}

fn open_file(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| dict_engine_core::error::io_error(e, "create database directory"))?;
    }
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    Connection::open_with_flags(path, flags).map_err(|e| meta_error("open database", e))
}

fn apply_pragmas(connection: &Connection, busy_timeout_ms: u64) -> Result<()> {
    connection
        .busy_timeout(Duration::from_millis(busy_timeout_ms))
        .map_err(|e| meta_error("configure database", e))?;
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|e| meta_error("configure database", e))?;
    register_functions(connection)
}

/// Registers the scalar functions the translator relies on.
fn register_functions(connection: &Connection) -> Result<()> {
    connection
        .create_scalar_function(
            LOWER_FUNCTION,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                Ok(match ctx.get_raw(0) {
                    ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).to_lowercase()),
                    _ => None,
                })
            },
        )
        .map_err(|e| meta_error("register functions", e))
}

impl Engine for SqliteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn dict_exists(&self) -> Result<bool> {
        self.table_exists(DICT_TABLE)
    }

    fn create_dict(&self) -> Result<()> {
        self.execute_meta(
            "create dict table",
            "CREATE TABLE IF NOT EXISTS dict (
                id TEXT PRIMARY KEY NOT NULL,
                scheme TEXT NOT NULL
            );",
        )
    }

    fn drop_dict(&self) -> Result<()> {
        self.execute_meta("drop dict table", "DROP TABLE IF EXISTS dict;")
    }

    fn version_scheme_exists(&self) -> Result<bool> {
        self.table_exists(VERSION_SCHEME_TABLE)
    }

    fn create_version_scheme(&self) -> Result<()> {
        self.execute_meta(
            "create version_scheme table",
            "CREATE TABLE IF NOT EXISTS version_scheme (
                id TEXT PRIMARY KEY NOT NULL,
                version TEXT NOT NULL,
                script TEXT NOT NULL UNIQUE,
                checksum INTEGER NOT NULL,
                installed TEXT NOT NULL
            );",
        )
    }

    fn drop_version_scheme(&self) -> Result<()> {
        self.execute_meta("drop version_scheme table", "DROP TABLE IF EXISTS version_scheme;")
    }

    fn begin_transaction(&self) -> Result<()> {
        let mut depth = self.savepoints.lock();
        self.execute_meta("begin transaction", &format!("SAVEPOINT sp_{};", *depth + 1))?;
        *depth += 1;
        tracing::debug!("Opened savepoint sp_{}", *depth);
        Ok(())
    }

    fn commit_transaction(&self) -> Result<()> {
        let mut depth = self.savepoints.lock();
        if *depth == 0 {
            return Err(DictError::storage("commit transaction", "no open transaction"));
        }
        self.execute_meta("commit transaction", &format!("RELEASE sp_{};", *depth))?;
        *depth -= 1;
        Ok(())
    }

    fn rollback_transaction(&self) -> Result<()> {
        let mut depth = self.savepoints.lock();
        if *depth == 0 {
            return Err(DictError::storage("rollback transaction", "no open transaction"));
        }
        self.execute_meta(
            "rollback transaction",
            &format!("ROLLBACK TO sp_{0}; RELEASE sp_{0};", *depth),
        )?;
        *depth -= 1;
        tracing::warn!("Rolled back savepoint sp_{}", *depth + 1);
        Ok(())
    }
}

impl DictMetaBackend for SqliteBackend {
    fn find_all(&self) -> Result<Vec<Dict>> {
        let connection = self.connection();
        let mut statement = connection
            .prepare("SELECT scheme FROM dict ORDER BY id")
            .map_err(|e| meta_error("read dicts", e))?;
        let schemes = statement
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| meta_error("read dicts", e))?;
        schemes
            .iter()
            .map(|scheme| serde_json::from_str(scheme).map_err(DictError::from))
            .collect()
    }

    fn find_by_id(&self, dict_id: &str) -> Result<Option<Dict>> {
        let scheme: Option<String> = self
            .connection()
            .query_row(
                "SELECT scheme FROM dict WHERE id = ?1",
                params![dict_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| meta_error("read dict", e))?;
        scheme
            .map(|s| serde_json::from_str(&s).map_err(DictError::from))
            .transpose()
    }

    fn save(&self, dict: &Dict) -> Result<()> {
        let scheme = serde_json::to_string(dict)?;
        self.connection()
            .execute(
                "INSERT INTO dict (id, scheme) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET scheme = excluded.scheme",
                params![dict.id, scheme],
            )
            .map_err(|e| meta_error("save dict", e))?;
        Ok(())
    }
}

/// Raw `version_scheme` row.
struct VersionRow {
    id: String,
    version: String,
    script: String,
    checksum: i64,
    installed: String,
}

impl VersionRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            version: row.get(1)?,
            script: row.get(2)?,
            checksum: row.get(3)?,
            installed: row.get(4)?,
        })
    }

    fn into_version(self) -> Result<VersionScheme> {
        let installed = parse_timestamp(&self.installed).ok_or_else(|| {
            DictError::storage(
                "read version_scheme",
                format!("invalid installed timestamp '{}'", self.installed),
            )
        })?;
        Ok(VersionScheme {
            id: self.id,
            version: self.version,
            script: self.script,
            checksum: self.checksum as u32,
            installed,
        })
    }
}

impl VersionSchemeBackend for SqliteBackend {
    fn find_all(&self) -> Result<Vec<VersionScheme>> {
        let connection = self.connection();
        let mut statement = connection
            .prepare(
                "SELECT id, version, script, checksum, installed FROM version_scheme ORDER BY rowid",
            )
            .map_err(|e| meta_error("read version_scheme", e))?;
        let rows = statement
            .query_map([], VersionRow::read)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| meta_error("read version_scheme", e))?;
        rows.into_iter().map(VersionRow::into_version).collect()
    }

    fn find_by_script(&self, script: &str) -> Result<Option<VersionScheme>> {
        self.connection()
            .query_row(
                "SELECT id, version, script, checksum, installed FROM version_scheme
                 WHERE script = ?1",
                params![script],
                VersionRow::read,
            )
            .optional()
            .map_err(|e| meta_error("read version_scheme", e))?
            .map(VersionRow::into_version)
            .transpose()
    }

    fn save(&self, version: &VersionScheme) -> Result<()> {
        self.connection()
            .execute(
                "INSERT INTO version_scheme (id, version, script, checksum, installed)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    version.id,
                    version.version,
                    version.script,
                    i64::from(version.checksum),
                    format_timestamp(&version.installed)
                ],
            )
            .map_err(|e| meta_error("save version_scheme", e))?;
        tracing::debug!("Recorded migration '{}'", version.script);
        Ok(())
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("name", &self.name)
            .field("savepoints", &*self.savepoints.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;

    #[timeout(1000)]
    #[test]
    fn test_bootstrap_tables() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(!backend.dict_exists().unwrap());
        backend.create_dict().unwrap();
        backend.create_version_scheme().unwrap();
        assert!(backend.dict_exists().unwrap());
        assert!(backend.version_scheme_exists().unwrap());

        backend.drop_version_scheme().unwrap();
        assert!(!backend.version_scheme_exists().unwrap());
    }

    #[timeout(1000)]
    #[test]
    fn test_dict_metadata_upsert() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.create_dict().unwrap();

        let dict = Dict::new("orders", "sql");
        DictMetaBackend::save(&backend, &dict).unwrap();
        DictMetaBackend::save(&backend, &dict.clone().named("Orders")).unwrap();

        let all = DictMetaBackend::find_all(&backend).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Orders");
        assert!(backend.find_by_id("missing").unwrap().is_none());
    }

    #[timeout(1000)]
    #[test]
    fn test_version_ledger() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.create_version_scheme().unwrap();

        let version = VersionScheme::new("1", "V1__init.dql", u32::MAX);
        VersionSchemeBackend::save(&backend, &version).unwrap();
        assert!(VersionSchemeBackend::save(&backend, &VersionScheme::new("1", "V1__init.dql", 1))
            .is_err());

        let stored = backend.find_by_script("V1__init.dql").unwrap().unwrap();
        assert_eq!(stored.checksum, u32::MAX);
        assert_eq!(VersionSchemeBackend::find_all(&backend).unwrap().len(), 1);
    }

    #[timeout(1000)]
    #[test]
    fn test_savepoint_rollback_discards_ddl() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.begin_transaction().unwrap();
        backend.create_dict().unwrap();
        backend.rollback_transaction().unwrap();
        assert!(!backend.dict_exists().unwrap());
        assert!(backend.commit_transaction().is_err());
    }

    #[timeout(1000)]
    #[test]
    fn test_failed_metadata_write_rolls_back_ddl() {
        use dict_engine_core::backend::StorageEngine;
        use dict_engine_core::schema::{DictField, FieldType};
        use dict_engine_core::{DictService, EngineRegistry};

        let backend = Arc::new(SqliteBackend::in_memory().unwrap());
        let registry = EngineRegistry::new(SQL_ENGINE)
            .with_engine(StorageEngine::from_backend(backend.clone()));
        let dicts = DictService::bootstrap(DictEngineConfig::default(), registry).unwrap();
        dicts
            .create(
                Dict::new("orders", SQL_ENGINE)
                    .with_field(DictField::new("title", FieldType::String)),
            )
            .unwrap();

        backend
            .connection()
            .execute_batch(
                "CREATE TRIGGER freeze_dict BEFORE UPDATE ON dict
                 BEGIN SELECT RAISE(ABORT, 'dict metadata is frozen'); END;",
            )
            .unwrap();
        let err = dicts
            .add_field("orders", DictField::new("amount", FieldType::Decimal))
            .unwrap_err();
        assert!(matches!(err, DictError::Storage { .. }));
        assert!(dicts.get("orders").unwrap().field("amount").is_none());

        let columns: Vec<String> = {
            let connection = backend.connection();
            let mut statement = connection
                .prepare("SELECT name FROM pragma_table_info('d_orders')")
                .unwrap();
            let names = statement
                .query_map([], |row| row.get::<_, String>(0))
                .unwrap()
                .collect::<rusqlite::Result<Vec<_>>>()
                .unwrap();
            names
        };
        assert!(columns.contains(&"title".to_string()));
        assert!(!columns.contains(&"amount".to_string()));
        assert_eq!(*backend.savepoints.lock(), 0);

        backend
            .connection()
            .execute_batch("DROP TRIGGER freeze_dict;")
            .unwrap();
        let dict = dicts
            .add_field("orders", DictField::new("amount", FieldType::Decimal))
            .unwrap();
        assert!(dict.field("amount").is_some());
    }

    #[timeout(1000)]
    #[test]
    fn test_lower_function_folds_unicode() {
        let backend = SqliteBackend::in_memory().unwrap();
        let connection = backend.connection();
        let folded: (String, String, Option<String>) = connection
            .query_row(
                "SELECT unicode_lower('ÄPFEL'), lower('ÄPFEL'), unicode_lower(NULL)",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(folded, ("äpfel".to_string(), "Äpfel".to_string(), None));
    }
}
