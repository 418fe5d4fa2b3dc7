//! Dictionary engine configuration.

use std::path::PathBuf;

/// Name of the relational engine.
pub const SQL_ENGINE: &str = "sql";
/// Name of the document engine.
pub const DOCUMENT_ENGINE: &str = "document";

/// Dictionary engine configuration.
#[derive(Debug, Clone)]
pub struct DictEngineConfig {
    /// Engine used when a dict does not name one; also owns the migration ledger
    pub default_engine: String,
    /// SQLite database file (`None` = in-memory database)
    pub sqlite_path: Option<PathBuf>,
    /// SQLite busy timeout in milliseconds
    pub sqlite_busy_timeout_ms: u64,
    /// Directory for document engine snapshots (`None` = memory only)
    pub document_data_dir: Option<PathBuf>,
    /// Directory scanned for migration scripts
    pub migrations_dir: PathBuf,
    /// Extension of migration script files
    pub migration_extension: String,
    /// Upper bound for requested page sizes
    pub max_page_size: usize,
    /// Maximum length of a field id
    pub max_field_id_length: usize,
}

impl Default for DictEngineConfig {
    fn default() -> Self {
        Self {
            default_engine: SQL_ENGINE.to_string(),
            sqlite_path: None,
            sqlite_busy_timeout_ms: 5000,
            document_data_dir: None,
            migrations_dir: PathBuf::from("./migrations"),
            migration_extension: "dql".to_string(),
            max_page_size: 1000,
            max_field_id_length: 32,
        }
    }
}
