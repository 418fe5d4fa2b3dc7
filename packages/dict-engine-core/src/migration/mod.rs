//! Versioned schema migrations.
//!
//! Scripts named `V<version>__<description>.<ext>` are discovered under the
//! configured directory, ordered by version and applied once each. Every
//! applied script is recorded with its CRC32 checksum in the default engine's
//! ledger; a recorded script whose file has changed aborts the run before
//! anything is applied.

mod interpreter;
pub mod script;
pub mod statement;

use std::collections::HashMap;
use std::path::PathBuf;

use crate::backend::StorageEngine;
use crate::error::{DictError, Result};
use crate::schema::VersionScheme;
use crate::service::{DictDataService, DictService};

use interpreter::Interpreter;
pub use script::{checksum, discover, parse_file_name, MigrationScript, VersionKey};
pub use statement::{parse_script, AlterAction, Statement};

/// Outcome of a migration run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationReport {
    /// Scripts applied by this run, in order
    pub applied: Vec<String>,
    /// Scripts already recorded in the ledger
    pub skipped: Vec<String>,
}

/// Applies pending migration scripts.
#[derive(Debug, Clone)]
pub struct Migrator {
    dicts: DictService,
    data: DictDataService,
    dir: PathBuf,
    extension: String,
}

impl Migrator {
    /// Creates a migrator reading the directory and extension from the
    /// service configuration.
    pub fn new(dicts: DictService) -> Self {
        let config = dicts.config();
        let dir = config.migrations_dir.clone();
        let extension = config.migration_extension.clone();
        Self {
            data: DictDataService::new(dicts.clone()),
            dicts,
            dir,
            extension,
        }
    }

    /// Overrides the scripts directory.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Returns discovered scripts not yet recorded in the ledger.
    pub fn pending(&self) -> Result<Vec<MigrationScript>> {
        let recorded = self.recorded()?;
        Ok(discover(&self.dir, &self.extension)?
            .into_iter()
            .filter(|s| !recorded.contains_key(&s.script))
            .collect())
    }

    /// Applies every pending script in version order.
    ///
    /// # Returns
    /// `Result<MigrationReport, DictError>`. Duplicate versions and checksum
    /// mismatches fail before anything is applied. A failing script is rolled
    /// back on every engine and reported as `MigrationApplied`; scripts
    /// applied before it stay applied.
    pub fn migrate(&self) -> Result<MigrationReport> {
        let scripts = discover(&self.dir, &self.extension)?;
        let recorded = self.recorded()?;

        for script in &scripts {
            if let Some(version) = recorded.get(&script.script) {
                if version.checksum != script.checksum {
                    return Err(DictError::ChecksumMismatch {
                        script: script.script.clone(),
                        recorded: version.checksum,
                        current: script.checksum,
                    });
                }
            }
        }
        for name in recorded.keys() {
            if !scripts.iter().any(|s| &s.script == name) {
                tracing::warn!("Applied migration '{}' has no script file", name);
            }
        }

        let mut report = MigrationReport::default();
        for script in scripts {
            if recorded.contains_key(&script.script) {
                report.skipped.push(script.script);
                continue;
            }
            self.apply(&script)?;
            report.applied.push(script.script);
        }

        tracing::info!(
            "Migrations complete: {} applied, {} already applied",
            report.applied.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn recorded(&self) -> Result<HashMap<String, VersionScheme>> {
        let ledger = self.dicts.registry().default_engine()?;
        Ok(ledger
            .versions
            .find_all()?
            .into_iter()
            .map(|v| (v.script.clone(), v))
            .collect())
    }

    /// Applies one script inside a transaction spanning every engine.
    fn apply(&self, script: &MigrationScript) -> Result<()> {
        let statements =
            parse_script(&script.script, &script.content).map_err(|cause| {
                tracing::error!("Migration '{}' is invalid: {}", script.script, cause);
                DictError::MigrationApplied {
                    script: script.script.clone(),
                    source: Box::new(cause),
                }
            })?;
        tracing::info!(
            "Applying migration '{}' ({} statements)",
            script.script,
            statements.len()
        );

        let registry = self.dicts.registry();
        let _writers: Vec<_> = registry.iter().map(StorageEngine::lock_writer).collect();
        let mut begun = Vec::new();
        let result = (|| -> Result<()> {
            for storage in registry.iter() {
                storage.engine.begin_transaction()?;
                begun.push(storage);
            }
            let interpreter = Interpreter::new(&self.dicts, &self.data, &script.script);
            for statement in statements {
                interpreter.execute(statement)?;
            }
            registry.default_engine()?.versions.save(&VersionScheme::new(
                script.version.to_string(),
                script.script.clone(),
                script.checksum,
            ))?;
            for storage in &begun {
                storage.engine.commit_transaction()?;
            }
            Ok(())
        })();

        if let Err(cause) = result {
            tracing::error!("Migration '{}' failed: {}", script.script, cause);
            for storage in &begun {
                if let Err(e) = storage.engine.rollback_transaction() {
                    tracing::warn!("Rollback failed on engine '{}': {}", storage.name(), e);
                }
            }
            self.dicts.reload()?;
            return Err(DictError::MigrationApplied {
                script: script.script.clone(),
                source: Box::new(cause),
            });
        }
        Ok(())
    }
}
