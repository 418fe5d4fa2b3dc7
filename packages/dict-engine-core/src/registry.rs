//! Engine registry: engine name to backend bundle.

use std::collections::BTreeMap;

use crate::backend::StorageEngine;
use crate::error::{DictError, Result};

/// Maps engine names to their backends; the dictionary's `engine` attribute
/// selects one at call time.
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    engines: BTreeMap<String, StorageEngine>,
    default_engine: String,
}

impl EngineRegistry {
    pub fn new(default_engine: impl Into<String>) -> Self {
        Self {
            engines: BTreeMap::new(),
            default_engine: default_engine.into(),
        }
    }

    /// Registers an engine under its own name, replacing any previous one.
    pub fn register(&mut self, engine: StorageEngine) {
        let name = engine.name().to_string();
        tracing::debug!("Registering storage engine '{}'", name);
        self.engines.insert(name, engine);
    }

    pub fn with_engine(mut self, engine: StorageEngine) -> Self {
        self.register(engine);
        self
    }

    /// Looks up an engine, failing with `UnknownEngine`.
    pub fn get(&self, name: &str) -> Result<&StorageEngine> {
        self.engines
            .get(name)
            .ok_or_else(|| DictError::UnknownEngine(name.to_string()))
    }

    /// Returns the engine owning the migration ledger.
    pub fn default_engine(&self) -> Result<&StorageEngine> {
        self.get(&self.default_engine)
    }

    pub fn default_engine_name(&self) -> &str {
        &self.default_engine
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StorageEngine> {
        self.engines.values()
    }
}
