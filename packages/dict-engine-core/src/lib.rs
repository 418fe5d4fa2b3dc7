//! Core of the dictionary engine.
//!
//! Provides the schema model, the filter query language, backend traits,
//! per-dictionary locking, versioned migrations and the schema and data
//! services built on top of them. Storage backends live in their own crates.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod lock;
pub mod mapping;
pub mod migration;
pub mod query;
pub mod registry;
pub mod schema;
pub mod service;

pub use config::DictEngineConfig;
pub use error::{DictError, Result};
pub use migration::{MigrationReport, Migrator};
pub use registry::EngineRegistry;
pub use service::{DictDataService, DictService};
