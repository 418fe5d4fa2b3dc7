//! Relational storage backend for the dictionary engine, on SQLite.
//!
//! Each dictionary is stored as table `d_<dictId>` with one column per field.
//! Multi-valued, JSON and GeoJSON fields are stored as JSON text and queried
//! through `json_each`. Unique constraints are partial indexes over rows that
//! are not soft-deleted.

mod data;
mod engine;
mod scheme;
pub mod translator;
mod values;

pub use engine::SqliteBackend;
pub use translator::{SqlJoin, SqlQuery, SqlTranslator};
