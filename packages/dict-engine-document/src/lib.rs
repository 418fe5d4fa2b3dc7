//! Document storage backend for the dictionary engine.
//!
//! Items are kept as documents in per-dictionary collections, with
//! multi-valued fields stored as arrays. Filters are translated into
//! [`Criteria`] trees and evaluated in memory; referenced dictionaries on the
//! same engine are joined by looking up the referenced document by id.
//! With a data directory configured, the store is persisted as a single
//! checksummed snapshot file.

mod compare;
mod criteria;
mod data;
mod engine;
mod scheme;
mod store;
pub mod translator;

pub use criteria::{ArrayMode, Criteria, DocumentView, FieldPath, LikePattern};
pub use engine::DocumentBackend;
pub use translator::{DocumentQuery, DocumentTranslator, Lookup};
