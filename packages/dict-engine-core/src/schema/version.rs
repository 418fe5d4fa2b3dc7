//! Ledger row of an applied migration script.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One applied migration script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionScheme {
    pub id: String,
    /// Canonical version key parsed from the file name
    pub version: String,
    /// Script path relative to the migrations directory
    pub script: String,
    /// CRC32 of the raw script bytes
    pub checksum: u32,
    pub installed: DateTime<Utc>,
}

impl VersionScheme {
    pub fn new(version: impl Into<String>, script: impl Into<String>, checksum: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            version: version.into(),
            script: script.into(),
            checksum,
            installed: Utc::now(),
        }
    }
}
