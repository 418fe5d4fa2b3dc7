//! In-memory document store and its snapshot file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use dict_engine_core::error::{io_error, DictError, Result};
use dict_engine_core::schema::{Dict, DictItem, VersionScheme};
use serde::{Deserialize, Serialize};

/// Snapshot file name inside the data directory.
pub(crate) const SNAPSHOT_FILE: &str = "documents.json";
const SNAPSHOT_FORMAT: u32 = 1;

/// Every collection of one document engine.
///
/// `dicts` and `versions` are `None` until their collection is created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct DocumentStore {
    pub dicts: Option<BTreeMap<String, Dict>>,
    pub versions: Option<Vec<VersionScheme>>,
    /// Items per dictionary, in insertion order
    pub collections: BTreeMap<String, Vec<DictItem>>,
}

impl DocumentStore {
    pub fn collection(&self, dict_id: &str) -> &[DictItem] {
        self.collections
            .get(dict_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn collection_mut(&mut self, dict_id: &str) -> &mut Vec<DictItem> {
        self.collections.entry(dict_id.to_string()).or_default()
    }
}

/// On-disk envelope: the serialized store and its CRC32.
#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    format: u32,
    checksum: u32,
    payload: String,
}

/// Reads and writes the snapshot of one store.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    dir: PathBuf,
}

impl Snapshot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Writes the store through a temporary file and an atomic rename.
    pub fn save(&self, store: &DocumentStore) -> Result<()> {
        let payload = serde_json::to_string(store)?;
        let envelope = SnapshotFile {
            format: SNAPSHOT_FORMAT,
            checksum: crc32fast::hash(payload.as_bytes()),
            payload,
        };
        let bytes = serde_json::to_vec(&envelope)?;

        fs::create_dir_all(&self.dir)
            .map_err(|e| io_error(e, "Failed to create document data directory"))?;
        let temp_path = self.dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        let mut file =
            File::create(&temp_path).map_err(|e| io_error(e, "Failed to create temp file"))?;
        file.write_all(&bytes)
            .map_err(|e| io_error(e, "Failed to write snapshot"))?;
        file.sync_all()
            .map_err(|e| io_error(e, "Failed to sync snapshot"))?;
        fs::rename(&temp_path, self.path())
            .map_err(|e| io_error(e, "Failed to rename snapshot file"))?;

        tracing::debug!("Saved document snapshot ({} bytes)", bytes.len());
        Ok(())
    }

    /// Loads the store; a missing file is an empty store.
    pub fn load(&self) -> Result<DocumentStore> {
        let path = self.path();
        if !path.exists() {
            return Ok(DocumentStore::default());
        }
        load_file(&path)
    }
}

fn load_file(path: &Path) -> Result<DocumentStore> {
    let context = || format!("document snapshot {}", path.display());
    let contents =
        fs::read_to_string(path).map_err(|e| io_error(e, "Failed to read snapshot file"))?;
    let envelope: SnapshotFile = serde_json::from_str(&contents)
        .map_err(|e| DictError::storage(context(), e))?;
    if envelope.format != SNAPSHOT_FORMAT {
        return Err(DictError::storage(
            context(),
            format!("unsupported snapshot format {}", envelope.format),
        ));
    }
    let actual = crc32fast::hash(envelope.payload.as_bytes());
    if actual != envelope.checksum {
        return Err(DictError::storage(
            context(),
            format!(
                "checksum mismatch: recorded {}, computed {}",
                envelope.checksum, actual
            ),
        ));
    }
    let store: DocumentStore =
        serde_json::from_str(&envelope.payload).map_err(|e| DictError::storage(context(), e))?;
    tracing::info!(
        "Loaded document snapshot with {} collections",
        store.collections.len()
    );
    Ok(store)
}
