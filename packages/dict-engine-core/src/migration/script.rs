//! Migration script discovery and checksums.

use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{io_error, DictError, Result};

/// Ordering key parsed from a script file name.
///
/// `V1_2__x` and `V1.2__x` both parse to `1.2`; trailing zero components are
/// dropped so `V1.0__x` and `V1__x` collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionKey(Vec<u64>);

impl VersionKey {
    /// Parses the version part of a file name (between `V` and `__`).
    pub fn parse(text: &str) -> Option<Self> {
        if text.is_empty() {
            return None;
        }
        let mut parts = text
            .split(['.', '_'])
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        while parts.len() > 1 && parts.last() == Some(&0) {
            parts.pop();
        }
        Some(VersionKey(parts))
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| {
                let a = self.0.get(i).copied().unwrap_or(0);
                let b = other.0.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// A discovered migration script.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationScript {
    pub version: VersionKey,
    pub description: String,
    /// Path relative to the migrations directory, `/`-separated
    pub script: String,
    pub content: String,
    pub checksum: u32,
}

/// CRC32 over the raw script bytes.
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Splits `V<version>__<description>.<extension>` into its parts.
pub fn parse_file_name(file_name: &str, extension: &str) -> Option<(VersionKey, String)> {
    let stem = file_name.strip_suffix(extension)?.strip_suffix('.')?;
    let rest = stem.strip_prefix('V').or_else(|| stem.strip_prefix('v'))?;
    let (version, description) = rest.split_once("__")?;
    let version = VersionKey::parse(version)?;
    Some((version, description.replace('_', " ")))
}

/// Finds every script under `dir` (recursively), sorted by version.
///
/// Two scripts with the same version key fail with `MigrationSameVersion`
/// before anything is applied. A missing directory yields no scripts.
pub fn discover(dir: &Path, extension: &str) -> Result<Vec<MigrationScript>> {
    if !dir.exists() {
        tracing::warn!("Migrations directory {:?} does not exist", dir);
        return Ok(Vec::new());
    }

    let mut scripts = Vec::new();
    collect(dir, dir, extension, &mut scripts)?;
    scripts.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.script.cmp(&b.script)));

    for pair in scripts.windows(2) {
        if pair[0].version == pair[1].version {
            return Err(DictError::MigrationSameVersion {
                version: pair[0].version.to_string(),
                first: pair[0].script.clone(),
                second: pair[1].script.clone(),
            });
        }
    }

    tracing::debug!("Discovered {} migration scripts in {:?}", scripts.len(), dir);
    Ok(scripts)
}

fn collect(
    root: &Path,
    dir: &Path,
    extension: &str,
    scripts: &mut Vec<MigrationScript>,
) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| io_error(e, "read migrations directory"))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| io_error(e, "read migrations directory"))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, extension, scripts)?;
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.ends_with(&format!(".{}", extension)) {
            continue;
        }
        let script = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let Some((version, description)) = parse_file_name(&file_name, extension) else {
            tracing::warn!("Skipping migration file with unparseable name: {}", script);
            continue;
        };
        let bytes = fs::read(&path).map_err(|e| io_error(e, &format!("read {}", script)))?;
        let content = String::from_utf8(bytes.clone()).map_err(|e| DictError::MigrationScript {
            script: script.clone(),
            message: format!("not valid UTF-8: {}", e),
        })?;
        scripts.push(MigrationScript {
            version,
            description,
            checksum: checksum(&bytes),
            script,
            content,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;
    use tempfile::TempDir;

    #[timeout(1000)]
    #[test]
    fn test_file_name_parsing() {
        let (version, description) = parse_file_name("V1_2__add_orders.dql", "dql").unwrap();
        assert_eq!(version.to_string(), "1.2");
        assert_eq!(description, "add orders");

        assert!(parse_file_name("1__missing_prefix.dql", "dql").is_none());
        assert!(parse_file_name("V1_add.dql", "dql").is_none());
        assert!(parse_file_name("V1__x.sql", "dql").is_none());
        assert!(parse_file_name("Vx__x.dql", "dql").is_none());
    }

    #[timeout(1000)]
    #[test]
    fn test_version_ordering_is_numeric() {
        let v = |s: &str| VersionKey::parse(s).unwrap();
        assert!(v("2") < v("10"));
        assert!(v("1.2") < v("1.10"));
        assert_eq!(v("1.0"), v("1"));
        assert!(v("1") < v("1.0.1"));
    }

    #[timeout(1000)]
    #[test]
    fn test_discover_sorts_and_checksums() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("V10__late.dql"), "drop dict a;").unwrap();
        fs::write(dir.path().join("nested/V2__early.dql"), "drop dict b;").unwrap();
        fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let scripts = discover(dir.path(), "dql").unwrap();
        let names: Vec<_> = scripts.iter().map(|s| s.script.as_str()).collect();
        assert_eq!(names, vec!["nested/V2__early.dql", "V10__late.dql"]);
        assert_eq!(scripts[0].checksum, checksum(b"drop dict b;"));
    }

    #[timeout(1000)]
    #[test]
    fn test_duplicate_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("V1__a.dql"), "").unwrap();
        fs::write(dir.path().join("V1.0__b.dql"), "").unwrap();

        let err = discover(dir.path(), "dql").unwrap_err();
        assert!(matches!(err, DictError::MigrationSameVersion { ref version, .. } if version == "1"));
        assert!(err.is_fatal());
    }

    #[timeout(1000)]
    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let scripts = discover(&dir.path().join("absent"), "dql").unwrap();
        assert!(scripts.is_empty());
    }
}
