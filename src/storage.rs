//! Durable key-scoped storage for the creation history, plus file export helpers.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Namespaced record holding the serialized history array.
pub const HISTORY_KEY: &str = "gemini_app_history";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage quota exceeded: {needed} bytes needed, quota is {quota} bytes")]
    QuotaExceeded { needed: usize, quota: usize },
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A string key/value store that survives process restarts.
pub trait DurableStorage: Send {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Default data directory: `<data_dir>/genstudio`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("genstudio")
}

/// One JSON file per key under a directory.
pub struct FileStorage {
    dir: PathBuf,
    quota: Option<usize>,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>, quota: Option<usize>) -> Self {
        Self {
            dir: dir.into(),
            quota,
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl DurableStorage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota {
            if value.len() > quota {
                return Err(StorageError::QuotaExceeded {
                    needed: value.len(),
                    quota,
                });
            }
        }
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StorageError::Io { path, source }
        };
        std::fs::create_dir_all(&self.dir).map_err(io(&self.dir))?;
        let path = self.path_for(key);
        // Write then rename so a crash never leaves a truncated history behind.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(io(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io(&path))?;
        Ok(())
    }
}

/// In-process storage, used by tests and `--no-persist` runs.
#[derive(Default)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Default::default()
        }
    }
}

impl DurableStorage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota {
            if value.len() > quota {
                return Err(StorageError::QuotaExceeded {
                    needed: value.len(),
                    quota,
                });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Write `contents` to `path`, creating parent directories as needed.
pub fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
    }
    std::fs::write(path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Turn a creation name into a safe file stem.
pub fn file_stem_for(name: &str) -> String {
    let stem: String = name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();
    let stem = stem.trim_matches('.');
    if stem.is_empty() {
        "creation".to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_storage_round_trips_and_reports_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::new(dir.path().join("nested"), None);
        assert!(storage.read(HISTORY_KEY).unwrap().is_none());

        storage.write(HISTORY_KEY, "[1,2,3]").unwrap();
        assert_eq!(storage.read(HISTORY_KEY).unwrap().as_deref(), Some("[1,2,3]"));
        assert!(storage.path_for(HISTORY_KEY).exists());
        assert!(!storage.path_for(HISTORY_KEY).with_extension("json.tmp").exists());
    }

    #[test]
    fn quota_rejects_oversized_writes_and_keeps_previous_value() {
        let mut storage = MemoryStorage::with_quota(8);
        storage.write("k", "small").unwrap();
        let err = storage.write("k", "much too large").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { needed: 14, quota: 8 }));
        assert_eq!(storage.read("k").unwrap().as_deref(), Some("small"));
    }

    #[test]
    fn file_stems_are_filesystem_safe() {
        assert_eq!(file_stem_for("My cool  app"), "My_cool_app");
        assert_eq!(file_stem_for("a/b\\c:d"), "abcd");
        assert_eq!(file_stem_for("   "), "creation");
        assert_eq!(file_stem_for("..."), "creation");
    }

    #[test]
    fn write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a/b/out.html");
        write_file(&p, b"<p/>").unwrap();
        assert_eq!(std::fs::read(&p).unwrap(), b"<p/>");
    }
}
