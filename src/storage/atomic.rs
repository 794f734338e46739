//! Write-temp-then-rename persistence
//!
//! Every state file is replaced as a whole: the new content goes to a sibling
//! temp file, is flushed to disk, and is then renamed over the canonical path.
//! A reader sees either the previous file or the new one, never a torn write,
//! and a crash before the rename leaves the previous file untouched.

use super::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Sibling temp path used while replacing `path`
///
/// The temp file lives in the same directory so the rename never crosses a
/// filesystem boundary.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Atomically replaces `path` with `bytes`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }

    let tmp = temp_path_for(path);
    let written = File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp, path));

    if let Err(e) = written {
        // Leave the canonical file alone; the temp file is garbage now.
        let _ = fs::remove_file(&tmp);
        return Err(StorageError::io(path, e));
    }

    sync_parent_dir(path);
    Ok(())
}

/// Serializes `value` as pretty JSON and atomically replaces `path`
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StorageResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

/// Reads a JSON state file
///
/// Returns `Ok(None)` if the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StorageError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    // Makes the rename itself durable. Best effort: not every filesystem
    // supports fsync on a directory handle.
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_temp_path_is_sibling() {
        let tmp = temp_path_for(Path::new("/state/checkpoint.json"));
        assert_eq!(tmp, PathBuf::from("/state/.checkpoint.json.tmp"));
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("data.json");

        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1u32);
        write_json_atomic(&path, &value).unwrap();

        let loaded: Option<BTreeMap<String, u32>> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(value));
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Vec<u32>> = read_json(&dir.path().join("missing.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_read_corrupt_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result: StorageResult<Option<Vec<u32>>> = read_json(&path);
        assert!(matches!(result, Err(StorageError::Corrupt { .. })));
    }

    #[test]
    fn test_failed_rename_keeps_nothing_half_written() {
        let dir = TempDir::new().unwrap();
        // A directory squatting on the target path makes the rename fail.
        let path = dir.path().join("target.json");
        std::fs::create_dir(&path).unwrap();

        let result = write_atomic(&path, b"[1,2,3]");
        assert!(matches!(result, Err(StorageError::Io { .. })));
        assert!(path.is_dir());
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_overwrite_replaces_whole_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");

        write_atomic(&path, b"[1,2,3,4,5,6,7,8,9]").unwrap();
        write_atomic(&path, b"[1]").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1]");
    }
}
