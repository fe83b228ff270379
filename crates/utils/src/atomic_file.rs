//! Atomic file operations so a crash never leaves a half-written store file

use quotevault_core::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Replace `path` with `content` by writing a sibling temp file, syncing it
/// and renaming it over the target.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        Error::configuration(format!("'{}' has no parent directory", path.display()))
    })?;

    fs::create_dir_all(parent)
        .map_err(|e| Error::file_system(parent, "create parent directory", e))?;

    // Same directory as the target so the rename never crosses a filesystem
    let temp_path = temp_sibling(parent, path);

    if let Err(e) = write_synced(&temp_path, content) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::file_system(path, "atomic rename", e));
    }

    sync_dir(parent);
    Ok(())
}

/// Write string content to a file atomically
pub fn write_atomic_string(path: &Path, content: &str) -> Result<()> {
    write_atomic(path, content.as_bytes())
}

/// Read a file, treating a missing file as `None`
pub fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::file_system(path, "read", e)),
    }
}

fn temp_sibling(parent: &Path, target: &Path) -> PathBuf {
    let stem = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent.join(format!(".{stem}.{}.tmp", Uuid::new_v4()))
}

fn write_synced(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| Error::file_system(path, "create temporary file", e))?;
    file.write_all(content)
        .map_err(|e| Error::file_system(path, "write temporary file", e))?;
    file.sync_all()
        .map_err(|e| Error::file_system(path, "sync temporary file", e))
}

// Best effort: persists the rename itself on filesystems that need it
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_and_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("fallback.json");

        write_atomic_string(&file_path, "{}").unwrap();
        write_atomic_string(&file_path, "{\"a\":1}").unwrap();

        assert_eq!(fs::read_to_string(&file_path).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn creates_missing_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("primary").join("schema.json");

        write_atomic(&file_path, b"1").unwrap();

        assert!(file_path.exists());
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let temp_dir = TempDir::new().unwrap();
        write_atomic(&temp_dir.path().join("x"), b"data").unwrap();

        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("x")]);
    }

    #[test]
    fn missing_file_reads_as_none() {
        let temp_dir = TempDir::new().unwrap();
        assert!(read_if_exists(&temp_dir.path().join("nope")).unwrap().is_none());
    }
}
