//! Safety utilities to prevent accidental data loss.
//!
//! Logs must never overwrite the files a job reads, databases are copied
//! before they are mutated, and rewritten files are replaced atomically.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tempfile::NamedTempFile;

use crate::error::{Result, SyncError};

/// Validates that an output path is safe to overwrite.
///
/// The output may not be any of the job's inputs (bibliography, link cache,
/// database) and may not be a directory.
pub fn validate_output_path(output: &Path, source_paths: &[&Path]) -> Result<()> {
    if output.is_dir() {
        return Err(SyncError::Config(format!(
            "Safety check failed: output '{}' is a directory",
            output.display()
        )));
    }

    let output_abs = absolute(output);
    for source in source_paths {
        if output == *source || output_abs == absolute(source) {
            return Err(SyncError::Config(format!(
                "Safety check failed: output '{}' cannot be the same as source '{}'",
                output.display(),
                source.display()
            )));
        }
    }

    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Copy `path` next to itself as `<name>.backup-<timestamp>` and return the copy's path.
pub fn backup_file(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| SyncError::Config(format!("cannot back up {}", path.display())))?;
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let backup = path.with_file_name(format!("{name}.backup-{stamp}"));
    std::fs::copy(path, &backup).map_err(|e| SyncError::io(path, e))?;
    Ok(backup)
}

/// Replace `path` with `contents` via a temporary file in the same directory.
/// Readers see either the old or the new file, never a partial one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| SyncError::io(dir, e))?;
    tmp.write_all(contents).map_err(|e| SyncError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| SyncError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| SyncError::io(path, e.error))?;
    Ok(())
}

/// Create the parent directory of a log file if needed.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_output() {
        let output = PathBuf::from("/tmp/rename_log.csv");
        let source = PathBuf::from("/data/library.bib");
        assert!(validate_output_path(&output, &[&source]).is_ok());
    }

    #[test]
    fn test_output_equals_source() {
        let path = PathBuf::from("/data/linked_items.csv");
        let result = validate_output_path(&path, &[&path]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot be the same as source"));
    }

    #[test]
    fn test_output_is_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_output_path(dir.path(), &[]).is_err());
    }

    #[test]
    fn test_backup_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("zotero.sqlite");
        std::fs::write(&db, b"data").unwrap();

        let backup = backup_file(&db).unwrap();
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("zotero.sqlite.backup-"));
        assert_eq!(std::fs::read(&backup).unwrap(), b"data");
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.bib");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
