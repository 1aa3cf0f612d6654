//! The link cache: one CSV row of cross-system links per citation key.
//!
//! Every run that touches the table opens a [`LinkCache`] transaction. It
//! holds `<table>.lock` for its lifetime, works on an in-memory copy and only
//! replaces the table on [`LinkCache::commit`].
//!
//! The lock file names its owner as `<pid> <timestamp>`. A lock whose owner
//! is no longer running (or is this process, which means an earlier holder
//! never ran its destructor) is taken over.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::Local;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::models::LinkRecord;
use crate::safety::write_atomic;

pub struct LinkCache {
    path: PathBuf,
    lock_path: PathBuf,
    lock_token: String,
    records: Vec<LinkRecord>,
    dirty: bool,
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Whether process `pid` is still running.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    match Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(Stdio::null())
        .output()
    {
        Ok(out) if out.status.success() => true,
        // Another user's process
        Ok(out) => String::from_utf8_lossy(&out.stderr).contains("ermitted"),
        Err(_) => true,
    }
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

/// Owner pid of an existing lock file, `None` when unreadable.
fn lock_owner(lock_path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(lock_path).ok()?;
    content.split_whitespace().next()?.parse().ok()
}

fn is_stale(lock_path: &Path) -> bool {
    match lock_owner(lock_path) {
        Some(pid) => pid == std::process::id() || !process_alive(pid),
        None => true,
    }
}

fn try_create_lock(lock_path: &Path, token: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)?;
    file.write_all(token.as_bytes())?;
    file.sync_all()
}

fn acquire_lock(path: &Path, lock_path: &Path) -> Result<String> {
    let token = format!("{} {}\n", std::process::id(), Local::now().to_rfc3339());
    for attempt in 0..2 {
        match try_create_lock(lock_path, &token) {
            Ok(()) => return Ok(token),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if attempt > 0 || !is_stale(lock_path) {
                    return Err(SyncError::CacheLocked(path.to_path_buf()));
                }
                warn!(lock = %lock_path.display(), "taking over stale link cache lock");
                match std::fs::remove_file(lock_path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(SyncError::io(lock_path, e)),
                }
            }
            Err(e) => return Err(SyncError::io(lock_path, e)),
        }
    }
    Err(SyncError::CacheLocked(path.to_path_buf()))
}

impl LinkCache {
    /// Lock and load the table. A missing table starts empty.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }

        let lock_path = lock_path_for(path);
        let lock_token = acquire_lock(path, &lock_path)?;

        // The lock is released by Drop if loading fails
        let mut cache = Self {
            path: path.to_path_buf(),
            lock_path,
            lock_token,
            records: Vec::new(),
            dirty: false,
        };
        cache.records = read_records(path)?;
        debug!(path = %path.display(), rows = cache.records.len(), "opened link cache");
        Ok(cache)
    }

    pub fn get(&self, key: &str) -> Option<&LinkRecord> {
        self.records.iter().find(|r| r.citation_key == key)
    }

    /// Update the row for `key` in place or append exactly one new row.
    pub fn upsert(&mut self, key: &str, note_link: &str, devonthink_link: &str) {
        self.dirty = true;
        if let Some(row) = self.records.iter_mut().find(|r| r.citation_key == key) {
            row.note_link = note_link.to_string();
            row.devonthink_link = devonthink_link.to_string();
            return;
        }
        self.records.push(LinkRecord {
            citation_key: key.to_string(),
            note_link: note_link.to_string(),
            devonthink_link: devonthink_link.to_string(),
        });
    }

    /// Append an empty row for `key` unless one exists. Returns whether a row was added.
    pub fn ensure(&mut self, key: &str) -> bool {
        if self.get(key).is_some() {
            return false;
        }
        self.upsert(key, "", "");
        true
    }

    pub fn records(&self) -> &[LinkRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the table atomically and release the lock.
    pub fn commit(self) -> Result<()> {
        if !self.dirty && self.path.exists() {
            return Ok(());
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record(["CitationKey", "Note_Link", "DEVONthink_Link"])?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| SyncError::io(&self.path, e.into_error()))?;
        write_atomic(&self.path, &bytes)?;
        debug!(path = %self.path.display(), rows = self.records.len(), "committed link cache");
        Ok(())
    }
}

impl Drop for LinkCache {
    fn drop(&mut self) {
        // A lock taken over by another run is theirs now
        if std::fs::read_to_string(&self.lock_path).ok().as_deref() != Some(self.lock_token.as_str()) {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            warn!(path = %self.lock_path.display(), error = %e, "could not remove link cache lock");
        }
    }
}

fn read_records(path: &Path) -> Result<Vec<LinkRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;

    let mut records = Vec::new();
    // Keyless rows are kept so a commit writes them back untouched
    for row in reader.deserialize::<LinkRecord>() {
        records.push(row?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(dir: &Path) -> PathBuf {
        let path = dir.join("linked_items.csv");
        std::fs::write(
            &path,
            "CitationKey,Note_Link,DEVONthink_Link\na2020,obsidian://a,x-devonthink-item://a\nb2021,obsidian://b,\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_missing_key_appends_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(dir.path());

        let mut cache = LinkCache::open(&path).unwrap();
        cache.upsert("c2022", "obsidian://c", "");
        cache.commit().unwrap();

        let cache = LinkCache::open(&path).unwrap();
        let keys: Vec<_> = cache.records().iter().map(|r| r.citation_key.as_str()).collect();
        assert_eq!(keys, vec!["a2020", "b2021", "c2022"]);
        assert_eq!(cache.get("a2020").unwrap().devonthink_link, "x-devonthink-item://a");
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(dir.path());

        let mut cache = LinkCache::open(&path).unwrap();
        cache.upsert("a2020", "obsidian://new", "x-devonthink-item://new");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.records()[0].note_link, "obsidian://new");
    }

    #[test]
    fn test_ensure_adds_empty_row_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(dir.path());

        let mut cache = LinkCache::open(&path).unwrap();
        assert!(!cache.ensure("a2020"));
        assert!(cache.ensure("d2023"));
        assert!(!cache.ensure("d2023"));
        cache.commit().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("d2023,,\n"));
        let cache = LinkCache::open(&path).unwrap();
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a2020").unwrap().note_link, "obsidian://a");
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_held_by_live_process_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(dir.path());
        let lock = dir.path().join("linked_items.csv.lock");

        let mut other = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(&lock, format!("{} 2024-01-01T00:00:00+00:00\n", other.id())).unwrap();
        assert!(matches!(LinkCache::open(&path), Err(SyncError::CacheLocked(_))));

        other.kill().unwrap();
        other.wait().unwrap();
        assert!(LinkCache::open(&path).is_ok());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(dir.path());
        let lock = dir.path().join("linked_items.csv.lock");

        let cache = LinkCache::open(&path).unwrap();
        let owner = std::fs::read_to_string(&lock).unwrap();
        assert!(owner.starts_with(&format!("{} ", std::process::id())));
        drop(cache);
        assert!(!lock.exists());
    }

    #[test]
    fn test_lock_left_by_vanished_run_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(dir.path());

        let cache = LinkCache::open(&path).unwrap();
        std::mem::forget(cache);

        let mut cache = LinkCache::open(&path).unwrap();
        cache.upsert("c2022", "obsidian://c", "");
        cache.commit().unwrap();
        assert!(!dir.path().join("linked_items.csv.lock").exists());
        assert_eq!(LinkCache::open(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_unreadable_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(dir.path());
        std::fs::write(dir.path().join("linked_items.csv.lock"), "").unwrap();
        assert!(LinkCache::open(&path).is_ok());
    }

    #[test]
    fn test_keyless_rows_survive_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linked_items.csv");
        std::fs::write(
            &path,
            "CitationKey,Note_Link,DEVONthink_Link\na2020,obsidian://a,\n,obsidian://orphan,x-devonthink-item://o\n",
        )
        .unwrap();

        let mut cache = LinkCache::open(&path).unwrap();
        cache.upsert("b2021", "obsidian://b", "");
        cache.commit().unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "CitationKey,Note_Link,DEVONthink_Link\n\
             a2020,obsidian://a,\n\
             ,obsidian://orphan,x-devonthink-item://o\n\
             b2021,obsidian://b,\n"
        );
    }

    #[test]
    fn test_uncommitted_changes_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed(dir.path());
        let before = std::fs::read_to_string(&path).unwrap();

        let mut cache = LinkCache::open(&path).unwrap();
        cache.upsert("z", "obsidian://z", "");
        drop(cache);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        assert!(!dir.path().join("linked_items.csv.lock").exists());
    }

    #[test]
    fn test_missing_table_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("links.csv");

        let mut cache = LinkCache::open(&path).unwrap();
        assert!(cache.is_empty());
        cache.upsert("k", "n", "d");
        cache.commit().unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "CitationKey,Note_Link,DEVONthink_Link\nk,n,d\n"
        );
    }
}
