//! Direct repairs on a local `zotero.sqlite`.
//!
//! Zotero must be closed while these run. Mutating jobs back the database up
//! first and apply all updates inside one transaction.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::progress::{create_progress_bar, finish_phase};
use crate::safety::backup_file;

static TEX_URI: Lazy<Regex> = Lazy::new(|| Regex::new(r"tex\.uri\s*:").unwrap());

pub fn open(path: &Path) -> Result<Connection> {
    if !path.exists() {
        return Err(SyncError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "database not found"),
        ));
    }
    Ok(Connection::open(path)?)
}

pub fn open_read_only(path: &Path) -> Result<Connection> {
    Ok(Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?)
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ============================================================================
// Inspect
// ============================================================================

pub const INSPECT_HEADER: [&str; 7] = [
    "itemKey",
    "badPath",
    "expectedFilename",
    "storageFolderExists",
    "pdfInStorage",
    "pdfInSourceFolder",
    "actionNeeded",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairAction {
    #[serde(rename = "Already in storage")]
    AlreadyInStorage,
    #[serde(rename = "Missing PDF in source folder")]
    MissingInSource,
    #[serde(rename = "Needs copy to storage")]
    NeedsCopy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InspectRow {
    #[serde(rename = "itemKey")]
    pub item_key: String,
    #[serde(rename = "badPath")]
    pub bad_path: String,
    #[serde(rename = "expectedFilename")]
    pub expected_filename: String,
    #[serde(rename = "storageFolderExists")]
    pub storage_folder_exists: bool,
    #[serde(rename = "pdfInStorage")]
    pub pdf_in_storage: bool,
    #[serde(rename = "pdfInSourceFolder")]
    pub pdf_in_source_folder: bool,
    #[serde(rename = "actionNeeded")]
    pub action_needed: RepairAction,
}

/// `LIKE` pattern matching any value that contains `needle` literally.
/// Use with `ESCAPE '\\'`.
pub fn like_contains(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Report attachments whose path still contains `bad_prefix`.
pub fn inspect(conn: &Connection, bad_prefix: &str, storage: &Path, pdf_dir: &Path) -> Result<Vec<InspectRow>> {
    let mut stmt = conn.prepare(
        "SELECT i.key, a.path
         FROM itemAttachments a
         JOIN items i ON a.itemID = i.itemID
         WHERE a.path LIKE ?1 ESCAPE '\\'
         ORDER BY a.itemID",
    )?;
    let mut rows = stmt.query([like_contains(bad_prefix)])?;

    let mut report = Vec::new();
    while let Some(row) = rows.next()? {
        let item_key: String = row.get(0)?;
        let bad_path: String = row.get(1)?;
        // LIKE is case-insensitive for ASCII
        if !bad_path.contains(bad_prefix) {
            continue;
        }
        let expected_filename = file_name(&bad_path);

        let folder = storage.join(&item_key);
        let pdf_in_storage = folder.join(&expected_filename).exists();
        let pdf_in_source_folder = pdf_dir.join(&expected_filename).exists();
        let action_needed = if pdf_in_storage {
            RepairAction::AlreadyInStorage
        } else if !pdf_in_source_folder {
            RepairAction::MissingInSource
        } else {
            RepairAction::NeedsCopy
        };

        report.push(InspectRow {
            storage_folder_exists: folder.is_dir(),
            item_key,
            bad_path,
            expected_filename,
            pdf_in_storage,
            pdf_in_source_folder,
            action_needed,
        });
    }
    info!(count = report.len(), "attachments with bad paths");
    Ok(report)
}

// ============================================================================
// Fix Paths
// ============================================================================

pub const PATH_FIX_HEADER: [&str; 3] = ["itemID", "old_path", "new_path"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PathFixRow {
    #[serde(rename = "itemID")]
    pub item_id: i64,
    pub old_path: String,
    pub new_path: String,
}

/// The part of `path` after the last occurrence of `prefix`, without a
/// leading separator.
pub fn strip_prefix_path(path: &str, prefix: &str) -> Option<String> {
    let (_, tail) = path.rsplit_once(prefix)?;
    Some(tail.trim_start_matches(['/', '\\']).to_string())
}

/// Strip `prefix` from every attachment path containing it, in one transaction.
pub fn fix_paths(conn: &mut Connection, prefix: &str, dry_run: bool) -> Result<Vec<PathFixRow>> {
    let prefix = prefix.trim_end_matches('/');
    let tx = conn.transaction()?;
    let mut fixes = Vec::new();
    {
        let mut select = tx.prepare("SELECT itemID, path FROM itemAttachments WHERE path LIKE ?1 ESCAPE '\\' ORDER BY itemID")?;
        let mut rows = select.query([like_contains(prefix)])?;
        while let Some(row) = rows.next()? {
            let item_id: i64 = row.get(0)?;
            let old_path: String = row.get(1)?;
            if let Some(new_path) = strip_prefix_path(&old_path, prefix) {
                fixes.push(PathFixRow {
                    item_id,
                    old_path,
                    new_path,
                });
            }
        }
    }

    if dry_run {
        return Ok(fixes);
    }
    {
        let mut update = tx.prepare_cached("UPDATE itemAttachments SET path = ?1 WHERE itemID = ?2")?;
        for fix in &fixes {
            update.execute(params![fix.new_path, fix.item_id])?;
        }
    }
    tx.commit()?;
    info!(updated = fixes.len(), "attachment paths fixed");
    Ok(fixes)
}

/// Back up the database file, then run [`fix_paths`] on it.
pub fn fix_paths_in_file(db: &Path, prefix: &str, dry_run: bool) -> Result<(Option<PathBuf>, Vec<PathFixRow>)> {
    let backup = if dry_run { None } else { Some(backup_file(db)?) };
    let mut conn = open(db)?;
    let rows = fix_paths(&mut conn, prefix, dry_run)?;
    Ok((backup, rows))
}

// ============================================================================
// Clean Extra
// ============================================================================

pub const EXTRA_HEADER: [&str; 3] = ["itemID", "old_value", "new_value"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExtraFixRow {
    #[serde(rename = "itemID")]
    pub item_id: i64,
    pub old_value: String,
    pub new_value: String,
}

/// Drop `tex.uri:` and `papers2://` lines.
pub fn clean_extra_value(value: &str) -> String {
    value
        .lines()
        .filter(|line| !TEX_URI.is_match(line) && !line.contains("papers2://"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn value_id(tx: &rusqlite::Transaction<'_>, value: &str) -> Result<i64> {
    tx.execute("INSERT OR IGNORE INTO itemDataValues (value) VALUES (?1)", [value])?;
    Ok(tx.query_row(
        "SELECT valueID FROM itemDataValues WHERE value = ?1",
        [value],
        |row| row.get(0),
    )?)
}

/// Clean `extra` fields. Shared value rows are never edited: each item is
/// pointed at a found-or-inserted row holding the cleaned text, and an
/// emptied field is removed.
pub fn clean_extra(conn: &mut Connection, dry_run: bool) -> Result<Vec<ExtraFixRow>> {
    let tx = conn.transaction()?;
    let field_id: Option<i64> = tx
        .query_row("SELECT fieldID FROM fields WHERE fieldName = 'extra'", [], |row| row.get(0))
        .optional()?;
    let Some(field_id) = field_id else {
        warn!("no 'extra' field in schema");
        return Ok(Vec::new());
    };

    let mut fixes = Vec::new();
    {
        let mut stmt = tx.prepare(
            "SELECT d.itemID, v.value
             FROM itemData d
             JOIN itemDataValues v ON d.valueID = v.valueID
             WHERE d.fieldID = ?1
               AND (v.value LIKE '%papers2://%' OR v.value LIKE '%tex.uri%')
             ORDER BY d.itemID",
        )?;
        let mut rows = stmt.query([field_id])?;
        while let Some(row) = rows.next()? {
            let item_id: i64 = row.get(0)?;
            let old_value: String = row.get(1)?;
            let new_value = clean_extra_value(&old_value);
            if new_value != old_value {
                fixes.push(ExtraFixRow {
                    item_id,
                    old_value,
                    new_value,
                });
            }
        }
    }
    debug!(count = fixes.len(), "extra fields to clean");

    if dry_run {
        return Ok(fixes);
    }
    for fix in &fixes {
        if fix.new_value.is_empty() {
            tx.execute(
                "DELETE FROM itemData WHERE itemID = ?1 AND fieldID = ?2",
                params![fix.item_id, field_id],
            )?;
        } else {
            let id = value_id(&tx, &fix.new_value)?;
            tx.execute(
                "UPDATE itemData SET valueID = ?1 WHERE itemID = ?2 AND fieldID = ?3",
                params![id, fix.item_id, field_id],
            )?;
        }
    }
    tx.commit()?;
    info!(updated = fixes.len(), "extra fields cleaned");
    Ok(fixes)
}

// ============================================================================
// Repair Storage
// ============================================================================

pub const STORAGE_REPAIR_HEADER: [&str; 4] = ["itemID", "status", "source_pdf", "storage_folder"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StorageRepairRow {
    #[serde(rename = "itemID")]
    pub item_id: i64,
    pub status: String,
    pub source_pdf: String,
    pub storage_folder: String,
}

/// Storage key and file name for `storage:<file>` (keyed by the attachment)
/// or `storage/<key>/<file>` paths.
pub fn parse_storage_path(path: &str, attachment_key: &str) -> Option<(String, String)> {
    if let Some(file) = path.strip_prefix("storage:") {
        return (!file.is_empty()).then(|| (attachment_key.to_string(), file_name(file)));
    }
    let rest = path.strip_prefix("storage/")?;
    let (key, file) = rest.split_once('/')?;
    if key.is_empty() || file.is_empty() {
        return None;
    }
    Some((key.to_string(), file_name(file)))
}

/// Make sure every storage attachment has its folder and file, copying
/// missing files from `pdf_dir`. Existing files are never overwritten.
pub fn repair_storage(conn: &Connection, storage: &Path, pdf_dir: &Path, dry_run: bool) -> Result<Vec<StorageRepairRow>> {
    let mut stmt = conn.prepare(
        "SELECT a.itemID, a.path, i.key
         FROM itemAttachments a
         JOIN items i ON a.itemID = i.itemID
         WHERE a.path LIKE 'storage%'
         ORDER BY a.itemID",
    )?;
    let attachments: Vec<(i64, String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<_>>()?;

    let pb = create_progress_bar(attachments.len() as u64, "Repairing storage");
    let mut out = Vec::with_capacity(attachments.len());
    for (item_id, path, attachment_key) in attachments {
        pb.inc(1);
        let Some((key, file)) = parse_storage_path(&path, &attachment_key) else {
            out.push(StorageRepairRow {
                item_id,
                status: "Invalid path structure".to_string(),
                source_pdf: String::new(),
                storage_folder: String::new(),
            });
            continue;
        };

        let folder = storage.join(&key);
        let dest = folder.join(&file);
        let source = pdf_dir.join(&file);

        let folder_status = if folder.is_dir() {
            "Storage folder exists".to_string()
        } else if dry_run {
            "Missing storage folder, would create".to_string()
        } else {
            match std::fs::create_dir_all(&folder) {
                Ok(()) => "Storage folder created".to_string(),
                Err(e) => format!("Cannot create folder: {e}"),
            }
        };

        let file_status = if dest.exists() {
            "PDF already present".to_string()
        } else if !source.exists() {
            format!("Source PDF missing: {file}")
        } else if dry_run {
            format!("Would copy {file}")
        } else {
            match std::fs::copy(&source, &dest) {
                Ok(_) => format!("Copied {file}"),
                Err(e) => {
                    warn!(%item_id, error = %e, "copy failed");
                    format!("Copy failed: {e}")
                }
            }
        };

        out.push(StorageRepairRow {
            item_id,
            status: format!("{folder_status}; {file_status}"),
            source_pdf: source.to_string_lossy().into_owned(),
            storage_folder: folder.to_string_lossy().into_owned(),
        });
    }
    finish_phase(&pb, format!("Repaired storage for {} attachments", out.len()));
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// The slice of the Zotero schema these tools touch.
    pub fn schema(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE items (itemID INTEGER PRIMARY KEY, key TEXT NOT NULL UNIQUE);
             CREATE TABLE itemAttachments (
                 itemID INTEGER PRIMARY KEY,
                 parentItemID INTEGER,
                 linkMode INTEGER,
                 path TEXT
             );
             CREATE TABLE fields (fieldID INTEGER PRIMARY KEY, fieldName TEXT UNIQUE);
             CREATE TABLE itemDataValues (valueID INTEGER PRIMARY KEY, value UNIQUE);
             CREATE TABLE itemData (
                 itemID INTEGER,
                 fieldID INTEGER,
                 valueID INTEGER,
                 PRIMARY KEY (itemID, fieldID)
             );
             INSERT INTO fields VALUES (1, 'title'), (16, 'extra');",
        )
        .unwrap();
    }

    fn attachment(conn: &Connection, id: i64, key: &str, path: &str) {
        conn.execute("INSERT INTO items VALUES (?1, ?2)", params![id, key]).unwrap();
        conn.execute(
            "INSERT INTO itemAttachments (itemID, linkMode, path) VALUES (?1, 2, ?2)",
            params![id, path],
        )
        .unwrap();
    }

    #[test]
    fn test_inspect_actions() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("storage");
        let pdfs = dir.path().join("pdfs");
        std::fs::create_dir_all(storage.join("K1")).unwrap();
        std::fs::create_dir_all(&pdfs).unwrap();
        std::fs::write(storage.join("K1/a.pdf"), b"x").unwrap();
        std::fs::write(pdfs.join("b.pdf"), b"x").unwrap();

        let conn = Connection::open_in_memory().unwrap();
        schema(&conn);
        attachment(&conn, 1, "K1", "/lib/BibDesk/a.pdf");
        attachment(&conn, 2, "K2", "/lib/BibDesk/b.pdf");
        attachment(&conn, 3, "K3", "/lib/BibDesk/c.pdf");
        attachment(&conn, 4, "K4", "storage:d.pdf");

        let report = inspect(&conn, "/lib/BibDesk", &storage, &pdfs).unwrap();
        let actions: Vec<RepairAction> = report.iter().map(|r| r.action_needed).collect();
        assert_eq!(
            actions,
            vec![
                RepairAction::AlreadyInStorage,
                RepairAction::NeedsCopy,
                RepairAction::MissingInSource
            ]
        );
        assert!(report[0].storage_folder_exists);
        assert!(!report[1].storage_folder_exists);
        assert_eq!(report[1].expected_filename, "b.pdf");
    }

    #[test]
    fn test_like_wildcards_in_prefix_are_literal() {
        assert_eq!(like_contains("/a_b%c"), "%/a\\_b\\%c%");

        let dir = tempfile::tempdir().unwrap();
        let mut conn = Connection::open_in_memory().unwrap();
        schema(&conn);
        attachment(&conn, 1, "K1", "/lib/my_docs/a.pdf");
        attachment(&conn, 2, "K2", "/lib/myXdocs/b.pdf");
        attachment(&conn, 3, "K3", "/LIB/MY_DOCS/c.pdf");

        let report = inspect(&conn, "/lib/my_docs", dir.path(), dir.path()).unwrap();
        let keys: Vec<&str> = report.iter().map(|r| r.item_key.as_str()).collect();
        assert_eq!(keys, vec!["K1"]);

        let fixes = fix_paths(&mut conn, "/lib/my_docs", false).unwrap();
        assert_eq!(fixes.len(), 1);
        let untouched: String = conn
            .query_row("SELECT path FROM itemAttachments WHERE itemID = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(untouched, "/lib/myXdocs/b.pdf");
    }

    #[test]
    fn test_strip_prefix_path() {
        assert_eq!(
            strip_prefix_path("/Users/me/BibDesk/sub/a.pdf", "/Users/me/BibDesk").as_deref(),
            Some("sub/a.pdf")
        );
        assert_eq!(strip_prefix_path("storage:a.pdf", "/Users/me"), None);
    }

    #[test]
    fn test_fix_paths_in_file_backs_up_and_updates() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("zotero.sqlite");
        {
            let conn = Connection::open(&db).unwrap();
            schema(&conn);
            attachment(&conn, 1, "K1", "attachments:/Users/me/BibDesk/a.pdf");
            attachment(&conn, 2, "K2", "storage:b.pdf");
        }

        let (backup, rows) = fix_paths_in_file(&db, "/Users/me/BibDesk/", false).unwrap();
        assert!(backup.unwrap().exists());
        assert_eq!(
            rows,
            vec![PathFixRow {
                item_id: 1,
                old_path: "attachments:/Users/me/BibDesk/a.pdf".into(),
                new_path: "a.pdf".into(),
            }]
        );
        let conn = Connection::open(&db).unwrap();
        let path: String = conn
            .query_row("SELECT path FROM itemAttachments WHERE itemID = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(path, "a.pdf");
    }

    #[test]
    fn test_fix_paths_dry_run_changes_nothing() {
        let mut conn = Connection::open_in_memory().unwrap();
        schema(&conn);
        attachment(&conn, 1, "K1", "/old/a.pdf");
        let rows = fix_paths(&mut conn, "/old", true).unwrap();
        assert_eq!(rows.len(), 1);
        let path: String = conn
            .query_row("SELECT path FROM itemAttachments WHERE itemID = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(path, "/old/a.pdf");
    }

    #[test]
    fn test_clean_extra_value() {
        assert_eq!(
            clean_extra_value("Citation Key: a\ntex.uri: x\npapers2://publication/uuid/1"),
            "Citation Key: a"
        );
    }

    #[test]
    fn test_clean_extra_never_rewrites_shared_values() {
        let mut conn = Connection::open_in_memory().unwrap();
        schema(&conn);
        conn.execute_batch(
            "INSERT INTO itemDataValues VALUES (1, 'note
tex.uri: x');
             INSERT INTO itemDataValues VALUES (2, 'papers2://only');
             INSERT INTO itemData VALUES (10, 16, 1), (11, 16, 1), (12, 16, 2), (13, 1, 1);",
        )
        .unwrap();

        let rows = clean_extra(&mut conn, false).unwrap();
        assert_eq!(rows.len(), 3);

        let original: String = conn
            .query_row("SELECT value FROM itemDataValues WHERE valueID = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(original, "note\ntex.uri: x");

        let cleaned: String = conn
            .query_row(
                "SELECT v.value FROM itemData d JOIN itemDataValues v ON d.valueID = v.valueID
                 WHERE d.itemID = 11 AND d.fieldID = 16",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(cleaned, "note");

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM itemData WHERE itemID = 12", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);

        // title row sharing the value is untouched
        let title_value: i64 = conn
            .query_row("SELECT valueID FROM itemData WHERE itemID = 13", [], |r| r.get(0))
            .unwrap();
        assert_eq!(title_value, 1);
    }

    #[test]
    fn test_parse_storage_path() {
        assert_eq!(
            parse_storage_path("storage:a.pdf", "ATT1"),
            Some(("ATT1".into(), "a.pdf".into()))
        );
        assert_eq!(
            parse_storage_path("storage/K9/b.pdf", "ATT1"),
            Some(("K9".into(), "b.pdf".into()))
        );
        assert_eq!(parse_storage_path("storage:", "ATT1"), None);
        assert_eq!(parse_storage_path("storage/K9", "ATT1"), None);
    }

    #[test]
    fn test_repair_storage_copies_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = dir.path().join("storage");
        let pdfs = dir.path().join("pdfs");
        std::fs::create_dir_all(&pdfs).unwrap();
        std::fs::write(pdfs.join("a.pdf"), b"source").unwrap();
        std::fs::create_dir_all(storage.join("K2")).unwrap();
        std::fs::write(storage.join("K2/b.pdf"), b"kept").unwrap();
        std::fs::write(pdfs.join("b.pdf"), b"other").unwrap();

        let conn = Connection::open_in_memory().unwrap();
        schema(&conn);
        attachment(&conn, 1, "K1", "storage:a.pdf");
        attachment(&conn, 2, "ATT2", "storage/K2/b.pdf");
        attachment(&conn, 3, "K3", "storage:missing.pdf");

        let rows = repair_storage(&conn, &storage, &pdfs, false).unwrap();
        assert_eq!(rows[0].status, "Storage folder created; Copied a.pdf");
        assert_eq!(std::fs::read(storage.join("K1/a.pdf")).unwrap(), b"source");
        assert_eq!(rows[1].status, "Storage folder exists; PDF already present");
        assert_eq!(std::fs::read(storage.join("K2/b.pdf")).unwrap(), b"kept");
        assert!(rows[2].status.ends_with("Source PDF missing: missing.pdf"));
    }
}
