//! Library maintenance jobs over the Web API.
//!
//! Each job returns one log row per item it considered. With `dry_run` the
//! rows describe what would happen and the library is left untouched.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::api::{ZoteroApi, ZoteroItem};
use crate::error::Result;
use crate::normalize::normalize_spaced;
use crate::progress::{create_progress_bar, finish_phase};
use crate::review::best_pdf_match;

static STORAGE_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"/storage/([^/]+)/").unwrap());

pub const LINKED_FILE: &str = "linked_file";
pub const IMPORTED_FILE: &str = "imported_file";

/// Keys kept on a type change even though `/itemFields` does not list them.
const STRUCTURAL_KEYS: [&str; 7] = [
    "key",
    "version",
    "itemType",
    "creators",
    "tags",
    "collections",
    "relations",
];

const DRY_RUN: &str = "Dry run";

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ============================================================================
// Type Remap
// ============================================================================

pub const TYPE_REMAP_HEADER: [&str; 5] = ["key", "old_type", "new_type", "removed_fields", "status"];

#[derive(Debug, Clone, Serialize)]
pub struct TypeRemapRow {
    pub key: String,
    pub old_type: String,
    pub new_type: String,
    pub removed_fields: String,
    pub status: String,
}

pub fn remapped_item_type(item_type: &str) -> Option<&'static str> {
    match item_type.to_lowercase().as_str() {
        "report" | "thesis" | "online" | "electronic" => Some("presentation"),
        _ => None,
    }
}

pub fn remap_types(api: &dyn ZoteroApi, dry_run: bool) -> Result<Vec<TypeRemapRow>> {
    let items = api.items(None)?;
    let targets: Vec<&ZoteroItem> = items
        .iter()
        .filter(|i| remapped_item_type(i.item_type()).is_some())
        .collect();
    if targets.is_empty() {
        return Ok(Vec::new());
    }
    let valid = api.item_fields()?;

    let pb = create_progress_bar(targets.len() as u64, "Remapping item types");
    let mut rows = Vec::with_capacity(targets.len());
    for item in targets {
        let old_type = item.item_type().to_lowercase();
        let new_type = remapped_item_type(&old_type).unwrap_or("presentation");

        let mut data = item.data.clone();
        data.insert("itemType".into(), Value::String(new_type.to_string()));
        let removed: Vec<String> = data
            .keys()
            .filter(|k| !valid.contains(k.as_str()) && !STRUCTURAL_KEYS.contains(&k.as_str()))
            .cloned()
            .collect();
        for field in &removed {
            data.remove(field);
        }

        let status = if dry_run {
            DRY_RUN.to_string()
        } else {
            match api.update_item(&item.key, item.version, &data) {
                Ok(()) => "Updated".to_string(),
                Err(e) => {
                    warn!(key = %item.key, error = %e, "type update failed");
                    format!("Error: {e}")
                }
            }
        };
        info!(key = %item.key, %old_type, %new_type, %status, "type remap");
        rows.push(TypeRemapRow {
            key: item.key.clone(),
            old_type,
            new_type: new_type.to_string(),
            removed_fields: removed.join(", "),
            status,
        });
        pb.inc(1);
    }
    finish_phase(&pb, format!("Remapped {} items", rows.len()));
    Ok(rows)
}

// ============================================================================
// Relink From Storage
// ============================================================================

pub const RELINK_HEADER: [&str; 4] = ["itemKey", "Title", "PDF", "Action"];

#[derive(Debug, Clone, Serialize)]
pub struct RelinkRow {
    #[serde(rename = "itemKey")]
    pub item_key: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "PDF")]
    pub pdf: String,
    #[serde(rename = "Action")]
    pub action: String,
}

fn first_pdf(folder: &Path) -> Option<PathBuf> {
    let mut pdfs: Vec<PathBuf> = std::fs::read_dir(folder)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .map(|e| e.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();
    pdfs.sort();
    pdfs.into_iter().next()
}

/// Attach `<storage>/<key>/<first pdf>` to items of an attachable type that
/// have no attachment yet.
pub fn relink(
    api: &dyn ZoteroApi,
    storage: &Path,
    attachable_types: &[String],
    dry_run: bool,
) -> Result<Vec<RelinkRow>> {
    let items = api.items(None)?;
    let attachments = api.items(Some("attachment"))?;
    let parents: FxHashSet<&str> = attachments.iter().filter_map(|a| a.parent_item()).collect();

    let mut rows = Vec::new();
    for item in items
        .iter()
        .filter(|i| attachable_types.iter().any(|t| t == i.item_type()))
    {
        let row = |pdf: &str, action: &str| RelinkRow {
            item_key: item.key.clone(),
            title: item.title().to_string(),
            pdf: pdf.to_string(),
            action: action.to_string(),
        };

        if parents.contains(item.key.as_str()) {
            rows.push(row("", "Attachment exists, skipping"));
            continue;
        }
        let folder = storage.join(&item.key);
        if !folder.is_dir() {
            rows.push(row("", "Storage folder missing"));
            continue;
        }
        let Some(pdf) = first_pdf(&folder) else {
            rows.push(row("", "No PDF found in folder"));
            continue;
        };
        let name = file_name(&pdf.to_string_lossy());

        if dry_run {
            rows.push(row(&name, "Would create attachment [DRY RUN]"));
            continue;
        }
        match api.create_linked_attachment(&item.key, &pdf) {
            Ok(new_key) => {
                info!(key = %item.key, attachment = %new_key, pdf = %name, "attachment created");
                rows.push(row(&name, "Attachment created"));
            }
            Err(e) => {
                warn!(key = %item.key, error = %e, "attachment failed");
                rows.push(row(&name, &format!("Failed to create attachment: {e}")));
            }
        }
    }
    Ok(rows)
}

// ============================================================================
// Fix Linked Paths
// ============================================================================

pub const FIX_LINKS_HEADER: [&str; 4] = ["key", "old_path", "new_path", "status"];

#[derive(Debug, Clone, Serialize)]
pub struct FixLinkRow {
    pub key: String,
    pub old_path: String,
    pub new_path: String,
    pub status: String,
}

/// Point linked files under `bad_prefix` back into `<storage>/<k>/`, where
/// `<k>` is taken from a `/storage/<k>/` segment of the old path.
pub fn fix_links(
    api: &dyn ZoteroApi,
    storage: &Path,
    bad_prefix: &str,
    dry_run: bool,
) -> Result<Vec<FixLinkRow>> {
    let attachments = api.items(Some("attachment"))?;
    let mut rows = Vec::new();

    for att in attachments
        .iter()
        .filter(|a| a.link_mode() == LINKED_FILE && a.path().contains(bad_prefix))
    {
        let old_path = att.path().to_string();
        let Some(caps) = STORAGE_KEY.captures(&old_path) else {
            rows.push(FixLinkRow {
                key: att.key.clone(),
                old_path,
                new_path: String::new(),
                status: "No storage key found".to_string(),
            });
            continue;
        };
        let new_path = storage.join(&caps[1]).join(file_name(&old_path));
        let new_path_str = new_path.to_string_lossy().into_owned();

        let status = if new_path_str == old_path {
            "Already correct".to_string()
        } else if !new_path.exists() {
            "New path does not exist yet".to_string()
        } else if dry_run {
            DRY_RUN.to_string()
        } else {
            let mut data = att.data.clone();
            data.insert("path".into(), Value::String(new_path_str.clone()));
            match api.update_item(&att.key, att.version, &data) {
                Ok(()) => "Updated".to_string(),
                Err(e) => {
                    warn!(key = %att.key, error = %e, "path update failed");
                    format!("Update failed: {e}")
                }
            }
        };
        rows.push(FixLinkRow {
            key: att.key.clone(),
            old_path,
            new_path: new_path_str,
            status,
        });
    }
    Ok(rows)
}

// ============================================================================
// Cleanup Broken Imports
// ============================================================================

pub const CLEANUP_HEADER: [&str; 3] = ["key", "path", "deleted"];

#[derive(Debug, Clone, Serialize)]
pub struct CleanupRow {
    pub key: String,
    pub path: String,
    pub deleted: bool,
}

pub fn is_broken_import(att: &ZoteroItem, broken_prefixes: &[String]) -> bool {
    att.link_mode() == IMPORTED_FILE
        && broken_prefixes.iter().any(|p| att.path().starts_with(p.as_str()))
}

pub fn cleanup_attachments(
    api: &dyn ZoteroApi,
    broken_prefixes: &[String],
    dry_run: bool,
) -> Result<Vec<CleanupRow>> {
    let attachments = api.items(Some("attachment"))?;
    let mut rows = Vec::new();
    for att in attachments.iter().filter(|a| is_broken_import(a, broken_prefixes)) {
        let deleted = if dry_run {
            println!("[dry-run] would delete: {} ({})", att.key, att.path());
            false
        } else {
            match api.delete_item(&att.key, att.version) {
                Ok(()) => true,
                Err(e) => {
                    warn!(key = %att.key, error = %e, "delete failed");
                    false
                }
            }
        };
        rows.push(CleanupRow {
            key: att.key.clone(),
            path: att.path().to_string(),
            deleted,
        });
    }
    Ok(rows)
}

// ============================================================================
// Citation Key Lines in Extra
// ============================================================================

pub const CITEKEY_EXTRA_HEADER: [&str; 3] = ["key", "removed", "status"];

#[derive(Debug, Clone, Serialize)]
pub struct CitekeyExtraRow {
    pub key: String,
    pub removed: String,
    pub status: String,
}

fn is_citekey_line(line: &str) -> bool {
    line.trim().to_lowercase().starts_with("citation key:")
}

/// `extra` without its `Citation Key:` lines, or `None` when it has none.
pub fn strip_citekey_lines(extra: &str) -> Option<String> {
    if !extra.lines().any(is_citekey_line) {
        return None;
    }
    let kept: Vec<&str> = extra.lines().filter(|l| !is_citekey_line(l)).collect();
    Some(kept.join("\n"))
}

/// Drop the `Citation Key:` lines an older Better BibTeX left in top-level Extra fields.
pub fn clean_citekey_extra(api: &dyn ZoteroApi, dry_run: bool) -> Result<Vec<CitekeyExtraRow>> {
    let items = api.items(None)?;
    let mut rows = Vec::new();
    for item in items.iter().filter(|i| i.parent_item().is_none()) {
        let extra = item.field("extra");
        let Some(cleaned) = strip_citekey_lines(extra) else {
            continue;
        };
        let removed: Vec<&str> = extra.lines().filter(|l| is_citekey_line(l)).map(str::trim).collect();

        let status = if dry_run {
            DRY_RUN.to_string()
        } else {
            let mut data = item.data.clone();
            data.insert("extra".into(), Value::String(cleaned));
            match api.update_item(&item.key, item.version, &data) {
                Ok(()) => {
                    info!(key = %item.key, "removed citation key from extra");
                    "Updated".to_string()
                }
                Err(e) => {
                    warn!(key = %item.key, error = %e, "extra update failed");
                    format!("Error: {e}")
                }
            }
        };
        rows.push(CitekeyExtraRow {
            key: item.key.clone(),
            removed: removed.join(" | "),
            status,
        });
    }
    Ok(rows)
}

// ============================================================================
// Sanity Check
// ============================================================================

pub const SANITY_HEADER: [&str; 5] = [
    "itemKey",
    "filename",
    "storageFolderExists",
    "pdfExists",
    "fullExpectedPath",
];

#[derive(Debug, Clone, Serialize)]
pub struct SanityRow {
    #[serde(rename = "itemKey")]
    pub item_key: String,
    pub filename: String,
    #[serde(rename = "storageFolderExists")]
    pub storage_folder_exists: bool,
    #[serde(rename = "pdfExists")]
    pub pdf_exists: bool,
    #[serde(rename = "fullExpectedPath")]
    pub full_expected_path: String,
}

pub fn sanity_check(api: &dyn ZoteroApi, storage: &Path) -> Result<Vec<SanityRow>> {
    let attachments = api.items(Some("attachment"))?;
    let rows = attachments
        .iter()
        .filter(|a| a.link_mode() == LINKED_FILE && !a.path().is_empty())
        .map(|att| {
            let filename = file_name(att.path());
            let folder = storage.join(&att.key);
            let expected = folder.join(&filename);
            SanityRow {
                item_key: att.key.clone(),
                storage_folder_exists: folder.is_dir(),
                pdf_exists: expected.exists(),
                full_expected_path: expected.to_string_lossy().into_owned(),
                filename,
            }
        })
        .collect();
    Ok(rows)
}

// ============================================================================
// Link PDFs By Title
// ============================================================================

pub const LINK_PDFS_HEADER: [&str; 4] = ["Key", "Title", "PDF", "Action"];

#[derive(Debug, Clone, Serialize)]
pub struct LinkPdfRow {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "PDF")]
    pub pdf: String,
    #[serde(rename = "Action")]
    pub action: String,
}

pub struct LinkPdfOptions<'a> {
    pub pdf_dir: &'a Path,
    pub attachable_types: &'a [String],
    pub threshold: f64,
    pub full_paths: bool,
    pub dry_run: bool,
}

fn already_linked(children: &[ZoteroItem], expected: &str) -> bool {
    children.iter().any(|c| {
        c.link_mode() == LINKED_FILE && file_name(c.path()).eq_ignore_ascii_case(expected)
    })
}

/// Link each attachable item to `<key>.pdf`, or failing that to the PDF whose
/// name best matches its title. `titles` maps spaced-normalized BibTeX titles
/// to citation keys.
pub fn link_pdfs(
    api: &dyn ZoteroApi,
    titles: &FxHashMap<String, String>,
    pdfs: &[PathBuf],
    opts: &LinkPdfOptions<'_>,
) -> Result<Vec<LinkPdfRow>> {
    let items = api.items(None)?;
    let targets: Vec<&ZoteroItem> = items
        .iter()
        .filter(|i| opts.attachable_types.iter().any(|t| t == i.item_type()))
        .collect();

    let display = |path: &Path| -> String {
        if opts.full_paths {
            path.to_string_lossy().into_owned()
        } else {
            file_name(&path.to_string_lossy())
        }
    };

    let pb = create_progress_bar(targets.len() as u64, "Matching items");
    let mut rows = Vec::with_capacity(targets.len());
    for item in targets {
        pb.inc(1);
        let title = item.title().to_string();
        let Some(citekey) = titles.get(&normalize_spaced(&title)) else {
            rows.push(LinkPdfRow {
                key: item.key.clone(),
                title,
                pdf: String::new(),
                action: "No citekey found in BibTeX".to_string(),
            });
            continue;
        };

        let expected_name = format!("{citekey}.pdf");
        let expected_path = opts.pdf_dir.join(&expected_name);
        let children = match api.children(&item.key) {
            Ok(c) => c,
            Err(e) => {
                warn!(key = %item.key, error = %e, "children lookup failed");
                Vec::new()
            }
        };

        let (pdf, action) = if already_linked(&children, &expected_name) {
            (display(&expected_path), "Already linked".to_string())
        } else if expected_path.exists() {
            let action = if opts.dry_run {
                "Filename correct, ready to link [DRY RUN]".to_string()
            } else {
                attach(api, &item.key, &expected_path, "Linked existing file")
            };
            (display(&expected_path), action)
        } else {
            match best_pdf_match(&title, pdfs).filter(|(_, s)| *s > opts.threshold) {
                Some((pdf, score)) => {
                    let action = if opts.dry_run {
                        format!("Match found (score {score:.2}) [DRY RUN]")
                    } else {
                        attach(api, &item.key, pdf, &format!("Matched and linked (score {score:.2})"))
                    };
                    (display(pdf), action)
                }
                None => (String::new(), "No matching PDF found".to_string()),
            }
        };

        rows.push(LinkPdfRow {
            key: citekey.clone(),
            title,
            pdf,
            action,
        });
    }
    finish_phase(&pb, format!("Matched {} items", rows.len()));
    Ok(rows)
}

fn attach(api: &dyn ZoteroApi, parent: &str, pdf: &Path, ok: &str) -> String {
    match api.create_linked_attachment(parent, pdf) {
        Ok(_) => ok.to_string(),
        Err(e) => {
            warn!(%parent, error = %e, "link failed");
            format!("Link failed: {e}")
        }
    }
}
