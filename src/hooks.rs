//! Hookmark linking between notes, DEVONthink documents and Zotero items.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::bibliography::CslLibrary;
use crate::devonthink::clean_query;
use crate::error::{Result, SyncError};
use crate::link_cache::LinkCache;
use crate::models::CslItem;
use crate::notes::{refresh_note, zotero_select_uri, NoteContext};
use crate::progress::{create_spinner, finish_phase};

pub const HOOK_LOG_HEADER: [&str; 4] = ["CitationKey", "Note_Link", "DEVONthink_Link", "Status"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookStatus {
    Linked,
    Skipped,
}

impl HookStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HookStatus::Linked => "linked",
            HookStatus::Skipped => "skipped",
        }
    }
}

#[derive(Clone, Debug)]
pub struct HookRow {
    pub key: String,
    pub note_link: String,
    pub document_link: String,
    pub status: HookStatus,
}

impl HookRow {
    pub fn fields(&self) -> [&str; 4] {
        [
            &self.key,
            &self.note_link,
            &self.document_link,
            self.status.as_str(),
        ]
    }
}

/// "Given Family Given Family Title", whitespace collapsed.
pub fn document_query(item: &CslItem) -> String {
    let names: Vec<String> = item.author.iter().map(|a| a.full_name()).collect();
    clean_query(&format!("{} {}", names.join(" "), item.title.as_deref().unwrap_or("")))
}

/// Citation keys to process: one (case-insensitive) or the whole library.
pub fn select_keys(library: &CslLibrary, citekey: Option<&str>) -> Result<Vec<String>> {
    match citekey {
        Some(key) => Ok(vec![library.require(key)?.id.clone()]),
        None => Ok(library.iter().map(|i| i.id.clone()).collect()),
    }
}

/// Link one item's note, document and Zotero entry, refreshing its note first
/// when the cache row is missing or incomplete.
pub fn hook_item(ctx: &NoteContext<'_>, cache: &mut LinkCache, item: &CslItem) -> HookRow {
    let needs_refresh = cache.get(&item.id).map_or(true, |r| !r.is_complete());
    if needs_refresh {
        if let Err(e) = refresh_note(ctx, cache, item) {
            warn!(key = %item.id, error = %e, "note refresh failed");
        }
    }

    let (note_link, cached_doc) = cache
        .get(&item.id)
        .map(|r| (r.note_link.clone(), r.devonthink_link.clone()))
        .unwrap_or_default();

    let document_link = if !cached_doc.is_empty() {
        cached_doc
    } else if ctx.config.features.pdf_in_devonthink {
        ctx.store
            .find_document(&document_query(item))
            .or_else(|| ctx.store.find_document(&item.id))
            .unwrap_or_default()
    } else {
        String::new()
    };

    if note_link.is_empty() || document_link.is_empty() {
        info!(key = %item.id, "missing note or DEVONthink link");
        return HookRow {
            key: item.id.clone(),
            note_link,
            document_link,
            status: HookStatus::Skipped,
        };
    }

    let zotero = zotero_select_uri(&item.id);
    let mut status = HookStatus::Linked;
    for (a, b) in [
        (&note_link, &document_link),
        (&note_link, &zotero),
        (&document_link, &zotero),
    ] {
        if let Err(e) = ctx.linker.link(a, b) {
            warn!(key = %item.id, error = %e, "hook link failed");
            status = HookStatus::Skipped;
        }
    }

    HookRow {
        key: item.id.clone(),
        note_link,
        document_link,
        status,
    }
}

// ============================================================================
// Vault Mode
// ============================================================================

/// Every `@<key>.md` note under `vault`, sorted by path.
pub fn vault_notes(vault: &Path) -> Result<Vec<PathBuf>> {
    let spinner = create_spinner("Scanning vault");
    let mut notes = Vec::new();
    let mut stack = vec![vault.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| SyncError::io(&dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| SyncError::io(&dir, e))?.path();
            if path.is_dir() {
                stack.push(path);
            } else if is_literature_note(&path) {
                notes.push(path);
                spinner.set_message(format!("Scanning vault: {} literature notes", notes.len()));
            }
        }
    }
    notes.sort();
    finish_phase(&spinner, format!("Found {} literature notes", notes.len()));
    Ok(notes)
}

fn is_literature_note(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.starts_with('@') && name.ends_with(".md")
}

pub fn note_citekey(path: &Path) -> Option<&str> {
    path.file_stem()?.to_str()?.strip_prefix('@')
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VaultHookReport {
    pub hooked: Vec<String>,
    pub missing: Vec<String>,
    pub failed: Vec<String>,
}

/// Hook each vault note to the Zotero item carrying its citation key.
/// `item_keys` maps citation keys to Zotero item keys.
pub fn hook_vault(
    vault: &Path,
    item_keys: &FxHashMap<String, String>,
    linker: &dyn crate::hookmark::LinkHelper,
) -> Result<VaultHookReport> {
    let mut report = VaultHookReport::default();
    for note in vault_notes(vault)? {
        let Some(key) = note_citekey(&note) else {
            continue;
        };
        match item_keys.get(key) {
            Some(item_key) => {
                let uri = format!("zotero://select/items/{item_key}");
                match linker.link_named(key, &uri, &note.to_string_lossy()) {
                    Ok(()) => report.hooked.push(key.to_string()),
                    Err(e) => {
                        warn!(%key, error = %e, "hook link failed");
                        report.failed.push(key.to_string());
                    }
                }
            }
            None => {
                warn!(%key, "no Zotero item found");
                report.missing.push(key.to_string());
            }
        }
    }
    Ok(report)
}
