//! Obsidian literature notes.
//!
//! A note lives at `<vault>/<source material>/<folder>/@<key>.md`. Its YAML
//! front matter is refreshed from CSL-JSON on every run; unknown keys, the
//! `uid` and an existing body are preserved.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::devonthink::{clean_query, DocumentStore};
use crate::error::{Result, SyncError};
use crate::hookmark::LinkHelper;
use crate::link_cache::LinkCache;
use crate::models::CslItem;

static PDF_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"([^/\\]+)\.pdf").unwrap());

// ============================================================================
// Paths & URIs
// ============================================================================

/// Sub-folder for a CSL item type.
pub fn folder_for_type<'a>(item_type: &str, config: &'a Config) -> &'a str {
    match item_type.to_lowercase().as_str() {
        "article-journal" | "paper-conference" | "chapter" => &config.paths.articles,
        "book" | "thesis" => &config.paths.books,
        _ => &config.paths.other,
    }
}

pub fn note_path(vault: &Path, config: &Config, item: &CslItem) -> PathBuf {
    vault
        .join(&config.paths.source_material)
        .join(folder_for_type(&item.item_type, config))
        .join(format!("@{}.md", item.id))
}

pub fn zotero_select_uri(key: &str) -> String {
    format!("zotero://select/items/@{key}")
}

/// Advanced-URI link that survives the note being moved or renamed.
pub fn obsidian_uri(vault: &Path, uid: &str) -> String {
    let vault_name = vault
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        "obsidian://adv-uri?vault={}&uid={}",
        urlencoding::encode(&vault_name),
        uid
    )
}

pub fn hook_file_uri(path: &Path) -> String {
    let abs = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    format!("hook://file/{}", abs.display())
}

/// DEVONthink query for the item's PDF: the attachment name from the `note`
/// field when present, otherwise "families title year".
pub fn pdf_search_term(item: &CslItem) -> String {
    if let Some(caps) = item.note.as_deref().and_then(|n| PDF_NAME.captures(n)) {
        return clean_query(&caps[1]);
    }
    let families: Vec<&str> = item
        .author
        .iter()
        .filter_map(|a| a.family.as_deref())
        .collect();
    clean_query(&format!(
        "{} {} {}",
        families.join(" "),
        item.title.as_deref().unwrap_or(""),
        item.year().unwrap_or_default()
    ))
}

// ============================================================================
// Front Matter
// ============================================================================

/// Split a note into front matter and body. Missing or malformed YAML yields
/// an empty mapping; the body is whatever follows the closing delimiter.
pub fn split_front_matter(content: &str) -> (Mapping, &str) {
    let text = content.trim_start_matches('\u{feff}');
    let mut offset = 0;
    let mut lines = text.split_inclusive('\n');

    match lines.next() {
        Some(first) if first.trim_end() == "---" => offset += first.len(),
        _ => return (Mapping::new(), text),
    }

    let yaml_start = offset;
    for line in lines {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            let yaml = &text[yaml_start..offset];
            let body = &text[offset + line.len()..];
            let meta = match serde_yaml::from_str::<Value>(yaml) {
                Ok(Value::Mapping(m)) => m,
                Ok(_) => Mapping::new(),
                Err(e) => {
                    warn!(error = %e, "malformed note front matter, starting fresh");
                    Mapping::new()
                }
            };
            return (meta, body);
        }
        offset += line.len();
    }

    (Mapping::new(), text)
}

pub fn render_note(meta: &Mapping, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(meta)?;
    Ok(format!("---\n{}---\n\n{}", yaml, body.trim_start_matches(['\n', '\r'])))
}

fn year_value(item: &CslItem) -> Value {
    match item.year() {
        Some(y) => y
            .parse::<u64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or(Value::String(y)),
        None => Value::String(item.year_display()),
    }
}

/// Existing uid, or a fresh UUIDv4.
pub fn ensure_uid(meta: &mut Mapping) -> String {
    let existing = meta.get("uid").and_then(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    match existing {
        Some(uid) => uid,
        None => {
            let uid = Uuid::new_v4().to_string();
            info!(%uid, "generated new note uid");
            meta.insert("uid".into(), Value::String(uid.clone()));
            uid
        }
    }
}

/// Overwrite the managed keys, keeping everything else.
pub fn refresh_metadata(meta: &mut Mapping, item: &CslItem, uid: &str) {
    let set = |meta: &mut Mapping, k: &str, v: Value| {
        meta.insert(Value::String(k.to_string()), v);
    };
    set(meta, "title", Value::String(item.title_or_key().to_string()));
    set(meta, "authors", Value::String(item.authors_display()));
    set(meta, "citation", Value::String(format!("@{}", item.id)));
    set(meta, "year", year_value(item));
    set(meta, "DOI", Value::String(item.doi.clone().unwrap_or_default()));
    set(
        meta,
        "tags",
        Value::Sequence(vec!["literature".into(), "ToRead".into()]),
    );
    set(meta, "URI", Value::String(zotero_select_uri(&item.id)));
    set(meta, "uid", Value::String(uid.to_string()));
}

pub fn template_body(note_link: Option<&str>, pdf_link: Option<&str>, zotero_uri: &str) -> String {
    let note_line = match note_link {
        Some(link) => format!("[Open Note in DEVONthink]({link})"),
        None => format!("[Open in Zotero]({zotero_uri})"),
    };
    let pdf_line = match pdf_link {
        Some(link) => format!("[View PDF in DEVONthink]({link})"),
        None => "PDF not linked yet".to_string(),
    };
    format!(
        "📌 {note_line}\n📄 {pdf_line}\n\n## Summary\n-\n\n## Key Points\n-\n\n## Quotes & Highlights\n> “”\n\n## My Thoughts\n-\n\n## Related Notes\n-\n"
    )
}

// ============================================================================
// Note Refresh
// ============================================================================

/// Collaborators for creating or refreshing notes.
pub struct NoteContext<'a> {
    pub config: &'a Config,
    pub store: &'a dyn DocumentStore,
    pub linker: &'a dyn LinkHelper,
    /// Compute everything but leave the note, comments and links untouched.
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct NoteOutcome {
    pub key: String,
    pub title: String,
    pub authors: String,
    pub note_path: PathBuf,
    pub created: bool,
    pub obsidian_uri: String,
    pub note_uri: String,
    pub pdf_uri: Option<String>,
    pub zotero_uri: String,
    pub hooked: bool,
}

impl NoteOutcome {
    /// Lines consumed by the task-manager automation.
    pub fn automation_lines(&self) -> Vec<String> {
        vec![
            format!("TITLE_FOR_OMNIFOCUS::{}", self.title),
            format!("AUTHOR_FOR_OMNIFOCUS::{}", self.authors),
            format!("NOTE_URI::{}", self.note_uri),
            format!("OBSIDIAN_URI::{}", self.obsidian_uri),
            format!("PDF_URI::{}", self.pdf_uri.as_deref().unwrap_or("")),
            format!("ZOTERO_URI::{}", self.zotero_uri),
        ]
    }
}

/// Create or refresh the note for `item`, record its links in `cache` and
/// hook note, PDF and Zotero item together when a PDF is known.
pub fn refresh_note(ctx: &NoteContext<'_>, cache: &mut LinkCache, item: &CslItem) -> Result<NoteOutcome> {
    let vault = ctx.config.vault()?;
    let path = note_path(vault, ctx.config, item);
    let zotero_uri = zotero_select_uri(&item.id);

    let note_link = if ctx.config.features.markdown_in_devonthink {
        ctx.store.find(&format!("@{}.md", item.id))
    } else {
        None
    };
    let pdf_link = if ctx.config.features.pdf_in_devonthink {
        let term = pdf_search_term(item);
        info!(key = %item.id, %term, "DEVONthink search");
        ctx.store.find(&term)
    } else {
        None
    };

    let existing = if path.exists() {
        Some(std::fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?)
    } else {
        None
    };
    let (mut meta, body) = match &existing {
        Some(content) => {
            let (meta, body) = split_front_matter(content);
            (meta, body.to_string())
        }
        None => (
            Mapping::new(),
            template_body(note_link.as_deref(), pdf_link.as_deref(), &zotero_uri),
        ),
    };
    let created = existing.is_none();

    let uid = ensure_uid(&mut meta);
    refresh_metadata(&mut meta, item, &uid);
    let obsidian = obsidian_uri(vault, &uid);

    if !ctx.dry_run {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        std::fs::write(&path, render_note(&meta, &body)?).map_err(|e| SyncError::io(&path, e))?;
        info!(path = %path.display(), created, "note written");

        if let Some(pdf) = &pdf_link {
            if !ctx.store.set_comment(pdf, &format!("Linked note: {obsidian}")) {
                warn!(key = %item.id, "could not set DEVONthink comment");
            }
        }
    }

    cache.upsert(&item.id, &obsidian, pdf_link.as_deref().unwrap_or(""));

    let mut hooked = false;
    if let Some(pdf) = &pdf_link {
        hooked = true;
        for (a, b) in [(&obsidian, pdf), (pdf, &zotero_uri), (&obsidian, &zotero_uri)] {
            if let Err(e) = ctx.linker.link(a, b) {
                warn!(key = %item.id, error = %e, "hook link failed");
                hooked = false;
            }
        }
    }

    Ok(NoteOutcome {
        key: item.id.clone(),
        title: item.title_or_key().to_string(),
        authors: item.authors_display(),
        note_uri: hook_file_uri(&path),
        note_path: path,
        created,
        obsidian_uri: obsidian,
        pdf_uri: pdf_link,
        zotero_uri,
        hooked,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devonthink::tests::FakeStore;
    use crate::hookmark::tests::RecordingLinker;

    fn item() -> CslItem {
        serde_json::from_str(
            r#"{"id":"smith2020","type":"article-journal","title":"Deep Learning Systems",
                "author":[{"family":"Smith","given":"John"},{"family":"Doe","given":"Jane"}],
                "issued":{"date-parts":[[2020]]},"DOI":"10.1/dl"}"#,
        )
        .unwrap()
    }

    fn config(vault: &Path, cache: &Path) -> Config {
        let mut c = Config::default();
        c.paths.vault = Some(vault.to_path_buf());
        c.paths.linked_items = Some(cache.to_path_buf());
        c
    }

    #[test]
    fn test_folder_mapping() {
        let c = Config::default();
        assert_eq!(folder_for_type("article-journal", &c), "Articles");
        assert_eq!(folder_for_type("Thesis", &c), "Books");
        assert_eq!(folder_for_type("webpage", &c), "Other");
    }

    #[test]
    fn test_pdf_search_term() {
        let mut i = item();
        assert_eq!(pdf_search_term(&i), "Smith Doe Deep Learning Systems 2020");
        i.note = Some("Attachment: /lib/papers/Smith 2020 Deep.pdf".into());
        assert_eq!(pdf_search_term(&i), "Smith 2020 Deep");
    }

    #[test]
    fn test_split_front_matter() {
        let (meta, body) = split_front_matter("---\nuid: abc\nrating: 5\n---\n\n# Body\n");
        assert_eq!(meta.get("uid").and_then(Value::as_str), Some("abc"));
        assert_eq!(body, "\n# Body\n");

        let (meta, body) = split_front_matter("---\n: [bad\n---\nkept\n");
        assert!(meta.is_empty());
        assert_eq!(body, "kept\n");

        let (meta, body) = split_front_matter("no front matter");
        assert!(meta.is_empty());
        assert_eq!(body, "no front matter");
    }

    #[test]
    fn test_obsidian_uri_encodes_vault() {
        assert_eq!(
            obsidian_uri(Path::new("/Users/me/My Vault"), "u1"),
            "obsidian://adv-uri?vault=My%20Vault&uid=u1"
        );
    }

    #[test]
    fn test_new_note_and_links() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("Vault");
        let cache_path = dir.path().join("linked_items.csv");
        let cfg = config(&vault, &cache_path);

        let mut store = FakeStore::default();
        store.records.insert(
            "Smith Doe Deep Learning Systems 2020".into(),
            "x-devonthink-item://PDF1".into(),
        );
        let linker = RecordingLinker::default();
        let ctx = NoteContext {
            config: &cfg,
            store: &store,
            linker: &linker,
            dry_run: false,
        };

        let mut cache = LinkCache::open(&cache_path).unwrap();
        let out = refresh_note(&ctx, &mut cache, &item()).unwrap();

        assert!(out.created);
        assert!(out.note_path.ends_with("Source Material/Articles/@smith2020.md"));
        let text = std::fs::read_to_string(&out.note_path).unwrap();
        assert!(text.starts_with("---\n"));
        assert!(text.contains("citation: '@smith2020'"));
        assert!(text.contains("year: 2020"));
        assert!(text.contains("## Key Points"));
        assert!(text.contains("[View PDF in DEVONthink](x-devonthink-item://PDF1)"));

        let row = cache.get("smith2020").unwrap();
        assert_eq!(row.note_link, out.obsidian_uri);
        assert_eq!(row.devonthink_link, "x-devonthink-item://PDF1");

        assert_eq!(linker.links.borrow().len(), 3);
        assert!(out.hooked);
        let comments = store.comments.borrow();
        assert_eq!(comments[0].1, format!("Linked note: {}", out.obsidian_uri));
    }

    #[test]
    fn test_refresh_keeps_uid_body_and_custom_keys() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("Vault");
        let cache_path = dir.path().join("linked_items.csv");
        let mut cfg = config(&vault, &cache_path);
        cfg.features.pdf_in_devonthink = false;

        let path = note_path(&vault, &cfg, &item());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "---\nuid: keep-me\nrating: 4\ntitle: Old\n---\n\nMy own notes.\n",
        )
        .unwrap();

        let store = FakeStore::default();
        let linker = RecordingLinker::default();
        let ctx = NoteContext {
            config: &cfg,
            store: &store,
            linker: &linker,
            dry_run: false,
        };
        let mut cache = LinkCache::open(&cache_path).unwrap();
        let out = refresh_note(&ctx, &mut cache, &item()).unwrap();

        assert!(!out.created);
        assert!(out.obsidian_uri.ends_with("&uid=keep-me"));
        assert!(!out.hooked);
        assert!(linker.links.borrow().is_empty());

        let text = std::fs::read_to_string(&path).unwrap();
        let (meta, body) = split_front_matter(&text);
        assert_eq!(meta.get("rating").and_then(Value::as_u64), Some(4));
        assert_eq!(meta.get("title").and_then(Value::as_str), Some("Deep Learning Systems"));
        assert_eq!(meta.get("authors").and_then(Value::as_str), Some("Smith, John; Doe, Jane"));
        assert_eq!(body.trim(), "My own notes.");
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("Vault");
        let cache_path = dir.path().join("linked_items.csv");
        let cfg = config(&vault, &cache_path);
        let store = FakeStore::default();
        let linker = RecordingLinker::default();
        let ctx = NoteContext {
            config: &cfg,
            store: &store,
            linker: &linker,
            dry_run: true,
        };
        let mut cache = LinkCache::open(&cache_path).unwrap();
        let out = refresh_note(&ctx, &mut cache, &item()).unwrap();
        assert!(!out.note_path.exists());
    }
}
