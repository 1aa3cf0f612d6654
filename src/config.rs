//! Run configuration.
//!
//! Every job receives an explicit [`Config`] value. It is assembled from
//! defaults, an optional TOML file and environment variables (in that order),
//! so a `.env` file next to the scripts keeps working.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::scoring::{MatchProfile, Similarity};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "BIBSYNC_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub zotero: ZoteroConfig,
    pub tools: ToolsConfig,
    pub features: FeaturesConfig,
    pub matching: MatchingConfig,
    pub repair: RepairConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub bib: Option<PathBuf>,
    pub csl_json: Option<PathBuf>,
    pub pdf_dir: Option<PathBuf>,
    pub vault: Option<PathBuf>,
    pub linked_items: Option<PathBuf>,
    pub zotero_storage: Option<PathBuf>,
    pub zotero_sqlite: Option<PathBuf>,
    /// Folder under the vault holding literature notes.
    pub source_material: String,
    pub articles: String,
    pub books: String,
    pub other: String,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoteroConfig {
    pub user_id: Option<String>,
    pub api_key: Option<String>,
    pub api_url: String,
    pub page_size: u32,
    pub retries: u32,
    pub initial_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub hook_path: String,
    pub osascript: String,
    pub ocr_command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Markdown notes are indexed by the document store.
    pub markdown_in_devonthink: bool,
    /// PDFs live in the document store rather than on plain disk.
    pub pdf_in_devonthink: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub filename: MatchProfile,
    pub content: MatchProfile,
    pub exact_title_words: usize,
    pub pattern_title_words: usize,
    /// Partial-ratio threshold for title → PDF stem matching.
    pub link_threshold: f64,
    pub review_threshold: f64,
    /// Characters of extracted text kept as the match subject.
    pub content_chars: usize,
    /// Below this many characters the text layer is considered missing and OCR runs.
    pub min_text_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Absolute prefix of the old PDF library that leaked into attachment paths.
    pub bad_path_prefix: Option<String>,
    /// Imported-file paths starting with one of these are broken.
    pub broken_prefixes: Vec<String>,
    /// Zotero item types that can carry PDF attachments.
    pub attachable_types: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            bib: None,
            csl_json: None,
            pdf_dir: None,
            vault: None,
            linked_items: None,
            zotero_storage: None,
            zotero_sqlite: None,
            source_material: "Source Material".to_string(),
            articles: "Articles".to_string(),
            books: "Books".to_string(),
            other: "Other".to_string(),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl Default for ZoteroConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            api_key: None,
            api_url: "https://api.zotero.org".to_string(),
            page_size: 100,
            retries: 5,
            initial_backoff_ms: 2000,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            hook_path: "hook".to_string(),
            osascript: "osascript".to_string(),
            ocr_command: "ocrmypdf".to_string(),
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            markdown_in_devonthink: false,
            pdf_in_devonthink: true,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            filename: MatchProfile::default(),
            content: MatchProfile {
                author_weight: 0.3,
                year_weight: 0.0,
                title_weight: 0.7,
                title_words: 6,
                threshold: 0.9,
                similarity: Similarity::PartialRatio,
            },
            exact_title_words: 5,
            pattern_title_words: 4,
            link_threshold: 0.70,
            review_threshold: 0.70,
            content_chars: 1000,
            min_text_chars: 100,
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            bad_path_prefix: None,
            broken_prefixes: vec!["/Users/".to_string(), "Users/".to_string()],
            attachable_types: vec![
                "journalArticle".to_string(),
                "book".to_string(),
                "conferencePaper".to_string(),
                "presentation".to_string(),
            ],
        }
    }
}

impl Config {
    /// Load defaults, then the config file, then process environment overrides.
    ///
    /// Without an explicit path, `$BIBSYNC_CONFIG` and then
    /// `<config dir>/bibsync/config.toml` are tried; a missing default file is fine.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(|p| expand_tilde(&p)));

        let mut config = match explicit {
            Some(p) => Self::from_file(&p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides using the variable names of the original `.env` files.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |name: &str| lookup(name).filter(|v| !v.is_empty()).map(|v| expand_tilde(&v));

        if let Some(p) = path("BIB_PATH") {
            self.paths.bib = Some(p);
        }
        if let Some(p) = path("CSL_JSON_PATH") {
            self.paths.csl_json = Some(p);
        }
        if let Some(p) = path("PDF_FOLDER") {
            self.paths.pdf_dir = Some(p);
        }
        if let Some(p) = path("OBSIDIAN_VAULT") {
            self.paths.vault = Some(p);
        }
        if let Some(p) = path("LINKED_ITEMS") {
            self.paths.linked_items = Some(p);
        }
        if let Some(p) = path("ZOTERO_STORAGE") {
            self.paths.zotero_storage = Some(p);
        }
        if let Some(p) = path("ZOTERO_SQLITE") {
            self.paths.zotero_sqlite = Some(p);
        }
        if let Some(p) = path("LOG_DIR") {
            self.paths.log_dir = p;
        }
        if let Some(v) = lookup("SOURCE_MATERIAL") {
            self.paths.source_material = v;
        }
        if let Some(v) = lookup("ARTICLES") {
            self.paths.articles = v;
        }
        if let Some(v) = lookup("BOOKS") {
            self.paths.books = v;
        }
        if let Some(v) = lookup("OTHER") {
            self.paths.other = v;
        }
        if let Some(v) = lookup("ZOTERO_USER_ID") {
            self.zotero.user_id = Some(v);
        }
        if let Some(v) = lookup("ZOTERO_API_KEY") {
            self.zotero.api_key = Some(v);
        }
        if let Some(v) = lookup("ZOTERO_API_URL") {
            self.zotero.api_url = v;
        }
        if let Some(v) = lookup("HOOK_PATH") {
            self.tools.hook_path = v;
        }
        if let Some(v) = lookup("OCR_COMMAND") {
            self.tools.ocr_command = v;
        }
        if let Some(v) = lookup("MARKDOWN_IN_DEVONTHINK") {
            self.features.markdown_in_devonthink = parse_flag(&v);
        }
        if let Some(v) = lookup("PDF_IN_DEVONTHINK") {
            self.features.pdf_in_devonthink = parse_flag(&v);
        }
        if let Some(v) = lookup("BAD_PATH_PREFIX") {
            self.repair.bad_path_prefix = Some(v.trim_end_matches('/').to_string());
        }
    }

    pub fn bib_path(&self) -> Result<&Path> {
        required(&self.paths.bib, "BIB_PATH")
    }

    pub fn csl_json_path(&self) -> Result<&Path> {
        required(&self.paths.csl_json, "CSL_JSON_PATH")
    }

    pub fn pdf_dir(&self) -> Result<&Path> {
        required(&self.paths.pdf_dir, "PDF_FOLDER")
    }

    pub fn vault(&self) -> Result<&Path> {
        required(&self.paths.vault, "OBSIDIAN_VAULT")
    }

    pub fn linked_items(&self) -> Result<&Path> {
        required(&self.paths.linked_items, "LINKED_ITEMS")
    }

    pub fn zotero_storage(&self) -> Result<&Path> {
        required(&self.paths.zotero_storage, "ZOTERO_STORAGE")
    }

    pub fn zotero_sqlite(&self) -> Result<&Path> {
        required(&self.paths.zotero_sqlite, "ZOTERO_SQLITE")
    }

    pub fn zotero_credentials(&self) -> Result<(&str, &str)> {
        let user = self
            .zotero
            .user_id
            .as_deref()
            .ok_or(SyncError::MissingSetting("ZOTERO_USER_ID"))?;
        let key = self
            .zotero
            .api_key
            .as_deref()
            .ok_or(SyncError::MissingSetting("ZOTERO_API_KEY"))?;
        Ok((user, key))
    }

    /// The bad prefix, falling back to the PDF folder (the usual culprit).
    pub fn bad_path_prefix(&self) -> Result<String> {
        if let Some(prefix) = &self.repair.bad_path_prefix {
            return Ok(prefix.clone());
        }
        let pdf_dir = self.pdf_dir().map_err(|_| SyncError::MissingSetting("BAD_PATH_PREFIX"))?;
        Ok(pdf_dir.to_string_lossy().trim_end_matches('/').to_string())
    }

    /// Default location of a named CSV log inside the log directory.
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.paths.log_dir.join(name)
    }
}

fn required<'a>(value: &'a Option<PathBuf>, name: &'static str) -> Result<&'a Path> {
    value.as_deref().ok_or(SyncError::MissingSetting(name))
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bibsync").join("config.toml"))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
