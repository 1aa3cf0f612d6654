//! DEVONthink lookups over AppleScript.
//!
//! Every call is best effort: a failing `osascript` is logged and treated as
//! "not found" so one unreachable app never aborts a batch.

use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

pub const ITEM_URL_PREFIX: &str = "x-devonthink-item://";

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

pub trait DocumentStore {
    /// Reference URL of the first record matching `query`.
    fn find(&self, query: &str) -> Option<String>;

    /// Like [`DocumentStore::find`] but skips markdown records.
    fn find_document(&self, query: &str) -> Option<String>;

    /// Set the comment of the record behind `item_url`. Returns false on failure.
    fn set_comment(&self, item_url: &str, comment: &str) -> bool;
}

/// Quote text for embedding in an AppleScript string literal.
pub fn escape_applescript(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Collapse whitespace in a search query.
pub fn clean_query(query: &str) -> String {
    WHITESPACE_RUN.replace_all(query.trim(), " ").to_string()
}

pub fn search_script(query: &str) -> String {
    format!(
        r#"tell application id "DNtp"
    set theRecords to search "{}"
    if theRecords is not {{}} then
        return reference URL of (item 1 of theRecords)
    end if
end tell"#,
        escape_applescript(&clean_query(query))
    )
}

pub fn document_search_script(query: &str) -> String {
    format!(
        r#"tell application id "DNtp"
    set theRecords to search "{}"
    repeat with theRecord in theRecords
        if (type of theRecord as string) is not "markdown" then
            return reference URL of theRecord
        end if
    end repeat
end tell"#,
        escape_applescript(&clean_query(query))
    )
}

pub fn set_comment_script(item_url: &str, comment: &str) -> String {
    format!(
        r#"tell application id "DNtp"
    set theRecords to lookup records with URL "{}"
    if theRecords is not {{}} then
        set comment of (item 1 of theRecords) to "{}"
    end if
end tell"#,
        escape_applescript(item_url),
        escape_applescript(comment)
    )
}

/// Keep `output` only if it is a DEVONthink item URL.
pub fn parse_item_url(output: &str) -> Option<String> {
    let trimmed = output.trim();
    trimmed
        .starts_with(ITEM_URL_PREFIX)
        .then(|| trimmed.to_string())
}

#[derive(Debug, Clone)]
pub struct DevonThink {
    osascript: String,
}

impl DevonThink {
    pub fn new(osascript: impl Into<String>) -> Self {
        Self {
            osascript: osascript.into(),
        }
    }

    fn run(&self, script: &str) -> Option<String> {
        match Command::new(&self.osascript).arg("-e").arg(script).output() {
            Ok(out) if out.status.success() => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
            Ok(out) => {
                warn!(
                    status = %out.status,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "osascript failed"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, command = %self.osascript, "cannot run osascript");
                None
            }
        }
    }
}

impl DocumentStore for DevonThink {
    fn find(&self, query: &str) -> Option<String> {
        let found = self.run(&search_script(query)).and_then(|o| parse_item_url(&o));
        debug!(%query, ?found, "DEVONthink search");
        found
    }

    fn find_document(&self, query: &str) -> Option<String> {
        let found = self
            .run(&document_search_script(query))
            .and_then(|o| parse_item_url(&o));
        debug!(%query, ?found, "DEVONthink document search");
        found
    }

    fn set_comment(&self, item_url: &str, comment: &str) -> bool {
        self.run(&set_comment_script(item_url, comment)).is_some()
    }
}
