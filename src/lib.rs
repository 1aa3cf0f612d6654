//! bibsync library - shared modules for all binaries.

pub mod bibliography;
pub mod config;
pub mod devonthink;
pub mod entry_types;
pub mod error;
pub mod hookmark;
pub mod hooks;
pub mod link_cache;
pub mod models;
pub mod normalize;
pub mod notes;
pub mod pdf_text;
pub mod progress;
pub mod rename;
pub mod report;
pub mod retry;
pub mod review;
pub mod safety;
pub mod scoring;
pub mod storage;
pub mod zotero;

pub use config::Config;
pub use error::{Result, SyncError};
