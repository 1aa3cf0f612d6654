//! Zotero access: the Web API client, API-side maintenance jobs and direct
//! SQLite repairs.

pub mod api;
pub mod maintenance;
pub mod sqlite;

pub use api::{ZoteroApi, ZoteroClient, ZoteroItem};
