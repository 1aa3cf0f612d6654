//! Blocking client for the Zotero Web API v3.

use std::path::Path;
use std::time::Duration;

use indicatif::ProgressBar;
use reqwest::blocking::{Client, RequestBuilder, Response};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::progress::{create_spinner, finish_phase};
use crate::retry::{with_backoff, Backoff};

const API_VERSION: &str = "3";
const TOTAL_RESULTS: &str = "Total-Results";

/// One library item as returned by `/users/<id>/items`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ZoteroItem {
    pub key: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ZoteroItem {
    pub fn field(&self, name: &str) -> &str {
        self.data.get(name).and_then(Value::as_str).unwrap_or("")
    }

    pub fn item_type(&self) -> &str {
        self.field("itemType")
    }

    pub fn title(&self) -> &str {
        self.field("title")
    }

    pub fn link_mode(&self) -> &str {
        self.field("linkMode")
    }

    pub fn path(&self) -> &str {
        self.field("path")
    }

    pub fn parent_item(&self) -> Option<&str> {
        self.data
            .get("parentItem")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
    }

    /// `citationKey` field, else a `Citation Key:` line in `extra`.
    pub fn citation_key(&self) -> Option<String> {
        let direct = self.field("citationKey").trim();
        if !direct.is_empty() {
            return Some(direct.to_string());
        }
        self.field("extra").lines().find_map(|line| {
            let (label, value) = line.split_once(':')?;
            (label.trim().eq_ignore_ascii_case("citation key") && !value.trim().is_empty())
                .then(|| value.trim().to_string())
        })
    }

    /// Surname of the first creator, if any.
    pub fn first_creator(&self) -> &str {
        self.data
            .get("creators")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| c.get("lastName").or_else(|| c.get("name")))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

/// The library operations the maintenance jobs need.
pub trait ZoteroApi {
    /// Every item, optionally restricted to one item type.
    fn items(&self, item_type: Option<&str>) -> Result<Vec<ZoteroItem>>;

    fn children(&self, key: &str) -> Result<Vec<ZoteroItem>>;

    /// Names of every field the API knows.
    fn item_fields(&self) -> Result<FxHashSet<String>>;

    /// Replace an item's data, guarded by its last known version.
    fn update_item(&self, key: &str, version: u64, data: &Map<String, Value>) -> Result<()>;

    fn delete_item(&self, key: &str, version: u64) -> Result<()>;

    /// Attach `path` to `parent` as a linked file; returns the new key.
    fn create_linked_attachment(&self, parent: &str, path: &Path) -> Result<String>;
}

pub struct ZoteroClient {
    http: Client,
    base_url: String,
    user_id: String,
    api_key: String,
    page_size: u32,
    backoff: Backoff,
}

impl ZoteroClient {
    pub fn new(base_url: &str, user_id: &str, api_key: &str) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: user_id.to_string(),
            api_key: api_key.to_string(),
            page_size: 100,
            backoff: Backoff::new(5, Duration::from_secs(2)),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let (user_id, api_key) = config.zotero_credentials()?;
        let mut client = Self::new(&config.zotero.api_url, user_id, api_key)?;
        client.page_size = config.zotero.page_size.clamp(1, 100);
        client.backoff = Backoff::new(
            config.zotero.retries,
            Duration::from_millis(config.zotero.initial_backoff_ms),
        );
        Ok(client)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn library_url(&self, path: &str) -> String {
        format!("{}/users/{}/{}", self.base_url, self.user_id, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("Zotero-API-Key", &self.api_key)
            .header("Zotero-API-Version", API_VERSION)
    }

    fn send(&self, label: &str, req: RequestBuilder) -> Result<Response> {
        let resp = self.authed(req).send()?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().unwrap_or_default();
        Err(SyncError::Api(
            label.to_string(),
            format!("HTTP {}: {}", status, body.trim()),
        ))
    }

    fn paged(&self, path: &str, item_type: Option<&str>, progress: Option<&ProgressBar>) -> Result<Vec<ZoteroItem>> {
        let url = self.library_url(path);
        let mut items = Vec::new();
        let mut start = 0u32;
        loop {
            let mut query = vec![
                ("format", "json".to_string()),
                ("limit", self.page_size.to_string()),
                ("start", start.to_string()),
            ];
            if let Some(t) = item_type {
                query.push(("itemType", t.to_string()));
            }
            let resp = self.send(path, self.http.get(&url).query(&query))?;
            let total = resp
                .headers()
                .get(TOTAL_RESULTS)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            let page: Vec<ZoteroItem> = resp.json()?;
            let fetched = page.len();
            items.extend(page);
            debug!(%path, fetched = items.len(), ?total, "fetched page");
            if let Some(pb) = progress {
                match total {
                    Some(total) => pb.set_message(format!("Fetching Zotero items: {}/{}", items.len(), total)),
                    None => pb.set_message(format!("Fetching Zotero items: {}", items.len())),
                }
            }

            let done = match total {
                Some(total) => items.len() >= total || fetched == 0,
                None => fetched < self.page_size as usize,
            };
            if done {
                return Ok(items);
            }
            start += fetched as u32;
        }
    }

    pub fn children_once(&self, key: &str) -> Result<Vec<ZoteroItem>> {
        self.paged(&format!("items/{key}/children"), None, None)
    }
}

impl ZoteroApi for ZoteroClient {
    fn items(&self, item_type: Option<&str>) -> Result<Vec<ZoteroItem>> {
        let spinner = create_spinner("Fetching Zotero items");
        let items = self.paged("items", item_type, Some(&spinner))?;
        finish_phase(
            &spinner,
            format!("Fetched {} Zotero items ({})", items.len(), item_type.unwrap_or("all types")),
        );
        Ok(items)
    }

    /// Retried with backoff; this endpoint times out under load.
    fn children(&self, key: &str) -> Result<Vec<ZoteroItem>> {
        with_backoff(self.backoff, &format!("children of {key}"), || self.children_once(key))
    }

    fn item_fields(&self) -> Result<FxHashSet<String>> {
        #[derive(Deserialize)]
        struct Field {
            field: String,
        }
        let url = format!("{}/itemFields", self.base_url);
        let fields: Vec<Field> = self.send("itemFields", self.http.get(&url))?.json()?;
        Ok(fields.into_iter().map(|f| f.field).collect())
    }

    fn update_item(&self, key: &str, version: u64, data: &Map<String, Value>) -> Result<()> {
        let url = self.library_url(&format!("items/{key}"));
        let req = self
            .http
            .put(&url)
            .header("If-Unmodified-Since-Version", version.to_string())
            .json(data);
        self.send(&format!("update {key}"), req)?;
        Ok(())
    }

    fn delete_item(&self, key: &str, version: u64) -> Result<()> {
        let url = self.library_url(&format!("items/{key}"));
        let req = self
            .http
            .delete(&url)
            .header("If-Unmodified-Since-Version", version.to_string());
        self.send(&format!("delete {key}"), req)?;
        Ok(())
    }

    fn create_linked_attachment(&self, parent: &str, path: &Path) -> Result<String> {
        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let body = json!([{
            "itemType": "attachment",
            "parentItem": parent,
            "linkMode": "linked_file",
            "title": title,
            "path": path.to_string_lossy(),
            "contentType": "application/pdf",
            "tags": [],
            "relations": {},
        }]);
        let url = self.library_url("items");
        let label = format!("attach {}", path.display());
        let result: Value = self.send(&label, self.http.post(&url).json(&body))?.json()?;

        if let Some(failure) = result.get("failed").and_then(|f| f.get("0")) {
            let message = failure
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown failure");
            return Err(SyncError::Api(label, message.to_string()));
        }
        result
            .get("successful")
            .and_then(|s| s.get("0"))
            .and_then(|s| s.get("key"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SyncError::Api(label, "no key in response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn client(server: &Server) -> ZoteroClient {
        ZoteroClient::new(&server.url(), "42", "secret")
            .unwrap()
            .with_backoff(Backoff::new(3, Duration::ZERO))
    }

    #[test]
    fn test_items_pages_until_total() {
        let mut server = Server::new();
        let first = server
            .mock("GET", "/users/42/items")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("start".into(), "0".into()),
                Matcher::UrlEncoded("itemType".into(), "attachment".into()),
            ]))
            .match_header("Zotero-API-Key", "secret")
            .match_header("Zotero-API-Version", "3")
            .with_header("Total-Results", "2")
            .with_body(r#"[{"key":"A1","version":3,"data":{"itemType":"attachment"}}]"#)
            .create();
        let second = server
            .mock("GET", "/users/42/items")
            .match_query(Matcher::UrlEncoded("start".into(), "1".into()))
            .with_header("Total-Results", "2")
            .with_body(r#"[{"key":"A2","version":4,"data":{"itemType":"attachment"}}]"#)
            .create();

        let items = client(&server).items(Some("attachment")).unwrap();
        assert_eq!(items.iter().map(|i| i.key.as_str()).collect::<Vec<_>>(), vec!["A1", "A2"]);
        first.assert();
        second.assert();
    }

    #[test]
    fn test_children_retry_exhausted() {
        let mut server = Server::new();
        let m = server
            .mock("GET", "/users/42/items/P9/children")
            .match_query(Matcher::Any)
            .with_status(500)
            .expect(3)
            .create();
        assert!(client(&server).children("P9").is_err());
        m.assert();
    }

    #[test]
    fn test_children_error_then_listing() {
        let mut server = Server::new();
        let failing = server
            .mock("GET", "/users/42/items/P1/children")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(1)
            .create();
        let api = client(&server);
        assert!(api.children_once("P1").is_err());
        failing.assert();
        failing.remove();

        server
            .mock("GET", "/users/42/items/P1/children")
            .match_query(Matcher::Any)
            .with_body(r#"[{"key":"C1","version":1,"data":{"linkMode":"linked_file","path":"/x/k.pdf"}}]"#)
            .create();
        let children = api.children("P1").unwrap();
        assert_eq!(children[0].link_mode(), "linked_file");
    }

    #[test]
    fn test_update_sends_version_header() {
        let mut server = Server::new();
        let m = server
            .mock("PUT", "/users/42/items/K1")
            .match_header("If-Unmodified-Since-Version", "7")
            .match_body(Matcher::PartialJsonString(r#"{"itemType":"presentation"}"#.into()))
            .with_status(204)
            .create();
        let mut data = Map::new();
        data.insert("itemType".into(), "presentation".into());
        client(&server).update_item("K1", 7, &data).unwrap();
        m.assert();
    }

    #[test]
    fn test_precondition_failure_is_api_error() {
        let mut server = Server::new();
        server
            .mock("DELETE", "/users/42/items/K1")
            .with_status(412)
            .with_body("Item has been modified")
            .create();
        let err = client(&server).delete_item("K1", 1).unwrap_err();
        assert!(err.to_string().contains("412"));
    }

    #[test]
    fn test_create_linked_attachment() {
        let mut server = Server::new();
        server
            .mock("POST", "/users/42/items")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#""parentItem":"P1""#.into()),
                Matcher::Regex(r#""linkMode":"linked_file""#.into()),
                Matcher::Regex(r#""title":"smith2020.pdf""#.into()),
            ]))
            .with_body(r#"{"successful":{"0":{"key":"NEW1"}},"success":{"0":"NEW1"},"unchanged":{},"failed":{}}"#)
            .create();
        let key = client(&server)
            .create_linked_attachment("P1", Path::new("/pdfs/smith2020.pdf"))
            .unwrap();
        assert_eq!(key, "NEW1");
    }

    #[test]
    fn test_item_fields() {
        let mut server = Server::new();
        server
            .mock("GET", "/itemFields")
            .with_body(r#"[{"field":"title","localized":"Title"},{"field":"DOI","localized":"DOI"}]"#)
            .create();
        let fields = client(&server).item_fields().unwrap();
        assert!(fields.contains("title") && fields.contains("DOI"));
    }

    #[test]
    fn test_citation_key_from_extra() {
        let item: ZoteroItem = serde_json::from_str(
            r#"{"key":"K","data":{"extra":"tex.uri: x\nCitation Key: smith2020"}}"#,
        )
        .unwrap();
        assert_eq!(item.citation_key().as_deref(), Some("smith2020"));
    }
}
