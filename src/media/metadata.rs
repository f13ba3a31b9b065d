use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use super::downloader::ensure_dir;
use super::error::{MediaError, MediaResult};
use super::types::ContentRef;
use super::utils::{endpoint, select_text};

const DATA_SCRIPT: &str = "script#__UNIVERSAL_DATA_FOR_REHYDRATION__";
const ITEM_POINTER: &str = "/__DEFAULT_SCOPE__/webapp.video-detail/itemInfo/itemStruct";

const TOP_FIELDS: &[&str] = &["id", "desc", "createTime"];
const VIDEO_FIELDS: &[&str] = &[
    "duration",
    "width",
    "height",
    "ratio",
    "format",
    "bitrate",
    "definition",
    "codecType",
];
const AUTHOR_FIELDS: &[&str] = &["id", "uniqueId", "nickname", "signature", "verified", "secUid"];
const MUSIC_FIELDS: &[&str] = &["id", "title", "authorName", "duration", "original", "playUrl"];
const STATS_FIELDS: &[&str] = &[
    "diggCount",
    "shareCount",
    "commentCount",
    "playCount",
    "collectCount",
];

/// Fetches a post page and keeps a fixed subset of its embedded item data.
pub struct MetadataFetcher {
    client: reqwest::Client,
    page_base: String,
}

impl MetadataFetcher {
    pub fn new(client: reqwest::Client, page_base: impl Into<String>) -> Self {
        Self {
            client,
            page_base: page_base.into(),
        }
    }

    fn page_url(&self, content: &ContentRef) -> MediaResult<Url> {
        let base = Url::parse(&self.page_base)
            .map_err(|e| MediaError::Metadata(format!("{}: {e}", self.page_base)))?;
        endpoint(
            &base,
            &format!("{}/video/{}", content.owner, content.content_id),
        )
        .map_err(|e| MediaError::Metadata(e.to_string()))
    }

    pub async fn fetch(&self, content: &ContentRef) -> MediaResult<Value> {
        let url = self.page_url(content)?;
        debug!("Fetching metadata page {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MediaError::Metadata(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::Metadata(format!("HTTP {status}")));
        }
        let page = response
            .text()
            .await
            .map_err(|e| MediaError::Metadata(e.to_string()))?;

        extract_document(&page)
    }

    /// Fetch and write the document unless `skip_existing` finds it already.
    /// Returns whether a file was written.
    pub async fn save(
        &self,
        content: &ContentRef,
        path: &Path,
        skip_existing: bool,
    ) -> MediaResult<bool> {
        if skip_existing && tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(false);
        }

        let document = self.fetch(content).await?;
        write_document(path, &document).await?;
        Ok(true)
    }
}

/// Pulls the embedded item out of a post page and projects it.
pub fn extract_document(page: &str) -> MediaResult<Value> {
    let blob = select_text(page, DATA_SCRIPT)
        .map_err(MediaError::Metadata)?
        .ok_or_else(|| MediaError::Metadata("page has no embedded data".to_string()))?;
    let data: Value = serde_json::from_str(&blob)
        .map_err(|e| MediaError::Metadata(format!("embedded data is not JSON: {e}")))?;
    let item = data
        .pointer(ITEM_POINTER)
        .ok_or_else(|| MediaError::Metadata("embedded data has no item".to_string()))?;
    Ok(project(item))
}

fn copy_fields(source: Option<&Value>, fields: &[&str]) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(source) = source {
        for field in fields {
            if let Some(value) = source.get(*field) {
                out.insert((*field).to_string(), value.clone());
            }
        }
    }
    out
}

/// Keeps the documented subset. Absent source fields are simply absent.
pub fn project(item: &Value) -> Value {
    let mut doc = copy_fields(Some(item), TOP_FIELDS);

    for (key, fields) in [
        ("video", VIDEO_FIELDS),
        ("author", AUTHOR_FIELDS),
        ("music", MUSIC_FIELDS),
        ("stats", STATS_FIELDS),
    ] {
        let section = copy_fields(item.get(key), fields);
        if !section.is_empty() {
            doc.insert(key.to_string(), Value::Object(section));
        }
    }

    let hashtags: Vec<Value> = item
        .get("textExtra")
        .and_then(Value::as_array)
        .map(|extras| {
            extras
                .iter()
                .filter_map(|extra| extra.get("hashtagName").and_then(Value::as_str))
                .filter(|name| !name.is_empty())
                .map(|name| Value::String(name.to_string()))
                .collect()
        })
        .unwrap_or_default();
    if !hashtags.is_empty() {
        doc.insert("hashtags".to_string(), Value::Array(hashtags));
    }

    Value::Object(doc)
}

async fn write_document(path: &Path, document: &Value) -> MediaResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)
            .await
            .map_err(|e| MediaError::Metadata(e.to_string()))?;
    }
    let pretty =
        serde_json::to_string_pretty(document).map_err(|e| MediaError::Metadata(e.to_string()))?;
    tokio::fs::write(path, pretty)
        .await
        .map_err(|e| MediaError::Metadata(format!("{}: {e}", path.display())))
}
