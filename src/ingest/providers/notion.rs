use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::settings::{resolve_secret, NotionSettings};
use crate::error::CollectorError;
use crate::ingest::types::{Collector, Metadata, UpdateRecord};

const NOTION_VERSION: &str = "2022-06-28";
const PREVIEW_BLOCKS: usize = 5;

pub struct NotionCollector {
    client: Client,
    api_key: String,
    database_id: String,
    lookback_days: i64,
    api_base: String,
}

impl NotionCollector {
    pub fn from_settings(cfg: &NotionSettings) -> anyhow::Result<Self> {
        let api_key = resolve_secret(&cfg.api_key, "NOTION_API_KEY")?;
        if cfg.database_id.trim().is_empty() {
            anyhow::bail!("notion collector needs a database_id");
        }
        Ok(Self {
            client: Client::new(),
            api_key,
            database_id: cfg.database_id.clone(),
            lookback_days: cfg.lookback_days,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn query_pages(&self, since: DateTime<Utc>) -> Result<Vec<Value>, CollectorError> {
        let body = json!({
            "filter": {
                "timestamp": "last_edited_time",
                "last_edited_time": { "after": since.to_rfc3339() }
            },
            "sorts": [{ "timestamp": "last_edited_time", "direction": "descending" }]
        });
        let resp = self
            .client
            .post(format!("{}/databases/{}/query", self.api_base, self.database_id))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CollectorError::Api {
                service: "notion",
                message: format!("{status}: {text}"),
            });
        }
        let v: Value = resp.json().await.map_err(|e| CollectorError::Parse(e.to_string()))?;
        Ok(v["results"].as_array().cloned().unwrap_or_default())
    }

    async fn block_preview(&self, page_id: &str) -> Result<Vec<String>, CollectorError> {
        let v: Value = self
            .client
            .get(format!("{}/blocks/{}/children", self.api_base, page_id))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(block_lines(&v))
    }
}

fn plain_text(rich: &Value) -> String {
    rich.as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["plain_text"].as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
}

/// Title of a database page: the first property of type "title".
pub fn page_title(page: &Value) -> String {
    page["properties"]
        .as_object()
        .and_then(|props| {
            props
                .values()
                .find(|p| p["type"] == "title")
                .map(|p| plain_text(&p["title"]))
        })
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "Untitled".to_string())
}

/// "PARAGRAPH: text" lines for blocks carrying rich text, capped at the preview size.
pub fn block_lines(children: &Value) -> Vec<String> {
    children["results"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| {
                    let kind = b["type"].as_str()?;
                    let text = plain_text(&b[kind]["rich_text"]);
                    (!text.trim().is_empty()).then(|| format!("{}: {}", kind.to_uppercase(), text))
                })
                .take(PREVIEW_BLOCKS)
                .collect()
        })
        .unwrap_or_default()
}

pub fn page_to_record(page: &Value, preview: &[String]) -> Option<UpdateRecord> {
    let page_id = page["id"].as_str()?;
    let last_edited = page["last_edited_time"].as_str()?;
    let timestamp = DateTime::parse_from_rfc3339(last_edited).ok()?.with_timezone(&Utc);

    let mut content = page_title(page);
    if !preview.is_empty() {
        content.push_str("\n\n");
        content.push_str(&preview.join("\n"));
    }

    let mut meta = Metadata::new();
    meta.insert("page_id".into(), page_id.into());
    meta.insert("created_time".into(), page["created_time"].clone());
    meta.insert("last_edited_time".into(), last_edited.into());
    let props: Vec<Value> = page["properties"]
        .as_object()
        .map(|o| o.keys().map(|k| Value::from(k.as_str())).collect())
        .unwrap_or_default();
    meta.insert("properties".into(), Value::Array(props));

    Some(
        UpdateRecord::new(format!("notion:{page_id}"), content, timestamp)
            .with_author(page["created_by"]["id"].as_str().unwrap_or("unknown"))
            .with_url(page["url"].as_str().unwrap_or_default())
            .with_metadata(meta),
    )
}

#[async_trait]
impl Collector for NotionCollector {
    async fn fetch_updates(&self, since: DateTime<Utc>) -> Result<Vec<UpdateRecord>, CollectorError> {
        let pages = self.query_pages(since).await?;
        let mut out = Vec::with_capacity(pages.len());
        for page in &pages {
            let preview = match page["id"].as_str() {
                Some(id) => self.block_preview(id).await.unwrap_or_else(|e| {
                    tracing::warn!(page_id = id, error = %e, "could not fetch notion page content");
                    Vec::new()
                }),
                None => Vec::new(),
            };
            if let Some(rec) = page_to_record(page, &preview) {
                out.push(rec);
            }
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "notion"
    }

    fn lookback(&self) -> Duration {
        Duration::days(self.lookback_days)
    }
}
