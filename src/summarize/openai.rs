//! OpenAI-backed summarizer (Chat Completions, JSON object output).

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{DigestSummary, Summarizer, SummaryItem};
use crate::config::settings::{resolve_secret, OpenAiSettings};
use crate::error::SummarizeError;
use crate::ingest::types::{Metadata, UpdateRecord};

const SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes project updates.";

pub struct OpenAiSummarizer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    endpoint: String,
}

impl OpenAiSummarizer {
    pub fn from_settings(cfg: &OpenAiSettings) -> anyhow::Result<Self> {
        let api_key = resolve_secret(&cfg.api_key, "OPENAI_API_KEY")?;
        let http = reqwest::Client::builder()
            .user_agent("standup-digest/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            api_key,
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            endpoint: cfg.endpoint.clone(),
        })
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

/// Shape the model is asked to return.
#[derive(Debug, Deserialize, Default)]
struct ModelDigest {
    #[serde(default)]
    progress: Vec<ModelItem>,
    #[serde(default)]
    blockers: Vec<ModelItem>,
    #[serde(default)]
    next_steps: Vec<ModelItem>,
}

#[derive(Debug, Deserialize)]
struct ModelItem {
    content: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    metadata: Metadata,
}

impl From<ModelItem> for SummaryItem {
    fn from(m: ModelItem) -> Self {
        SummaryItem {
            content: m.content,
            source: m.source,
            metadata: m.metadata,
        }
    }
}

pub fn build_prompt(records: &[UpdateRecord]) -> String {
    let mut updates_text = String::new();
    for (i, rec) in records.iter().enumerate() {
        updates_text.push_str(&format!(
            "--- Update {} ---\nSource: {}\nTimestamp: {}\nContent: {}\n\n",
            i + 1,
            rec.source,
            rec.timestamp.to_rfc3339(),
            rec.content
        ));
    }

    format!(
        r#"Analyze the following project updates and extract key information.
For each update, identify:
1. Progress made (what was accomplished)
2. Blockers or issues encountered
3. Next steps or action items

Respond with a JSON object of this shape:
{{
  "progress":   [{{"content": "Brief description of progress", "source": "Source of the update"}}],
  "blockers":   [{{"content": "Description of blocker", "source": "Source of the update"}}],
  "next_steps": [{{"content": "Description of next step", "source": "Source of the update"}}]
}}

Updates to analyze:
{updates_text}
Be concise but informative. Group similar items together. Include the source for each item."#
    )
}

/// Parse the model's JSON object into a summary.
pub fn parse_model_output(raw: &str) -> Result<DigestSummary, SummarizeError> {
    let parsed: ModelDigest =
        serde_json::from_str(raw.trim()).map_err(|e| SummarizeError::Parse(e.to_string()))?;
    Ok(DigestSummary {
        generated_at: Utc::now(),
        progress: parsed.progress.into_iter().map(Into::into).collect(),
        blockers: parsed.blockers.into_iter().map(Into::into).collect(),
        next_steps: parsed.next_steps.into_iter().map(Into::into).collect(),
    })
}

#[async_trait::async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, records: &[UpdateRecord]) -> Result<DigestSummary, SummarizeError> {
        if records.is_empty() {
            return Ok(DigestSummary::empty(Utc::now()));
        }

        let prompt = build_prompt(records);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.3,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SummarizeError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body: Resp = resp.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SummarizeError::Parse("no choices in response".into()))?;

        parse_model_output(&content)
    }

    fn name(&self) -> &str {
        "openai"
    }
}
