use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{chunk_text, NotificationResult, Sink, SinkOptions};
use crate::config::settings::{resolve_secret, SlackSettings};
use crate::error::SinkError;

/// Slack rejects messages well above this; leave room for formatting.
pub const MAX_MESSAGE_CHARS: usize = 3000;

#[derive(Debug, Deserialize)]
struct PostResp {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

pub struct SlackSink {
    client: Client,
    token: String,
    default_channel: String,
    api_base: String,
}

impl SlackSink {
    pub fn from_settings(cfg: &SlackSettings, default_channel: &str) -> Result<Self> {
        let token = resolve_secret(&cfg.token, "SLACK_BOT_TOKEN")?;
        Ok(Self::new(token, default_channel.to_string()).with_api_base(&cfg.api_base))
    }

    pub fn new(token: String, default_channel: String) -> Self {
        Self {
            client: Client::new(),
            token,
            default_channel,
            api_base: "https://slack.com/api".to_string(),
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    async fn post(&self, channel: &str, text: &str, thread_ts: Option<&str>) -> Result<String, SinkError> {
        let mut body = json!({ "channel": channel, "text": text, "mrkdwn": true });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = ts.into();
        }

        let resp: PostResp = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !resp.ok {
            return Err(SinkError::Api {
                service: "slack",
                message: resp.error.unwrap_or_else(|| "unknown_error".into()),
            });
        }
        Ok(resp.ts.unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl Sink for SlackSink {
    async fn send(&self, content: &str, options: &SinkOptions) -> Result<NotificationResult, SinkError> {
        let channel = options.str("channel").unwrap_or(&self.default_channel).to_string();
        let chunks = chunk_text(content, MAX_MESSAGE_CHARS);

        // Overflow chunks go into the thread opened by the first one.
        let first_ts = self.post(&channel, &chunks[0], options.str("thread_ts")).await?;
        let thread_ts = options.str("thread_ts").map(str::to_string).unwrap_or(first_ts);
        for chunk in &chunks[1..] {
            self.post(&channel, chunk, Some(&thread_ts)).await?;
        }

        Ok(NotificationResult::ok(format!("Message sent to {channel}"))
            .detail("channel", channel)
            .detail("thread_ts", thread_ts)
            .detail("chunks", chunks.len()))
    }

    fn name(&self) -> &str {
        "slack"
    }
}
