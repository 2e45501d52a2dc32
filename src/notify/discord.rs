use anyhow::Result;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{chunk_text, NotificationResult, Sink, SinkOptions};
use crate::config::settings::{resolve_secret, DiscordSettings};
use crate::error::SinkError;

/// Discord's hard limit for `content`.
pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Clone)]
pub struct DiscordSink {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
    base_backoff: Duration,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

impl DiscordSink {
    pub fn from_settings(cfg: &DiscordSettings) -> Result<Self> {
        let webhook = resolve_secret(&cfg.webhook_url, "DISCORD_WEBHOOK_URL")?;
        Ok(Self::new(webhook).with_retries(cfg.max_retries))
    }

    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.base_backoff = base;
        self
    }

    fn backoff(&self, attempt: u8) -> Duration {
        self.base_backoff * (1u32 << (attempt - 1).min(16))
    }

    async fn post_chunk(&self, payload: &WebhookPayload<'_>) -> Result<(), SinkError> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status() {
                    Ok(_) => return Ok(()),
                    Err(e) => e,
                },
                Err(e) => e,
            };
            if attempt >= self.max_retries {
                return Err(SinkError::Http(err));
            }
            tracing::debug!(attempt, error = %err, "discord webhook failed, retrying");
            tokio::time::sleep(self.backoff(attempt)).await;
        }
    }
}

#[async_trait::async_trait]
impl Sink for DiscordSink {
    async fn send(&self, content: &str, options: &SinkOptions) -> Result<NotificationResult, SinkError> {
        let chunks = chunk_text(content, MAX_MESSAGE_CHARS);
        let username = options.str("username");
        for chunk in &chunks {
            self.post_chunk(&WebhookPayload {
                content: chunk,
                username,
            })
            .await?;
        }
        Ok(NotificationResult::ok("Message sent to Discord webhook").detail("chunks", chunks.len()))
    }

    fn name(&self) -> &str {
        "discord"
    }
}
