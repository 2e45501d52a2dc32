use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::config::settings::{resolve_secret, SlackSettings};
use crate::error::CollectorError;
use crate::ingest::normalize_text;
use crate::ingest::types::{Collector, Metadata, UpdateRecord};

/// Auth failures abort the whole fetch; anything else only skips the channel.
const FATAL_ERRORS: [&str; 4] = ["invalid_auth", "not_authed", "token_revoked", "account_inactive"];

#[derive(Debug, Deserialize)]
struct HistoryResp {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    messages: Vec<SlackMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackMessage {
    pub ts: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub reply_count: Option<u32>,
    #[serde(default)]
    pub reactions: Option<serde_json::Value>,
}

pub struct SlackCollector {
    client: Client,
    token: String,
    channels: Vec<String>,
    lookback_days: i64,
    api_base: String,
}

impl SlackCollector {
    pub fn from_settings(cfg: &SlackSettings) -> anyhow::Result<Self> {
        let token = resolve_secret(&cfg.token, "SLACK_BOT_TOKEN")?;
        if cfg.channels.is_empty() {
            anyhow::bail!("slack collector needs at least one channel");
        }
        Ok(Self {
            client: Client::new(),
            token,
            channels: cfg.channels.clone(),
            lookback_days: cfg.lookback_days,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn call(&self, method: &str, query: &[(&str, String)]) -> Result<HistoryResp, CollectorError> {
        let resp: HistoryResp = self
            .client
            .get(format!("{}/{}", self.api_base, method))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp)
    }

    async fn fetch_channel(
        &self,
        channel: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UpdateRecord>, CollectorError> {
        let oldest = format!("{}.000000", since.timestamp());
        let resp = self
            .call(
                "conversations.history",
                &[
                    ("channel", channel.to_string()),
                    ("oldest", oldest),
                    ("limit", "100".to_string()),
                ],
            )
            .await?;
        check_ok(&resp)?;

        let mut out = Vec::new();
        for msg in resp.messages {
            if msg.subtype.as_deref() == Some("bot_message") {
                continue;
            }
            let has_replies = msg.reply_count.unwrap_or(0) > 0;
            let ts = msg.ts.clone();
            if let Some(rec) = message_to_record(channel, &msg, false) {
                out.push(rec);
            }
            if has_replies {
                match self.fetch_thread(channel, &ts, since).await {
                    Ok(mut replies) => out.append(&mut replies),
                    Err(e) => tracing::warn!(channel, thread_ts = %ts, error = %e, "slack thread fetch failed"),
                }
            }
        }
        Ok(out)
    }

    async fn fetch_thread(
        &self,
        channel: &str,
        thread_ts: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<UpdateRecord>, CollectorError> {
        let resp = self
            .call(
                "conversations.replies",
                &[("channel", channel.to_string()), ("ts", thread_ts.to_string())],
            )
            .await?;
        check_ok(&resp)?;

        // First message is the parent, already recorded.
        Ok(resp
            .messages
            .iter()
            .skip(1)
            .filter_map(|m| message_to_record(channel, m, true))
            .filter(|r| r.timestamp > since)
            .collect())
    }
}

fn check_ok(resp: &HistoryResp) -> Result<(), CollectorError> {
    if resp.ok {
        return Ok(());
    }
    Err(CollectorError::Api {
        service: "slack",
        message: resp.error.clone().unwrap_or_else(|| "unknown_error".into()),
    })
}

fn is_fatal(e: &CollectorError) -> bool {
    matches!(e, CollectorError::Api { message, .. } if FATAL_ERRORS.contains(&message.as_str()))
}

/// Slack `ts` is "<unix secs>.<micros>".
pub fn parse_slack_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    let micros: u32 = format!("{frac:0<6}").get(..6)?.parse().ok()?;
    Utc.timestamp_opt(secs, micros * 1_000).single()
}

pub fn message_link(channel: &str, ts: &str) -> String {
    format!("https://slack.com/app_redirect?channel={channel}&message={ts}")
}

pub fn message_to_record(channel: &str, msg: &SlackMessage, is_reply: bool) -> Option<UpdateRecord> {
    let timestamp = parse_slack_ts(&msg.ts)?;
    let text = normalize_text(&msg.text);
    if text.is_empty() {
        return None;
    }

    let source = if is_reply {
        format!("slack:{channel}:thread")
    } else {
        format!("slack:{channel}")
    };

    let mut meta = Metadata::new();
    meta.insert("channel".into(), channel.into());
    if let Some(t) = &msg.thread_ts {
        meta.insert("thread_ts".into(), t.clone().into());
    }
    if is_reply {
        meta.insert("is_thread_reply".into(), true.into());
    }
    if let Some(r) = &msg.reactions {
        meta.insert("reactions".into(), r.clone());
    }

    Some(
        UpdateRecord::new(source, text, timestamp)
            .with_author(msg.user.clone().unwrap_or_else(|| "unknown".into()))
            .with_url(message_link(channel, &msg.ts))
            .with_metadata(meta),
    )
}

#[async_trait]
impl Collector for SlackCollector {
    async fn fetch_updates(&self, since: DateTime<Utc>) -> Result<Vec<UpdateRecord>, CollectorError> {
        let mut out = Vec::new();
        for channel in &self.channels {
            match self.fetch_channel(channel, since).await {
                Ok(mut v) => out.append(&mut v),
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    tracing::error!(channel = %channel, error = %e, "slack channel fetch failed");
                }
            }
        }
        Ok(out)
    }

    fn name(&self) -> &str {
        "slack"
    }

    fn lookback(&self) -> Duration {
        Duration::days(self.lookback_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(ts: &str, text: &str) -> SlackMessage {
        SlackMessage {
            ts: ts.into(),
            text: text.into(),
            user: Some("U1".into()),
            subtype: None,
            thread_ts: None,
            reply_count: None,
            reactions: None,
        }
    }

    #[test]
    fn ts_parses_micros() {
        let t = parse_slack_ts("1700000000.000200").unwrap();
        assert_eq!(t.timestamp(), 1_700_000_000);
        assert_eq!(t.timestamp_subsec_micros(), 200);
        assert!(parse_slack_ts("garbage").is_none());
    }

    #[test]
    fn reply_gets_thread_source_and_link() {
        let rec = message_to_record("C123", &msg("1700000000.000100", "done &amp; dusted"), true).unwrap();
        assert_eq!(rec.source, "slack:C123:thread");
        assert_eq!(rec.content, "done & dusted");
        assert_eq!(rec.author, "U1");
        assert!(rec.url.ends_with("channel=C123&message=1700000000.000100"));
        assert_eq!(rec.metadata["is_thread_reply"], serde_json::Value::Bool(true));
    }

    #[test]
    fn blank_message_is_dropped() {
        assert!(message_to_record("C1", &msg("1700000000.0", "   "), false).is_none());
    }

    #[test]
    fn auth_errors_are_fatal() {
        let e = CollectorError::Api {
            service: "slack",
            message: "invalid_auth".into(),
        };
        assert!(is_fatal(&e));
        let e = CollectorError::Api {
            service: "slack",
            message: "channel_not_found".into(),
        };
        assert!(!is_fatal(&e));
    }
}
