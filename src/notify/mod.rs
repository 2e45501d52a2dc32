// src/notify/mod.rs
//! Notification sinks and the dispatch coordinator that fans a rendered
//! digest out to them.

pub mod discord;
pub mod email;
pub mod slack;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Settings;
use crate::error::{panic_message, SinkError};
use crate::ingest::types::Metadata;

/// Outcome of one send attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub details: Metadata,
}

impl NotificationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: Metadata::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: Metadata::new(),
        }
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Channel-specific options supplied at dispatch time
/// (e.g. `channel`, `subject`, `to_recipients`, `is_html`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct SinkOptions(pub Metadata);

impl SinkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// A string list; a single string is accepted as a one-element list.
    pub fn strings(&self, key: &str) -> Result<Vec<String>, SinkError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| SinkError::InvalidOptions(format!("{key} must contain strings")))
                })
                .collect(),
            Some(_) => Err(SinkError::InvalidOptions(format!("{key} must be a list of strings"))),
        }
    }
}

/// Per-sink options for one dispatch, keyed by sink name.
pub type DispatchOptions = HashMap<String, SinkOptions>;

/// Delivers a rendered digest through one channel.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, content: &str, options: &SinkOptions) -> Result<NotificationResult, SinkError>;

    fn name(&self) -> &str;
}

/// Aggregated outcome of one dispatch. `success` is the AND of every requested sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchReport {
    pub success: bool,
    pub results: BTreeMap<String, NotificationResult>,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("digest_sink_failures_total", "Failed sink deliveries.");
        describe_counter!("digest_sink_sends_total", "Attempted sink deliveries.");
    });
}

pub struct DispatchCoordinator {
    sinks: Vec<Arc<dyn Sink>>,
    send_timeout: Duration,
}

impl Default for DispatchCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchCoordinator {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            send_timeout: Duration::from_secs(30),
        }
    }

    /// Register a sink. A later sink with the same name replaces the earlier one.
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.retain(|s| s.name() != sink.name());
        self.sinks.push(sink);
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn Sink>> {
        self.sinks.iter().find(|s| s.name() == name)
    }

    /// Send `artifact` to each requested sink (all registered sinks when `None`)
    /// concurrently. Errors, panics, timeouts and unknown names become failed
    /// results; they never stop delivery to the other sinks. A name requested
    /// more than once is sent once.
    pub async fn send_digest(
        &self,
        artifact: &str,
        sink_names: Option<&[String]>,
        options: &DispatchOptions,
    ) -> DispatchReport {
        ensure_metrics_described();

        let mut seen = HashSet::new();
        let requested: Vec<String> = match sink_names {
            Some(names) => names.to_vec(),
            None => self.sink_names(),
        }
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect();

        let empty = SinkOptions::default();
        let sends = requested.iter().map(|name| {
            let sink = self.find(name).cloned();
            let opts = options.get(name).unwrap_or(&empty);
            let timeout = self.send_timeout;
            async move {
                counter!("digest_sink_sends_total").increment(1);
                let outcome = match sink {
                    None => Err(SinkError::NotRegistered(name.clone())),
                    Some(sink) => {
                        let send = AssertUnwindSafe(sink.send(artifact, opts)).catch_unwind();
                        match tokio::time::timeout(timeout, send).await {
                            Ok(Ok(r)) => r,
                            Ok(Err(panic)) => Err(SinkError::Panicked(panic_message(panic))),
                            Err(_) => Err(SinkError::Timeout(timeout.as_secs())),
                        }
                    }
                };
                let result = match outcome {
                    Ok(r) => r,
                    Err(e) => {
                        let msg = format!("Error sending digest via {name}: {e}");
                        tracing::error!(target: "digest", sink = %name, error = %e, "sink failed");
                        NotificationResult::failed(msg).detail("error", e.to_string())
                    }
                };
                if result.success {
                    tracing::info!(target: "digest", sink = %name, message = %result.message, "sent digest");
                } else {
                    counter!("digest_sink_failures_total", "sink" => name.clone()).increment(1);
                }
                (name.clone(), result)
            }
        });

        let results: BTreeMap<String, NotificationResult> = join_all(sends).await.into_iter().collect();
        let success = results.values().all(|r| r.success);
        DispatchReport { success, results }
    }
}

/// Build every sink whose section is present; misconfigured sections are skipped with a warning.
pub fn sinks_from_settings(settings: &Settings) -> Vec<Arc<dyn Sink>> {
    let mut out: Vec<Arc<dyn Sink>> = Vec::new();

    if let Some(cfg) = &settings.slack {
        match slack::SlackSink::from_settings(cfg, &settings.digest.slack_channel) {
            Ok(s) => out.push(Arc::new(s)),
            Err(e) => tracing::warn!("could not initialize slack sink: {e:#}"),
        }
    }
    if let Some(cfg) = &settings.email {
        match email::EmailSink::from_settings(cfg) {
            Ok(s) => out.push(Arc::new(s)),
            Err(e) => tracing::warn!("could not initialize email sink: {e:#}"),
        }
    }
    if let Some(cfg) = &settings.discord {
        match discord::DiscordSink::from_settings(cfg) {
            Ok(s) => out.push(Arc::new(s)),
            Err(e) => tracing::warn!("could not initialize discord sink: {e:#}"),
        }
    }

    for s in &out {
        tracing::info!(sink = s.name(), "initialized sink");
    }
    out
}

/// Split on char boundaries into pieces of at most `max_chars` characters.
pub fn chunk_text(content: &str, max_chars: usize) -> Vec<String> {
    if content.is_empty() || max_chars == 0 {
        return vec![content.to_string()];
    }
    let chars: Vec<char> = content.chars().collect();
    chars.chunks(max_chars).map(|c| c.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_accessors() {
        let o = SinkOptions::new()
            .set("channel", "#eng")
            .set("is_html", false)
            .set("to_recipients", vec!["a@x.io", "b@x.io"]);
        assert_eq!(o.str("channel"), Some("#eng"));
        assert_eq!(o.bool("is_html"), Some(false));
        assert_eq!(o.strings("to_recipients").unwrap().len(), 2);
        assert!(o.strings("cc_recipients").unwrap().is_empty());
        assert!(SinkOptions::new().set("to_recipients", 5).strings("to_recipients").is_err());
    }

    #[test]
    fn chunking_respects_char_boundaries() {
        let s = "žluťoučký kůň";
        let parts = chunk_text(s, 4);
        assert_eq!(parts.concat(), s);
        assert!(parts.iter().all(|p| p.chars().count() <= 4));
        assert_eq!(chunk_text("", 10), vec![String::new()]);
    }
}
