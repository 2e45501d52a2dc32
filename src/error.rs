//! Error types for the digest pipeline.
//!
//! Errors are classified by where they are contained:
//! - Collector: one source, degrades completeness only
//! - Summarize: recovered locally by the keyword fallback
//! - Sink: one channel, recorded in that channel's result
//! - Schedule: surfaced synchronously to the caller of `schedule()`

use thiserror::Error;

/// A single collector failed to produce records for this cycle.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} API error: {message}")]
    Api { service: &'static str, message: String },

    #[error("Fetch timed out after {0} seconds")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Collector panicked: {0}")]
    Panicked(String),
}

/// The summarization engine was unreachable or returned something unusable.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Summarizer API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unparseable summarizer output: {0}")]
    Parse(String),

    #[error("Summarizer disabled (no API key configured)")]
    Disabled,
}

/// One notification channel failed.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} API error: {message}")]
    Api { service: &'static str, message: String },

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Send timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Sink '{0}' is not registered")]
    NotRegistered(String),

    #[error("Sink panicked: {0}")]
    Panicked(String),
}

/// A trigger could not be installed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

impl CollectorError {
    /// Transient failures are worth another try next cycle; config errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollectorError::Http(_) | CollectorError::Timeout(_) | CollectorError::Api { .. }
        )
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
