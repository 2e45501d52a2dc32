// src/ingest/mod.rs
//! Aggregation pipeline: fan out to every collector, merge, sort, summarize.

pub mod providers;
pub mod types;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

use crate::error::{panic_message, CollectorError};
use crate::summarize::{fallback_summary, DigestSummary, Summarizer};
use crate::ingest::types::{Collector, UpdateRecord};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("digest_records_total", "Records merged across all collectors.");
        describe_counter!(
            "digest_collector_errors_total",
            "Collector fetch failures (each contributes zero records)."
        );
        describe_counter!(
            "digest_summarizer_fallbacks_total",
            "Cycles summarized by the keyword fallback."
        );
        describe_histogram!("digest_fetch_ms", "Per-collector fetch time in milliseconds.");
    });
}

/// Normalize chat/markup text: decode HTML entities, collapse whitespace, trim, cap length.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s).to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[ \t\r\f\v]+").expect("static regex"));
    let mut out = decoded
        .lines()
        .map(|line| re_ws.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if out.chars().count() > 4000 {
        out = out.chars().take(4000).collect();
    }
    out
}

/// Concatenate batches in order, then sort newest first. `sort_by` is stable,
/// so equal timestamps keep arrival order.
pub fn merge_updates(batches: Vec<Vec<UpdateRecord>>) -> Vec<UpdateRecord> {
    let mut merged: Vec<UpdateRecord> = batches.into_iter().flatten().collect();
    merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    merged
}

pub struct AggregationPipeline {
    collectors: Vec<Arc<dyn Collector>>,
    summarizer: Arc<dyn Summarizer>,
    fetch_timeout: Duration,
}

impl AggregationPipeline {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            collectors: Vec::new(),
            summarizer,
            fetch_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn collector_names(&self) -> Vec<String> {
        self.collectors.iter().map(|c| c.name().to_string()).collect()
    }

    /// Fetch from every collector concurrently. A failing, panicking or
    /// timed-out collector contributes nothing; the rest still count.
    pub async fn collect(&self, now: DateTime<Utc>) -> Vec<UpdateRecord> {
        ensure_metrics_described();

        let fetches = self.collectors.iter().map(|c| {
            let since = now - c.lookback();
            let timeout = self.fetch_timeout;
            async move {
                let t0 = Instant::now();
                let fetch = AssertUnwindSafe(c.fetch_updates(since)).catch_unwind();
                let res = match tokio::time::timeout(timeout, fetch).await {
                    Ok(Ok(r)) => r,
                    Ok(Err(panic)) => Err(CollectorError::Panicked(panic_message(panic))),
                    Err(_) => Err(CollectorError::Timeout(timeout.as_secs())),
                };
                histogram!("digest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

                match res {
                    Ok(records) => {
                        tracing::info!(
                            target: "digest",
                            collector = c.name(),
                            count = records.len(),
                            "fetched updates"
                        );
                        records
                    }
                    Err(e) => {
                        tracing::error!(
                            target: "digest",
                            collector = c.name(),
                            error = %e,
                            transient = e.is_transient(),
                            "collector failed; contributing zero records"
                        );
                        counter!("digest_collector_errors_total", "collector" => c.name().to_string())
                            .increment(1);
                        Vec::new()
                    }
                }
            }
        });

        let merged = merge_updates(join_all(fetches).await);
        counter!("digest_records_total").increment(merged.len() as u64);
        merged
    }

    /// Summarize an already merged batch. Empty input never reaches the summarizer;
    /// a summarizer error falls back to keyword classification.
    pub async fn summarize(&self, records: &[UpdateRecord], now: DateTime<Utc>) -> DigestSummary {
        if records.is_empty() {
            return DigestSummary::empty(now);
        }
        match self.summarizer.summarize(records).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(
                    target: "digest",
                    summarizer = self.summarizer.name(),
                    error = %e,
                    "summarizer failed; using keyword fallback"
                );
                counter!("digest_summarizer_fallbacks_total").increment(1);
                fallback_summary(records, now)
            }
        }
    }

    pub async fn run_cycle(&self) -> (Vec<UpdateRecord>, DigestSummary) {
        self.run_cycle_at(Utc::now()).await
    }

    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> (Vec<UpdateRecord>, DigestSummary) {
        let records = self.collect(now).await;
        let summary = self.summarize(&records, now).await;
        (records, summary)
    }
}
