//! # Digest Engine
//! One cycle = aggregate (collect, merge, summarize), render, dispatch.
//!
//! A cycle never returns `Err`. Collector and summarizer failures are
//! absorbed by the pipeline, sink failures land in their own result, and the
//! cycle's `success` is the AND of every requested sink.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::settings::DigestSettings;
use crate::ingest::types::UpdateRecord;
use crate::ingest::AggregationPipeline;
use crate::notify::{DispatchCoordinator, DispatchOptions, NotificationResult, SinkOptions};
use crate::scheduler::JobCallback;
use crate::summarize::{render_markdown, DigestSummary};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("digest_cycles_total", "Digest cycles run.");
        describe_counter!(
            "digest_cycle_failures_total",
            "Digest cycles where at least one sink failed."
        );
    });
}

/// Rendered output of the aggregation half of a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DigestArtifact {
    pub text: String,
    pub records: usize,
    pub summary: DigestSummary,
}

/// Outcome of a full cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub success: bool,
    pub results: BTreeMap<String, NotificationResult>,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Builds per-sink options for one cycle. Sinks without an entry get none.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub slack_channel: String,
    pub email_recipients: Vec<String>,
    pub subject_prefix: String,
}

impl DispatchPlan {
    pub fn from_settings(cfg: &DigestSettings) -> Self {
        Self {
            slack_channel: cfg.slack_channel.clone(),
            email_recipients: cfg.email_recipients.clone(),
            subject_prefix: cfg.subject_prefix.clone(),
        }
    }

    /// `"<prefix> - YYYY-MM-DD"`, dated in `tz`.
    pub fn subject(&self, now: DateTime<Utc>, tz: &Tz) -> String {
        format!("{} - {}", self.subject_prefix, now.with_timezone(tz).format("%Y-%m-%d"))
    }

    pub fn options(&self, now: DateTime<Utc>, tz: &Tz) -> DispatchOptions {
        let mut opts = DispatchOptions::new();
        opts.insert(
            "slack".into(),
            SinkOptions::new().set("channel", self.slack_channel.as_str()),
        );
        opts.insert(
            "email".into(),
            SinkOptions::new()
                .set("subject", self.subject(now, tz))
                .set("to_recipients", self.email_recipients.clone())
                .set("is_html", false),
        );
        opts
    }
}

pub struct DigestEngine {
    pipeline: AggregationPipeline,
    dispatcher: DispatchCoordinator,
    plan: DispatchPlan,
    tz: Tz,
    /// Sinks used when a cycle doesn't name any; empty means all registered.
    default_sinks: Vec<String>,
}

impl DigestEngine {
    pub fn new(pipeline: AggregationPipeline, dispatcher: DispatchCoordinator, plan: DispatchPlan, tz: Tz) -> Self {
        Self {
            pipeline,
            dispatcher,
            plan,
            tz,
            default_sinks: Vec::new(),
        }
    }

    pub fn with_default_sinks(mut self, sinks: Vec<String>) -> Self {
        self.default_sinks = sinks;
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn collector_names(&self) -> Vec<String> {
        self.pipeline.collector_names()
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.dispatcher.sink_names()
    }

    pub async fn generate_digest(&self) -> DigestArtifact {
        self.generate_digest_at(Utc::now()).await
    }

    pub async fn generate_digest_at(&self, now: DateTime<Utc>) -> DigestArtifact {
        let (records, summary) = self.pipeline.run_cycle_at(now).await;
        let text = render_markdown(&summary, &self.tz);
        DigestArtifact {
            text,
            records: records.len(),
            summary,
        }
    }

    /// Render an already-collected batch without touching collectors.
    pub async fn digest_from_records(&self, records: &[UpdateRecord], now: DateTime<Utc>) -> DigestArtifact {
        let summary = self.pipeline.summarize(records, now).await;
        DigestArtifact {
            text: render_markdown(&summary, &self.tz),
            records: records.len(),
            summary,
        }
    }

    pub async fn run_digest_cycle(&self, sink_names: Option<&[String]>) -> CycleReport {
        self.run_digest_cycle_at(sink_names, Utc::now()).await
    }

    pub async fn run_digest_cycle_at(&self, sink_names: Option<&[String]>, now: DateTime<Utc>) -> CycleReport {
        ensure_metrics_described();
        counter!("digest_cycles_total").increment(1);
        tracing::info!(target: "digest", "starting digest cycle");

        let artifact = self.generate_digest_at(now).await;

        let sinks = match sink_names {
            Some(names) => Some(names),
            None if !self.default_sinks.is_empty() => Some(self.default_sinks.as_slice()),
            None => None,
        };
        let options = self.plan.options(now, &self.tz);
        let report = self.dispatcher.send_digest(&artifact.text, sinks, &options).await;

        let error = if report.success {
            None
        } else {
            let failed: Vec<&str> = report
                .results
                .iter()
                .filter(|(_, r)| !r.success)
                .map(|(name, _)| name.as_str())
                .collect();
            Some(format!("failed sinks: {}", failed.join(", ")))
        };

        if report.success {
            tracing::info!(
                target: "digest",
                records = artifact.records,
                sinks = report.results.len(),
                "digest cycle completed"
            );
        } else {
            counter!("digest_cycle_failures_total").increment(1);
            tracing::warn!(
                target: "digest",
                records = artifact.records,
                error = error.as_deref().unwrap_or_default(),
                "digest cycle completed with sink failures"
            );
        }

        CycleReport {
            success: report.success,
            results: report.results,
            records: artifact.records,
            error,
        }
    }
}

/// The callback installed for every digest job: run one full cycle and log it.
/// A failed cycle is a report, not an error, so the job always returns `Ok`.
pub fn digest_job(engine: Arc<DigestEngine>, sinks: Option<Vec<String>>) -> JobCallback {
    Arc::new(move || {
        let engine = engine.clone();
        let sinks = sinks.clone();
        async move {
            let report = engine.run_digest_cycle(sinks.as_deref()).await;
            tracing::info!(
                target: "digest",
                success = report.success,
                records = report.records,
                "scheduled digest cycle finished"
            );
            anyhow::Ok(())
        }
        .boxed()
    })
}
