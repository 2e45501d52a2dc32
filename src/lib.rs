// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod scheduler;

// Collectors + aggregation pipeline
pub mod ingest;
// Summarizer seam, keyword fallback, rendering
pub mod summarize;
// Sinks + dispatch coordinator
pub mod notify;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::Settings;
pub use crate::engine::{digest_job, CycleReport, DigestArtifact, DigestEngine, DispatchPlan};
pub use crate::ingest::types::{Collector, UpdateRecord};
pub use crate::ingest::AggregationPipeline;
pub use crate::notify::{DispatchCoordinator, NotificationResult, Sink, SinkOptions};
pub use crate::scheduler::DigestScheduler;
pub use crate::summarize::{DigestSummary, Summarizer};

use std::sync::Arc;

use crate::summarize::{openai::OpenAiSummarizer, DisabledSummarizer};

/// Wire collectors, summarizer and sinks from settings. Adapters whose
/// section is missing or invalid are skipped with a warning.
pub fn build_engine(settings: &Settings) -> anyhow::Result<DigestEngine> {
    let tz = settings.tz()?;

    let summarizer: Arc<dyn Summarizer> = match &settings.openai {
        Some(cfg) => match OpenAiSummarizer::from_settings(cfg) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                tracing::warn!("could not initialize summarizer, using keyword fallback: {e:#}");
                Arc::new(DisabledSummarizer)
            }
        },
        None => Arc::new(DisabledSummarizer),
    };

    let pipeline = ingest::providers::collectors_from_settings(settings)
        .into_iter()
        .fold(
            AggregationPipeline::new(summarizer).with_fetch_timeout(settings.fetch_timeout()),
            |p, c| p.with_collector(c),
        );

    let dispatcher = notify::sinks_from_settings(settings)
        .into_iter()
        .fold(
            DispatchCoordinator::new().with_send_timeout(settings.send_timeout()),
            |d, s| d.with_sink(s),
        );

    Ok(
        DigestEngine::new(pipeline, dispatcher, DispatchPlan::from_settings(&settings.digest), tz)
            .with_default_sinks(settings.digest.sinks.clone()),
    )
}
