//! # Digest summary
//! The consolidated result of one cycle, the summarizer seam, the keyword
//! fallback used when the summarizer is unavailable, and text rendering.

pub mod fallback;
pub mod openai;
pub mod render;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SummarizeError;
use crate::ingest::types::{Metadata, UpdateRecord};

pub use fallback::{classify, fallback_summary, Category};
pub use render::render_markdown;

/// A single summarized item (progress, blocker, or next step).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryItem {
    pub content: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SummaryItem {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            metadata: Metadata::new(),
        }
    }
}

/// Every summarized item sits in exactly one of the three categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DigestSummary {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub progress: Vec<SummaryItem>,
    #[serde(default)]
    pub blockers: Vec<SummaryItem>,
    #[serde(default)]
    pub next_steps: Vec<SummaryItem>,
}

impl DigestSummary {
    pub fn empty(generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            progress: Vec::new(),
            blockers: Vec::new(),
            next_steps: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.progress.is_empty() && self.blockers.is_empty() && self.next_steps.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.progress.len() + self.blockers.len() + self.next_steps.len()
    }

    pub fn push(&mut self, category: Category, item: SummaryItem) {
        match category {
            Category::Progress => self.progress.push(item),
            Category::Blockers => self.blockers.push(item),
            Category::NextSteps => self.next_steps.push(item),
        }
    }

    /// Render in UTC. See [`render_markdown`] for other timezones.
    pub fn to_markdown(&self) -> String {
        render_markdown(self, &chrono_tz::UTC)
    }
}

/// Turns an ordered batch of records into a structured digest.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, records: &[UpdateRecord]) -> Result<DigestSummary, SummarizeError>;

    fn name(&self) -> &str;
}

/// Always fails, so the pipeline's keyword fallback runs. Used when no model is configured.
pub struct DisabledSummarizer;

#[async_trait::async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _records: &[UpdateRecord]) -> Result<DigestSummary, SummarizeError> {
        Err(SummarizeError::Disabled)
    }

    fn name(&self) -> &str {
        "disabled"
    }
}
