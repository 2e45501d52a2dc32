// src/ingest/types.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollectorError;

/// Source-specific key/value payload attached to records and summary items.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One observed event from a source. Immutable once a collector builds it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateRecord {
    pub source: String, // e.g. "slack:C123", "jira:PROJ-1"
    pub content: String,
    #[serde(default)]
    pub author: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl UpdateRecord {
    pub fn new(
        source: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            author: String::new(),
            timestamp,
            url: String::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Produces update records for one external source.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    /// Fetch everything newer than `since`. Transient failures are returned as errors;
    /// the pipeline turns them into zero records for this cycle.
    async fn fetch_updates(&self, since: DateTime<Utc>) -> Result<Vec<UpdateRecord>, CollectorError>;

    fn name(&self) -> &str;

    /// How far back a cycle looks when no cursor is supplied.
    fn lookback(&self) -> Duration {
        Duration::days(1)
    }
}
