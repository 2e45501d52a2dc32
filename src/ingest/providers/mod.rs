pub mod jira;
pub mod notion;
pub mod slack;

use std::sync::Arc;

use crate::config::Settings;
use crate::ingest::types::Collector;

/// Build every collector whose section is present. A section that fails to
/// initialise (missing secret, empty channel list) is skipped with a warning.
pub fn collectors_from_settings(settings: &Settings) -> Vec<Arc<dyn Collector>> {
    let mut out: Vec<Arc<dyn Collector>> = Vec::new();

    if let Some(cfg) = &settings.slack {
        match slack::SlackCollector::from_settings(cfg) {
            Ok(c) => {
                tracing::info!(channels = cfg.channels.len(), "initialized slack collector");
                out.push(Arc::new(c));
            }
            Err(e) => tracing::warn!("could not initialize slack collector: {e:#}"),
        }
    }
    if let Some(cfg) = &settings.jira {
        match jira::JiraCollector::from_settings(cfg) {
            Ok(c) => {
                tracing::info!("initialized jira collector");
                out.push(Arc::new(c));
            }
            Err(e) => tracing::warn!("could not initialize jira collector: {e:#}"),
        }
    }
    if let Some(cfg) = &settings.notion {
        match notion::NotionCollector::from_settings(cfg) {
            Ok(c) => {
                tracing::info!("initialized notion collector");
                out.push(Arc::new(c));
            }
            Err(e) => tracing::warn!("could not initialize notion collector: {e:#}"),
        }
    }

    out
}
