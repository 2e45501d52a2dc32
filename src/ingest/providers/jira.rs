use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::config::settings::{resolve_secret, JiraSettings};
use crate::error::CollectorError;
use crate::ingest::types::{Collector, Metadata, UpdateRecord};

const MAX_RESULTS: u32 = 50;
const FIELDS: &str = "summary,description,status,assignee,reporter,priority,issuetype,updated,comment";

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    issues: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
pub struct Issue {
    pub key: String,
    pub fields: IssueFields,
}

#[derive(Debug, Deserialize)]
pub struct IssueFields {
    #[serde(default)]
    pub summary: String,
    pub updated: String,
    #[serde(default)]
    pub status: Option<Named>,
    #[serde(default)]
    pub assignee: Option<Person>,
    #[serde(default)]
    pub reporter: Option<Person>,
    #[serde(default)]
    pub priority: Option<Named>,
    #[serde(default)]
    pub issuetype: Option<Named>,
    #[serde(default)]
    pub comment: Option<CommentPage>,
}

#[derive(Debug, Deserialize)]
pub struct Named {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct Person {
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentPage {
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub author: Option<Person>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub updated: Option<String>,
}

pub struct JiraCollector {
    client: Client,
    server: String,
    email: String,
    api_token: String,
    projects: Vec<String>,
    lookback_days: i64,
}

impl JiraCollector {
    pub fn from_settings(cfg: &JiraSettings) -> anyhow::Result<Self> {
        if cfg.server.trim().is_empty() || cfg.email.trim().is_empty() {
            anyhow::bail!("Missing required Jira configuration (server/email)");
        }
        let api_token = resolve_secret(&cfg.api_token, "JIRA_API_TOKEN").context("jira api token")?;
        Ok(Self {
            client: Client::new(),
            server: cfg.server.trim_end_matches('/').to_string(),
            email: cfg.email.clone(),
            api_token,
            projects: cfg.projects.clone(),
            lookback_days: cfg.lookback_days,
        })
    }
}

/// JQL for issues updated since `since`, optionally limited to projects.
pub fn build_jql(since: DateTime<Utc>, projects: &[String]) -> String {
    let mut parts = vec![format!("updated >= '{}'", since.format("%Y-%m-%d %H:%M"))];
    if !projects.is_empty() {
        let list = projects
            .iter()
            .map(|p| format!("\"{p}\""))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("project in ({list})"));
    }
    parts.join(" AND ")
}

/// Jira timestamps look like "2024-05-01T10:00:00.000+0000".
pub fn parse_jira_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn issue_to_record(server: &str, issue: &Issue, since: DateTime<Utc>) -> Option<UpdateRecord> {
    let f = &issue.fields;
    let timestamp = parse_jira_time(&f.updated)?;
    let status = f.status.as_ref().map(|s| s.name.as_str()).unwrap_or("Unknown");
    let assignee = f
        .assignee
        .as_ref()
        .map(|p| p.display_name.as_str())
        .unwrap_or("Unassigned");

    let comments: Vec<String> = f
        .comment
        .as_ref()
        .map(|page| {
            page.comments
                .iter()
                .filter(|c| {
                    c.updated
                        .as_deref()
                        .and_then(parse_jira_time)
                        .is_some_and(|t| t >= since)
                })
                .map(|c| {
                    let who = c.author.as_ref().map(|a| a.display_name.as_str()).unwrap_or("Someone");
                    format!("{who} commented: {}", c.body)
                })
                .collect()
        })
        .unwrap_or_default();

    let content = format!("{}: {}\nStatus: {}\n{}", issue.key, f.summary, status, comments.join("; "));

    let mut meta = Metadata::new();
    meta.insert("key".into(), issue.key.clone().into());
    meta.insert("status".into(), status.into());
    meta.insert("assignee".into(), assignee.into());
    meta.insert(
        "priority".into(),
        f.priority.as_ref().map(|p| p.name.as_str()).unwrap_or("Unspecified").into(),
    );
    meta.insert(
        "issue_type".into(),
        f.issuetype.as_ref().map(|p| p.name.as_str()).unwrap_or("Unknown").into(),
    );

    Some(
        UpdateRecord::new(format!("jira:{}", issue.key), content.trim_end(), timestamp)
            .with_author(
                f.reporter
                    .as_ref()
                    .map(|p| p.display_name.clone())
                    .unwrap_or_else(|| "Unknown".into()),
            )
            .with_url(format!("{server}/browse/{}", issue.key))
            .with_metadata(meta),
    )
}

#[async_trait]
impl Collector for JiraCollector {
    async fn fetch_updates(&self, since: DateTime<Utc>) -> Result<Vec<UpdateRecord>, CollectorError> {
        let jql = build_jql(since, &self.projects);
        let max_results = MAX_RESULTS.to_string();
        let resp = self
            .client
            .get(format!("{}/rest/api/2/search", self.server))
            .basic_auth(&self.email, Some(&self.api_token))
            .query(&[
                ("jql", jql.as_str()),
                ("maxResults", max_results.as_str()),
                ("fields", FIELDS),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollectorError::Api {
                service: "jira",
                message: format!("{status}: {body}"),
            });
        }

        let body: SearchResp = resp
            .json()
            .await
            .map_err(|e| CollectorError::Parse(e.to_string()))?;

        Ok(body
            .issues
            .iter()
            .filter_map(|i| issue_to_record(&self.server, i, since))
            .collect())
    }

    fn name(&self) -> &str {
        "jira"
    }

    fn lookback(&self) -> Duration {
        Duration::days(self.lookback_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn jql_includes_projects_when_set() {
        let since = Utc.with_ymd_and_hms(2025, 4, 1, 8, 30, 0).unwrap();
        assert_eq!(build_jql(since, &[]), "updated >= '2025-04-01 08:30'");
        assert_eq!(
            build_jql(since, &["WEB".into(), "API".into()]),
            "updated >= '2025-04-01 08:30' AND project in (\"WEB\", \"API\")"
        );
    }

    #[test]
    fn issue_maps_to_record_with_recent_comments_only() {
        let since = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        let issue: Issue = serde_json::from_value(serde_json::json!({
            "key": "P-1",
            "fields": {
                "summary": "Login broken",
                "updated": "2025-04-02T10:00:00.000+0000",
                "status": {"name": "In Progress"},
                "reporter": {"displayName": "Ana"},
                "comment": {"comments": [
                    {"author": {"displayName": "Bo"}, "body": "old", "updated": "2025-03-01T10:00:00.000+0000"},
                    {"author": {"displayName": "Cy"}, "body": "fixed locally", "updated": "2025-04-02T09:00:00.000+0000"}
                ]}
            }
        }))
        .unwrap();

        let rec = issue_to_record("https://x.atlassian.net", &issue, since).unwrap();
        assert_eq!(rec.source, "jira:P-1");
        assert_eq!(rec.author, "Ana");
        assert_eq!(rec.url, "https://x.atlassian.net/browse/P-1");
        assert!(rec.content.starts_with("P-1: Login broken\nStatus: In Progress"));
        assert!(rec.content.contains("Cy commented: fixed locally"));
        assert!(!rec.content.contains("old"));
        assert_eq!(rec.metadata["assignee"], "Unassigned");
    }
}
