// src/summarize/fallback.rs
//! Deterministic keyword classifier used when the summarizer fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DigestSummary, SummaryItem};
use crate::ingest::types::UpdateRecord;

/// Checked first: a record mentioning any of these is a blocker.
pub const BLOCKER_KEYWORDS: [&str; 7] = ["block", "issue", "problem", "can't", "cannot", "bug", "broken"];
/// Checked second.
pub const NEXT_STEP_KEYWORDS: [&str; 4] = ["next", "todo", "need to", "should"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Progress,
    Blockers,
    NextSteps,
}

impl Category {
    /// Fixed render order.
    pub const ALL: [Category; 3] = [Category::Progress, Category::Blockers, Category::NextSteps];

    pub fn title(self) -> &'static str {
        match self {
            Category::Progress => "Progress",
            Category::Blockers => "Blockers",
            Category::NextSteps => "Next Steps",
        }
    }
}

/// Case-insensitive substring match; blocker keywords win over next-step keywords.
pub fn classify(text: &str) -> Category {
    let lower = text.to_lowercase();
    if BLOCKER_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Category::Blockers
    } else if NEXT_STEP_KEYWORDS.iter().any(|k| lower.contains(k)) {
        Category::NextSteps
    } else {
        Category::Progress
    }
}

/// Classify every record into exactly one category, keeping input order within each.
pub fn fallback_summary(records: &[UpdateRecord], generated_at: DateTime<Utc>) -> DigestSummary {
    let mut summary = DigestSummary::empty(generated_at);
    for rec in records {
        summary.push(
            classify(&rec.content),
            SummaryItem::new(rec.content.clone(), rec.source.clone()),
        );
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn blocker_keywords_take_precedence() {
        assert_eq!(classify("can't figure out next steps"), Category::Blockers);
        assert_eq!(classify("We CANNOT deploy"), Category::Blockers);
        assert_eq!(classify("bug: login Blocked by SSO"), Category::Blockers);
        assert_eq!(classify("bug: login broken"), Category::Blockers);
    }

    #[test]
    fn next_step_and_progress() {
        assert_eq!(classify("TODO: write docs"), Category::NextSteps);
        assert_eq!(classify("we need to rotate keys"), Category::NextSteps);
        assert_eq!(classify("shipped auth"), Category::Progress);
        assert_eq!(classify(""), Category::Progress);
    }

    #[test]
    fn every_record_lands_in_one_category() {
        let t = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        let recs = vec![
            UpdateRecord::new("a", "merged PR", t),
            UpdateRecord::new("b", "problem with CI", t),
            UpdateRecord::new("c", "next: release", t),
            UpdateRecord::new("d", "release notes", t),
        ];
        let s = fallback_summary(&recs, t);
        assert_eq!(s.item_count(), recs.len());
        assert_eq!(s.progress.len(), 2);
        assert_eq!(s.blockers[0].source, "b");
        assert_eq!(s.next_steps[0].content, "next: release");
        assert_eq!(s.progress[1].source, "d");
    }
}
