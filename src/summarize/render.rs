// src/summarize/render.rs
use chrono_tz::Tz;

use super::{Category, DigestSummary, SummaryItem};

pub const DIGEST_TITLE: &str = "# Project Update Digest";

/// Markdown artifact: header, then one numbered section per non-empty category
/// in fixed order. Empty categories produce no section.
pub fn render_markdown(summary: &DigestSummary, tz: &Tz) -> String {
    let generated = summary.generated_at.with_timezone(tz);
    let mut lines = vec![
        DIGEST_TITLE.to_string(),
        format!("*Generated at: {}*\n", generated.format("%Y-%m-%d %H:%M %Z")),
    ];

    for category in Category::ALL {
        let items = items_of(summary, category);
        if items.is_empty() {
            continue;
        }
        lines.push(format!("## {}", category.title()));
        for (idx, item) in items.iter().enumerate() {
            if item.source.is_empty() {
                lines.push(format!("{}. {}", idx + 1, item.content));
            } else {
                lines.push(format!("{}. {}\n*Source: {}*", idx + 1, item.content, item.source));
            }
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn items_of(summary: &DigestSummary, category: Category) -> &[SummaryItem] {
    match category {
        Category::Progress => &summary.progress,
        Category::Blockers => &summary.blockers,
        Category::NextSteps => &summary.next_steps,
    }
}
