//! Pipeline stages, in execution order: keyword planning, article
//! search and fetch, relevance filtering, event extraction, and final
//! chronological ordering. The orchestrator wires them together.

pub mod acquire;
pub mod extract;
pub mod keywords;
pub mod prompts;
pub mod relevance;

pub use acquire::{fetch_articles, search_articles, FetchReport};
pub use extract::{chunk_text, extract_events};
pub use keywords::{plan_keywords, KeywordPlan};
pub use relevance::{apply_relevance_threshold, filter_articles, score_events};

use crate::types::TimelineEvent;

/// Order a timeline chronologically. Dates with unknown precision have
/// no position and sink to the end; ties break by finer precision first,
/// then description, so the order is stable across runs.
pub fn sort_chronological(events: &mut [TimelineEvent]) {
    events.sort_by(|a, b| {
        match (a.date.sort_key(), b.date.sort_key()) {
            (Some(ka), Some(kb)) => ka
                .cmp(&kb)
                .then_with(|| a.date.precision.rank().cmp(&b.date.precision.rank()))
                .then_with(|| a.description.cmp(&b.description)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.description.cmp(&b.description),
        }
    });
}
