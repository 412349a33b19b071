//! Relevance scoring for articles and events.
//!
//! Both scorers batch their items and ask for one score per item. A
//! malformed or short response keeps the affected items rather than
//! silently dropping them.

use serde::Deserialize;

use crate::error::Result;
use crate::traits::{ArticleRef, CompletionRequest, LlmGateway};
use crate::types::{RawEvent, TimelineEvent};

use super::keywords::strip_fences;
use super::prompts;

#[derive(Deserialize)]
struct ScoreResponse {
    scores: Vec<f32>,
}

fn parse_scores(text: &str, expected: usize) -> Option<Vec<f32>> {
    let response: ScoreResponse = serde_json::from_str(strip_fences(text)).ok()?;
    if response.scores.len() != expected {
        return None;
    }
    if response.scores.iter().any(|s| !(0.0..=1.0).contains(s)) {
        return None;
    }
    Some(response.scores)
}

/// Score search hits against the question and drop those below the
/// threshold. Articles in a batch whose scores cannot be parsed are kept.
pub async fn filter_articles<T, L: LlmGateway>(
    llm: &L,
    question: &str,
    articles: Vec<(T, ArticleRef)>,
    threshold: f32,
    batch_size: usize,
    limit: usize,
) -> Result<Vec<(T, ArticleRef)>> {
    let mut kept = Vec::new();
    let mut batch_start = 0;
    let mut remaining = articles.into_iter().peekable();
    while remaining.peek().is_some() {
        let batch: Vec<(T, ArticleRef)> = remaining.by_ref().take(batch_size).collect();
        let summaries: Vec<String> = batch
            .iter()
            .map(|(_, article)| match &article.summary {
                Some(summary) => format!("{}: {}", article.source.title, summary),
                None => article.source.title.clone(),
            })
            .collect();
        let request = CompletionRequest::new(
            prompts::ARTICLE_RELEVANCE_SYSTEM,
            prompts::article_relevance_prompt(question, &summaries),
        );

        match llm.complete(request).await {
            Ok(completion) => match parse_scores(&completion.text, batch.len()) {
                Some(scores) => {
                    for ((source, article), score) in batch.into_iter().zip(scores) {
                        if score >= threshold {
                            kept.push((source, article));
                        } else {
                            tracing::debug!(
                                title = %article.source.title,
                                score,
                                "article below relevance threshold"
                            );
                        }
                    }
                }
                None => {
                    tracing::warn!(batch_start, "unparseable article scores, keeping batch");
                    kept.extend(batch);
                }
            },
            Err(error) => {
                tracing::warn!(batch_start, %error, "article scoring failed, keeping batch");
                kept.extend(batch);
            }
        }
        batch_start += batch_size;
    }

    kept.truncate(limit);
    Ok(kept)
}

/// Score extracted events against the question, writing each score onto
/// the event. No event is dropped here: low scorers must still reach the
/// merger so a weak duplicate can contribute its source to a surviving
/// cluster. The threshold applies to the consolidated timeline via
/// [`apply_relevance_threshold`]. Events in an unparseable batch keep
/// their default score.
pub async fn score_events<L: LlmGateway>(
    llm: &L,
    question: &str,
    events: Vec<RawEvent>,
    batch_size: usize,
) -> Result<Vec<RawEvent>> {
    let mut scored = Vec::with_capacity(events.len());
    let mut remaining = events.into_iter().peekable();
    while remaining.peek().is_some() {
        let mut batch: Vec<RawEvent> = remaining.by_ref().take(batch_size).collect();
        let descriptions: Vec<String> = batch.iter().map(|e| e.comparison_text()).collect();
        let request = CompletionRequest::new(
            prompts::EVENT_RELEVANCE_SYSTEM,
            prompts::event_relevance_prompt(question, &descriptions),
        );

        match llm.complete(request).await {
            Ok(completion) => match parse_scores(&completion.text, batch.len()) {
                Some(scores) => {
                    for (mut event, score) in batch.into_iter().zip(scores) {
                        event.relevance = score;
                        scored.push(event);
                    }
                }
                None => {
                    tracing::warn!("unparseable event scores, keeping batch unscored");
                    scored.append(&mut batch);
                }
            },
            Err(error) => {
                tracing::warn!(%error, "event scoring failed, keeping batch unscored");
                scored.append(&mut batch);
            }
        }
    }
    Ok(scored)
}

/// Drop consolidated timeline events below the relevance threshold. Runs
/// after merging, so every absorbed source is already attached to its
/// surviving event and a merged event carries its best score.
pub fn apply_relevance_threshold(timeline: &mut Vec<TimelineEvent>, threshold: f32) {
    timeline.retain(|event| {
        let keep = event.relevance >= threshold;
        if !keep {
            tracing::debug!(
                description = %event.description,
                relevance = event.relevance,
                "event below relevance threshold"
            );
        }
        keep
    });
}
