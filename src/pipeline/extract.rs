//! Event extraction from article text.
//!
//! Long articles are split into overlapping, word-boundary-aware chunks
//! so no event straddles a hard cut. Each chunk goes to the LLM once,
//! with a single retry on a larger token budget when the response is
//! truncated or unparseable. Dates come back as free text and are
//! normalized immediately.

use serde::Deserialize;
use tokio::time::timeout;

use crate::dates;
use crate::error::{ExtractionError, Result};
use crate::traits::{CompletionRequest, Document, LlmGateway};
use crate::types::{EntityRef, EventSourceInfo, ExtractionConfig, RawEvent};

use super::keywords::strip_fences;
use super::prompts;

#[derive(Deserialize)]
struct ExtractedEvent {
    description: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    snippet: String,
}

#[derive(Deserialize)]
struct ExtractionResponse {
    events: Vec<ExtractedEvent>,
}

/// Split text into chunks of at most `chunk_size` characters with
/// `overlap` characters of context carried between neighbors. Cuts land
/// on whitespace where possible.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<&str> {
    if text.len() <= chunk_size {
        return vec![text];
    }
    let overlap = overlap.min(chunk_size / 2);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let hard_end = floor_char_boundary(text, (start + chunk_size).min(text.len()));
        let end = if hard_end == text.len() {
            hard_end
        } else {
            // Back up to the last whitespace inside the window.
            text[start..hard_end]
                .rfind(char::is_whitespace)
                .map(|offset| start + offset)
                .filter(|&cut| cut > start)
                .unwrap_or(hard_end)
        };
        let end = ceil_char_boundary(text, end);
        chunks.push(&text[start..end]);
        if end == text.len() {
            break;
        }
        let next = floor_char_boundary(text, end.saturating_sub(overlap).max(start + 1));
        start = if next > start { next } else { end };
    }
    chunks
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Extract dated events from one article. Chunk failures after retry are
/// absorbed; the call errors only when every chunk fails, which the
/// orchestrator counts as a failed article.
pub async fn extract_events<L: LlmGateway>(
    llm: &L,
    question: &str,
    document: &Document,
    config: &ExtractionConfig,
) -> Result<Vec<RawEvent>> {
    let chunks = if document.text.len() > config.chunk_threshold {
        chunk_text(&document.text, config.chunk_size, config.chunk_overlap)
    } else {
        vec![document.text.as_str()]
    };
    let chunk_count = chunks.len();

    let mut events = Vec::new();
    let mut failed_chunks = 0;
    for (index, chunk) in chunks.into_iter().enumerate() {
        match extract_chunk(llm, question, document, chunk, config).await {
            Ok(mut chunk_events) => events.append(&mut chunk_events),
            Err(error) => {
                tracing::warn!(
                    title = %document.source.title,
                    chunk = index,
                    %error,
                    "chunk extraction failed"
                );
                failed_chunks += 1;
            }
        }
    }

    if failed_chunks == chunk_count {
        return Err(ExtractionError::MalformedResponse {
            reason: format!("all {chunk_count} chunks failed"),
        }
        .into());
    }
    tracing::debug!(
        title = %document.source.title,
        events = events.len(),
        chunks = chunk_count,
        failed_chunks,
        "article extraction complete"
    );
    Ok(events)
}

async fn extract_chunk<L: LlmGateway>(
    llm: &L,
    question: &str,
    document: &Document,
    chunk: &str,
    config: &ExtractionConfig,
) -> Result<Vec<RawEvent>> {
    let prompt = prompts::extraction_prompt(question, &document.source.title, chunk);

    let first = call_and_parse(llm, &prompt, config.max_tokens, config).await;
    let parsed = match first {
        Ok(parsed) => parsed,
        Err(error) => {
            // One retry with the enlarged budget covers both truncation
            // and garbled output.
            tracing::debug!(%error, "extraction retrying with larger token budget");
            call_and_parse(llm, &prompt, config.retry_max_tokens, config).await?
        }
    };

    Ok(parsed
        .events
        .into_iter()
        .filter(|event| !event.description.trim().is_empty())
        .map(|event| {
            let snippet = if event.snippet.trim().is_empty() {
                event.description.clone()
            } else {
                event.snippet
            };
            RawEvent::new(
                event.description,
                dates::normalize(&event.date),
                EventSourceInfo {
                    source: document.source.clone(),
                    snippet,
                },
            )
            .with_entities(event.entities.into_iter().map(EntityRef::named).collect())
        })
        .collect())
}

async fn call_and_parse<L: LlmGateway>(
    llm: &L,
    prompt: &str,
    max_tokens: u32,
    config: &ExtractionConfig,
) -> Result<ExtractionResponse> {
    let request =
        CompletionRequest::new(prompts::EXTRACTION_SYSTEM, prompt).with_max_tokens(max_tokens);
    let completion = timeout(config.call_timeout, llm.complete(request))
        .await
        .map_err(|_| ExtractionError::Timeout)??;
    if completion.truncated {
        return Err(ExtractionError::MalformedResponse {
            reason: "response truncated by token budget".into(),
        }
        .into());
    }
    serde_json::from_str(strip_fences(&completion.text)).map_err(|e| {
        ExtractionError::MalformedResponse {
            reason: e.to_string(),
        }
        .into()
    })
}
