//! Keyword planning: turn the research question into search keywords.

use serde::Deserialize;

use crate::error::Result;
use crate::traits::{CompletionRequest, LlmGateway};

use super::prompts;

/// Search keywords derived from one question.
#[derive(Debug, Clone)]
pub struct KeywordPlan {
    pub question: String,
    pub keywords: Vec<String>,
}

#[derive(Deserialize)]
struct KeywordResponse {
    keywords: Vec<String>,
}

/// Ask the LLM for search keywords. A malformed response degrades to
/// searching with the raw question instead of failing the task.
pub async fn plan_keywords<L: LlmGateway>(llm: &L, question: &str) -> Result<KeywordPlan> {
    let request = CompletionRequest::new(
        prompts::KEYWORD_SYSTEM,
        prompts::keyword_prompt(question),
    );
    let completion = llm.complete(request).await?;

    let keywords = match parse_keywords(&completion.text) {
        Some(keywords) if !keywords.is_empty() => keywords,
        _ => {
            tracing::warn!(question, "keyword extraction unparseable, using raw question");
            vec![question.to_string()]
        }
    };
    tracing::debug!(question, count = keywords.len(), "keyword plan ready");
    Ok(KeywordPlan {
        question: question.to_string(),
        keywords,
    })
}

fn parse_keywords(text: &str) -> Option<Vec<String>> {
    let response: KeywordResponse = serde_json::from_str(strip_fences(text)).ok()?;
    let mut seen = std::collections::HashSet::new();
    let keywords = response
        .keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .collect();
    Some(keywords)
}

/// Strip an optional markdown code fence from a model response.
pub(crate) fn strip_fences(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
