//! Prompt templates for the pipeline's LLM calls.
//!
//! Every prompt demands JSON-only output; the parsing side lives next to
//! the stage that issues the call.

pub const KEYWORD_SYSTEM: &str = "You turn a research question into search \
keywords for an encyclopedia. Return JSON only: \
{\"keywords\": [\"...\"]}. Three to six keywords, most specific first, no \
duplicates, no stopword-only entries.";

pub const ARTICLE_RELEVANCE_SYSTEM: &str = "You score how useful each \
article is for answering a research question, from 0.0 (unrelated) to 1.0 \
(directly about the question). Return JSON only: {\"scores\": [0.0]}, one \
score per article, in the order given.";

pub const EVENT_RELEVANCE_SYSTEM: &str = "You score how relevant each \
historical event is to a research question, from 0.0 (unrelated) to 1.0 \
(central). Return JSON only: {\"scores\": [0.0]}, one score per event, in \
the order given.";

pub const EXTRACTION_SYSTEM: &str = "You extract dated historical events \
from an article. For each event give a one-sentence description, the date \
exactly as the text states it, the named entities involved, and the exact \
source sentence. Return JSON only: {\"events\": [{\"description\": \"...\", \
\"date\": \"...\", \"entities\": [\"...\"], \"snippet\": \"...\"}]}. Only \
events the text explicitly supports; never invent dates.";

pub fn keyword_prompt(question: &str) -> String {
    format!("Research question: {question}")
}

pub fn article_relevance_prompt(question: &str, summaries: &[String]) -> String {
    let mut prompt = format!("Research question: {question}\n\nArticles:\n");
    for (i, summary) in summaries.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, summary));
    }
    prompt
}

pub fn event_relevance_prompt(question: &str, descriptions: &[String]) -> String {
    let mut prompt = format!("Research question: {question}\n\nEvents:\n");
    for (i, description) in descriptions.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, description));
    }
    prompt
}

pub fn extraction_prompt(question: &str, title: &str, text: &str) -> String {
    format!("Research question: {question}\nArticle title: {title}\n\nArticle text:\n{text}")
}
