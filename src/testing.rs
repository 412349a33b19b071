//! Test doubles for the engine's collaborator traits.
//!
//! All mocks are scripted up front and record their calls, so tests can
//! assert both behavior and interaction counts without any network or
//! model access. Available outside `cfg(test)` so integration tests and
//! downstream crates can drive the whole engine against them.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AdjudicationError, ChronicleError, ExtractionError, FetchError, Result};
use crate::traits::{
    Adjudicator, ArticleRef, ArticleSource, Completion, CompletionRequest, Document, Embedder,
    LlmGateway, Verdict,
};
use crate::types::{RawEvent, SourceRef, SourceType};

/// One scripted LLM response.
#[derive(Debug, Clone)]
enum ScriptedCompletion {
    Text(String),
    Truncated(String),
    Fail,
    Stall,
}

/// Scripted LLM gateway.
///
/// Responses are registered against a substring of the system prompt, so
/// one mock can serve keyword, relevance, and extraction calls in a
/// single pipeline run. Each key holds a FIFO queue; the final entry
/// repeats once the queue runs dry.
#[derive(Default)]
pub struct MockLlm {
    scripts: Mutex<Vec<(String, VecDeque<ScriptedCompletion>)>>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text response for requests whose system prompt contains
    /// `system_contains`.
    pub fn script(&self, system_contains: &str, response: &str) {
        self.push(system_contains, ScriptedCompletion::Text(response.to_string()));
    }

    /// Queue a truncated response (triggers the extraction retry path).
    pub fn script_truncated(&self, system_contains: &str, response: &str) {
        self.push(
            system_contains,
            ScriptedCompletion::Truncated(response.to_string()),
        );
    }

    /// Queue a failure.
    pub fn script_failure(&self, system_contains: &str) {
        self.push(system_contains, ScriptedCompletion::Fail);
    }

    /// Queue a call that never returns, for exercising deadline paths.
    pub fn script_stall(&self, system_contains: &str) {
        self.push(system_contains, ScriptedCompletion::Stall);
    }

    fn push(&self, key: &str, response: ScriptedCompletion) {
        let mut scripts = self.scripts.lock().unwrap();
        if let Some((_, queue)) = scripts.iter_mut().find(|(k, _)| k == key) {
            queue.push_back(response);
        } else {
            scripts.push((key.to_string(), VecDeque::from([response])));
        }
    }

    /// All requests seen, in order.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// How many requests matched the given system prompt substring.
    pub fn call_count(&self, system_contains: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.system.contains(system_contains))
            .count()
    }
}

#[async_trait]
impl LlmGateway for MockLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        self.calls.lock().unwrap().push(request.clone());

        let scripted = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts
                .iter_mut()
                .find(|(key, _)| request.system.contains(key.as_str()))
            {
                Some((_, queue)) if queue.len() > 1 => queue.pop_front(),
                Some((_, queue)) => queue.front().cloned(),
                None => None,
            }
        };

        match scripted {
            Some(ScriptedCompletion::Text(text)) => Ok(Completion::text(text)),
            Some(ScriptedCompletion::Truncated(text)) => Ok(Completion {
                text,
                usage: Default::default(),
                truncated: true,
            }),
            Some(ScriptedCompletion::Fail) => Err(ExtractionError::Llm(
                "scripted LLM failure".to_string().into(),
            )
            .into()),
            Some(ScriptedCompletion::Stall) => futures::future::pending().await,
            None => Err(ExtractionError::MalformedResponse {
                reason: format!("no scripted response for system prompt: {}", request.system),
            }
            .into()),
        }
    }
}

/// Scripted embedder. Unscripted texts get a deterministic pseudo-vector
/// derived from their bytes, so equal texts are always identical and
/// unequal texts are almost never parallel.
#[derive(Default)]
pub struct MockEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    fail: Mutex<bool>,
    calls: Mutex<usize>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
        self
    }

    pub fn set_vector(&self, text: &str, vector: Vec<f32>) {
        self.vectors
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
    }

    pub fn fail_next(&self) {
        *self.fail.lock().unwrap() = true;
    }

    /// Number of `embed` batch calls made.
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    fn derive(text: &str) -> Vec<f32> {
        // Stable 8-dim vector from a rolling byte hash.
        let mut state: u64 = 0xcbf2_9ce4_8422_2325;
        let mut vector = vec![0.0f32; 8];
        for (i, byte) in text.bytes().enumerate() {
            state = state.wrapping_mul(0x100_0000_01b3).wrapping_add(byte as u64);
            vector[i % 8] += (state % 1000) as f32 / 1000.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.calls.lock().unwrap() += 1;
        if std::mem::take(&mut *self.fail.lock().unwrap()) {
            return Err(ChronicleError::Embedding("scripted embedder failure".into()));
        }
        let vectors = self.vectors.lock().unwrap();
        Ok(texts
            .iter()
            .map(|t| vectors.get(t).cloned().unwrap_or_else(|| Self::derive(t)))
            .collect())
    }
}

/// Scripted adjudicator keyed symmetrically on event descriptions.
#[derive(Default)]
pub struct ScriptedAdjudicator {
    verdicts: Mutex<HashMap<(String, String), Verdict>>,
    default: Mutex<Option<Verdict>>,
    fail_all: Mutex<bool>,
    calls: Mutex<usize>,
}

impl ScriptedAdjudicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer with `verdict` unless a pair rule matches.
    pub fn with_default(self, verdict: Verdict) -> Self {
        *self.default.lock().unwrap() = Some(verdict);
        self
    }

    /// Script a verdict for a specific pair of event descriptions, in
    /// either order.
    pub fn rule(&self, left: &str, right: &str, verdict: Verdict) {
        self.verdicts.lock().unwrap().insert(pair(left, right), verdict);
    }

    /// Make every adjudication call fail.
    pub fn fail_all(&self) {
        *self.fail_all.lock().unwrap() = true;
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

fn pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[async_trait]
impl Adjudicator for ScriptedAdjudicator {
    async fn adjudicate(&self, left: &RawEvent, right: &RawEvent) -> Result<Verdict> {
        *self.calls.lock().unwrap() += 1;
        if *self.fail_all.lock().unwrap() {
            return Err(AdjudicationError::Llm(
                "scripted adjudication failure".to_string().into(),
            )
            .into());
        }
        let key = pair(&left.description, &right.description);
        if let Some(verdict) = self.verdicts.lock().unwrap().get(&key) {
            return Ok(*verdict);
        }
        if let Some(verdict) = *self.default.lock().unwrap() {
            return Ok(verdict);
        }
        Ok(Verdict {
            same_event: false,
            confidence: 1.0,
        })
    }
}

/// One scripted article.
struct ScriptedArticle {
    article: ArticleRef,
    text: Option<String>,
    /// Remaining fetch attempts that fail before one succeeds.
    failures_left: u32,
    /// Delay applied before every fetch returns.
    delay: Option<Duration>,
}

/// Scripted article source.
///
/// Search returns every scripted article whose title or summary contains
/// the keyword, falling back to all articles when nothing matches (so
/// simple tests need no keyword bookkeeping).
pub struct MockArticleSource {
    source_type: SourceType,
    articles: Mutex<Vec<ScriptedArticle>>,
    search_calls: Mutex<usize>,
    fetch_calls: Mutex<usize>,
}

impl MockArticleSource {
    pub fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            articles: Mutex::new(Vec::new()),
            search_calls: Mutex::new(0),
            fetch_calls: Mutex::new(0),
        }
    }

    /// Add an article that searches find and fetches return.
    pub fn with_article(self, url: &str, title: &str, text: &str) -> Self {
        self.articles.lock().unwrap().push(ScriptedArticle {
            article: ArticleRef {
                source: SourceRef::new(url, title, self.source_type),
                summary: None,
            },
            text: Some(text.to_string()),
            failures_left: 0,
            delay: None,
        });
        self
    }

    /// Add an article whose fetch always fails.
    pub fn with_broken_article(self, url: &str, title: &str) -> Self {
        self.articles.lock().unwrap().push(ScriptedArticle {
            article: ArticleRef {
                source: SourceRef::new(url, title, self.source_type),
                summary: None,
            },
            text: None,
            failures_left: u32::MAX,
            delay: None,
        });
        self
    }

    /// Add an article whose first `failures` fetch attempts fail before
    /// succeeding.
    pub fn with_flaky_article(self, url: &str, title: &str, text: &str, failures: u32) -> Self {
        self.articles.lock().unwrap().push(ScriptedArticle {
            article: ArticleRef {
                source: SourceRef::new(url, title, self.source_type),
                summary: None,
            },
            text: Some(text.to_string()),
            failures_left: failures,
            delay: None,
        });
        self
    }

    /// Add an article whose every fetch takes `delay` before returning,
    /// for exercising fetch deadlines.
    pub fn with_slow_article(self, url: &str, title: &str, text: &str, delay: Duration) -> Self {
        self.articles.lock().unwrap().push(ScriptedArticle {
            article: ArticleRef {
                source: SourceRef::new(url, title, self.source_type),
                summary: None,
            },
            text: Some(text.to_string()),
            failures_left: 0,
            delay: Some(delay),
        });
        self
    }

    pub fn search_calls(&self) -> usize {
        *self.search_calls.lock().unwrap()
    }

    pub fn fetch_calls(&self) -> usize {
        *self.fetch_calls.lock().unwrap()
    }
}

#[async_trait]
impl ArticleSource for MockArticleSource {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<ArticleRef>> {
        *self.search_calls.lock().unwrap() += 1;
        let articles = self.articles.lock().unwrap();
        let keyword = keyword.to_lowercase();
        let matching: Vec<ArticleRef> = articles
            .iter()
            .filter(|a| a.article.source.title.to_lowercase().contains(&keyword))
            .map(|a| a.article.clone())
            .collect();
        let hits = if matching.is_empty() {
            articles.iter().map(|a| a.article.clone()).collect()
        } else {
            matching
        };
        Ok(hits.into_iter().take(limit).collect())
    }

    async fn fetch(&self, article: &ArticleRef) -> Result<Document> {
        *self.fetch_calls.lock().unwrap() += 1;
        let (outcome, delay) = {
            let mut articles = self.articles.lock().unwrap();
            let scripted = articles
                .iter_mut()
                .find(|a| a.article.source.url == article.source.url)
                .ok_or_else(|| FetchError::EmptyDocument {
                    title: article.source.title.clone(),
                })?;

            if scripted.failures_left > 0 {
                if scripted.failures_left != u32::MAX {
                    scripted.failures_left -= 1;
                }
                return Err(FetchError::Source(
                    "scripted fetch failure".to_string().into(),
                )
                .into());
            }
            let outcome = match &scripted.text {
                Some(text) => Ok(Document {
                    source: article.source.clone(),
                    text: text.clone(),
                }),
                None => Err(FetchError::EmptyDocument {
                    title: article.source.title.clone(),
                }
                .into()),
            };
            (outcome, scripted.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}
