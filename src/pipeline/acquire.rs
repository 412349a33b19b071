//! Article acquisition: keyword search fan-out and bounded concurrent
//! fetching with retries.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use url::Url;

use crate::error::{ChronicleError, FetchError, Result};
use crate::traits::{ArticleRef, ArticleSource, Document};
use crate::types::{AcquisitionConfig, DataSourcePreference, SourceType};

use super::keywords::KeywordPlan;

/// Outcome of the fetch stage. Individual fetch failures are absorbed
/// here and only surface as a count; the orchestrator decides whether
/// enough articles survived.
#[derive(Debug)]
pub struct FetchReport {
    pub documents: Vec<Document>,
    pub failed: usize,
}

/// Canonical form of an article URL for deduplication: parsed and
/// re-serialized with the fragment dropped, so `...#History` and
/// `...#Founding` count as one article. Unparseable URLs dedupe on the
/// raw string.
fn canonical_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

fn preference_allows(preference: DataSourcePreference, source_type: SourceType) -> bool {
    match preference {
        DataSourcePreference::All => true,
        DataSourcePreference::WikipediaOnly => source_type == SourceType::Wikipedia,
        DataSourcePreference::NewsOnly => source_type == SourceType::News,
        DataSourcePreference::DatasetOnly => source_type == SourceType::Dataset,
    }
}

/// Search every allowed source with every keyword, deduplicating hits by
/// URL in discovery order. Search failures on one source are logged and
/// skipped; the stage fails only if cancelled.
pub async fn search_articles(
    sources: &[Arc<dyn ArticleSource>],
    plan: &KeywordPlan,
    preference: DataSourcePreference,
    config: &AcquisitionConfig,
    cancel: &CancellationToken,
) -> Result<Vec<(Arc<dyn ArticleSource>, ArticleRef)>> {
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut hits: Vec<(Arc<dyn ArticleSource>, ArticleRef)> = Vec::new();

    for source in sources {
        if !preference_allows(preference, source.source_type()) {
            continue;
        }
        for keyword in &plan.keywords {
            if cancel.is_cancelled() {
                return Err(ChronicleError::Cancelled);
            }
            match source.search(keyword, config.search_limit).await {
                Ok(results) => {
                    for article in results {
                        if seen_urls.insert(canonical_url(&article.source.url)) {
                            hits.push((Arc::clone(source), article));
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(keyword, %error, "search failed, skipping keyword");
                }
            }
        }
    }

    tracing::info!(
        keywords = plan.keywords.len(),
        hits = hits.len(),
        "article search complete"
    );
    Ok(hits)
}

/// Fetch article texts concurrently, bounded by the configured semaphore
/// width, with per-fetch timeout and exponential backoff retries.
pub async fn fetch_articles(
    candidates: Vec<(Arc<dyn ArticleSource>, ArticleRef)>,
    config: &AcquisitionConfig,
    cancel: &CancellationToken,
) -> Result<FetchReport> {
    let limit = Arc::new(Semaphore::new(config.max_concurrent_fetches));

    let fetches = candidates.into_iter().map(|(source, article)| {
        let limit = Arc::clone(&limit);
        let cancel = cancel.clone();
        async move {
            let _permit = limit
                .acquire()
                .await
                .map_err(|_| ChronicleError::Cancelled)?;
            fetch_with_retries(source.as_ref(), &article, config, &cancel).await
        }
    });
    let results = futures::future::join_all(fetches).await;

    let mut documents = Vec::new();
    let mut failed = 0;
    for result in results {
        match result {
            Ok(document) => documents.push(document),
            Err(ChronicleError::Cancelled) => return Err(ChronicleError::Cancelled),
            Err(error) => {
                tracing::warn!(%error, "article fetch failed");
                failed += 1;
            }
        }
    }

    tracing::info!(fetched = documents.len(), failed, "article fetch complete");
    Ok(FetchReport { documents, failed })
}

async fn fetch_with_retries(
    source: &dyn ArticleSource,
    article: &ArticleRef,
    config: &AcquisitionConfig,
    cancel: &CancellationToken,
) -> Result<Document> {
    let mut delay = config.retry_base_delay;
    let mut last_attempt_timed_out = false;
    for attempt in 1..=config.fetch_attempts {
        if cancel.is_cancelled() {
            return Err(ChronicleError::Cancelled);
        }
        let outcome = timeout(config.fetch_timeout, source.fetch(article)).await;
        last_attempt_timed_out = outcome.is_err();
        match outcome {
            Ok(Ok(document)) if document.is_empty() => {
                // Empty bodies never improve on retry.
                return Err(FetchError::EmptyDocument {
                    title: article.source.title.clone(),
                }
                .into());
            }
            Ok(Ok(document)) => return Ok(document),
            Ok(Err(error)) => {
                tracing::debug!(
                    title = %article.source.title,
                    attempt,
                    %error,
                    "fetch attempt failed"
                );
            }
            Err(_) => {
                tracing::debug!(
                    title = %article.source.title,
                    attempt,
                    "fetch attempt timed out"
                );
            }
        }
        if attempt < config.fetch_attempts {
            tokio::select! {
                _ = sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ChronicleError::Cancelled),
            }
            delay *= 2;
        }
    }
    // A timeout on the last attempt is reported as such; anything else
    // collapses into retry exhaustion.
    if last_attempt_timed_out {
        return Err(FetchError::Timeout {
            title: article.source.title.clone(),
        }
        .into());
    }
    Err(FetchError::RetriesExhausted {
        title: article.source.title.clone(),
        attempts: config.fetch_attempts,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceRef;
    use std::time::Duration;

    #[test]
    fn canonical_url_drops_fragments() {
        assert_eq!(
            canonical_url("https://en.wikipedia.org/wiki/Honda#History"),
            canonical_url("https://en.wikipedia.org/wiki/Honda#Founding"),
        );
        assert_eq!(canonical_url("not a url"), "not a url");
    }

    #[test]
    fn preference_filtering() {
        use DataSourcePreference::*;
        assert!(preference_allows(All, SourceType::News));
        assert!(preference_allows(WikipediaOnly, SourceType::Wikipedia));
        assert!(!preference_allows(WikipediaOnly, SourceType::News));
        assert!(!preference_allows(NewsOnly, SourceType::Dataset));
        assert!(preference_allows(DatasetOnly, SourceType::Dataset));
    }

    #[tokio::test]
    async fn slow_fetch_surfaces_as_timeout() {
        use crate::testing::MockArticleSource;

        let source = MockArticleSource::new(SourceType::Wikipedia).with_slow_article(
            "https://en.wikipedia.org/wiki/Honda",
            "Honda",
            "Honda was founded in 1948.",
            Duration::from_millis(200),
        );
        let article = ArticleRef {
            source: SourceRef::new("https://en.wikipedia.org/wiki/Honda", "Honda", SourceType::Wikipedia),
            summary: None,
        };
        let mut config = AcquisitionConfig::default();
        config.fetch_timeout = Duration::from_millis(10);
        config.fetch_attempts = 2;
        config.retry_base_delay = Duration::from_millis(1);

        let error = fetch_with_retries(&source, &article, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ChronicleError::Fetch(FetchError::Timeout { .. })
        ));
    }
}
