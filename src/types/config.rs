//! Configuration for the timeline engine.
//!
//! All thresholds and concurrency limits are plain data on an immutable
//! config struct passed into the orchestrator and merger at construction
//! time. `EngineConfig::validate` runs once at startup and fails fast on
//! nonsensical values, before any task is accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Overall per-task deadline. Exceeding it cancels in-flight stage work.
    pub task_timeout: Duration,

    /// Age after which a `Processing` task with a stale `updated_at` is
    /// swept to `Failed` (guards against orphans from process crashes).
    pub stuck_task_age: Duration,

    /// Minimum number of successfully processed articles for the pipeline
    /// to proceed; below this the task fails with a descriptive note.
    pub min_successful_articles: usize,

    /// Reuse an existing viewpoint when its fingerprint matches.
    pub reuse_viewpoints: bool,

    /// Run the event merger stage (feature flag).
    pub enable_merger: bool,

    /// Relevance threshold applied to the consolidated timeline.
    pub event_relevance_threshold: f32,

    /// Batch size for event relevance scoring calls.
    pub relevance_batch_size: usize,

    pub acquisition: AcquisitionConfig,
    pub extraction: ExtractionConfig,
    pub merger: MergerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(600),
            stuck_task_age: Duration::from_secs(3600),
            min_successful_articles: 2,
            reuse_viewpoints: true,
            enable_merger: true,
            event_relevance_threshold: 0.6,
            relevance_batch_size: 10,
            acquisition: AcquisitionConfig::default(),
            extraction: ExtractionConfig::default(),
            merger: MergerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate all thresholds and limits. Called once at orchestrator
    /// construction; a `ConfigError` here is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "task_timeout",
            });
        }
        if self.stuck_task_age.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "stuck_task_age",
            });
        }
        if self.min_successful_articles == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "min_successful_articles",
            });
        }
        check_threshold(
            "event_relevance_threshold",
            self.event_relevance_threshold,
        )?;
        if self.relevance_batch_size == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "relevance_batch_size",
            });
        }
        self.acquisition.validate()?;
        self.extraction.validate()?;
        self.merger.validate()
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_min_successful_articles(mut self, min: usize) -> Self {
        self.min_successful_articles = min;
        self
    }

    pub fn with_merger_enabled(mut self, enabled: bool) -> Self {
        self.enable_merger = enabled;
        self
    }

    pub fn with_reuse(mut self, reuse: bool) -> Self {
        self.reuse_viewpoints = reuse;
        self
    }

    pub fn with_merger(mut self, merger: MergerConfig) -> Self {
        self.merger = merger;
        self
    }

    /// Stable summary of every setting that changes the timeline a task
    /// produces. Hashed into viewpoint fingerprints so a stored timeline
    /// is only reused by tasks running under equivalent settings;
    /// operational knobs (timeouts, concurrency, retries) stay out.
    pub fn output_digest(&self) -> String {
        format!(
            "merger={} relevance={} min-articles={} article-relevance={} \
             rule={} gap={} hybrid={} auto={} embed={} floor={} entities={}",
            self.enable_merger,
            self.event_relevance_threshold,
            self.min_successful_articles,
            self.acquisition.article_relevance_threshold,
            self.merger.rule_overlap_threshold,
            self.merger.max_year_gap,
            self.merger.hybrid_mode,
            self.merger.auto_merge_threshold,
            self.merger.embedding_threshold,
            self.merger.adjudication_confidence_floor,
            self.merger.min_shared_entities,
        )
    }
}

/// Article acquisition fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Maximum simultaneous fetches across all sources (semaphore width).
    pub max_concurrent_fetches: usize,

    /// Per-fetch deadline, nested inside the task deadline.
    pub fetch_timeout: Duration,

    /// Total attempts per article (first try + retries).
    pub fetch_attempts: u32,

    /// Base delay for exponential backoff between attempts.
    pub retry_base_delay: Duration,

    /// Search result limit per keyword per source.
    pub search_limit: usize,

    /// Cap on articles carried forward into extraction.
    pub article_limit: usize,

    /// Articles scoring below this are dropped before extraction.
    pub article_relevance_threshold: f32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 5,
            fetch_timeout: Duration::from_secs(30),
            fetch_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            search_limit: 5,
            article_limit: 10,
            article_relevance_threshold: 0.5,
        }
    }
}

impl AcquisitionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "max_concurrent_fetches",
            });
        }
        if self.fetch_attempts == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "fetch_attempts",
            });
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "fetch_timeout",
            });
        }
        if self.search_limit == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "search_limit",
            });
        }
        if self.article_limit == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "article_limit",
            });
        }
        check_threshold(
            "article_relevance_threshold",
            self.article_relevance_threshold,
        )
    }
}

/// Event extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Articles longer than this (chars) are split into chunks.
    pub chunk_threshold: usize,

    /// Chunk size in characters, word-boundary aware.
    pub chunk_size: usize,

    /// Overlap between adjacent chunks, to avoid splitting events.
    pub chunk_overlap: usize,

    /// Token budget for a first extraction attempt.
    pub max_tokens: u32,

    /// Enlarged token budget for the single retry after a failure.
    pub retry_max_tokens: u32,

    /// Per-call deadline for extraction LLM calls.
    pub call_timeout: Duration,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: 12_000,
            chunk_size: 8_000,
            chunk_overlap: 400,
            max_tokens: 32_000,
            retry_max_tokens: 65_536,
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl ExtractionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroLimit { name: "chunk_size" });
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::ZeroLimit { name: "max_tokens" });
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "call_timeout",
            });
        }
        Ok(())
    }
}

/// Event merger thresholds and concurrency caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergerConfig {
    /// Minimum shared named entities for a pair to be a merge candidate.
    pub min_shared_entities: usize,

    /// Entity overlap ratio (shared / union) at or above which a
    /// pair auto-merges without any embedding or LLM work.
    pub rule_overlap_threshold: f32,

    /// Events dated more than this many years apart never merge,
    /// regardless of entity overlap or semantic similarity.
    pub max_year_gap: u32,

    /// Use embeddings + selective LLM adjudication (hybrid mode). When
    /// false, only the rule tier applies.
    pub hybrid_mode: bool,

    /// Cosine similarity at or above which a pair auto-merges.
    pub auto_merge_threshold: f32,

    /// Cosine similarity at or above which (but below the auto-merge bar)
    /// a pair is ambiguous and routed to adjudication.
    pub embedding_threshold: f32,

    /// Ambiguous pairs adjudicated per round (window size).
    pub adjudication_window: usize,

    /// Global ceiling on concurrent adjudication calls across all windows.
    pub max_concurrent_adjudications: usize,

    /// Minimum confidence for an affirmative adjudication verdict to count.
    pub adjudication_confidence_floor: f32,

    /// Per-call deadline for adjudication LLM calls.
    pub adjudication_timeout: Duration,

    /// Maximum entries in the embedding LRU cache.
    pub embedding_cache_size: usize,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            min_shared_entities: 1,
            rule_overlap_threshold: 0.75,
            max_year_gap: 2,
            hybrid_mode: true,
            auto_merge_threshold: 0.90,
            embedding_threshold: 0.80,
            adjudication_window: 5,
            max_concurrent_adjudications: 8,
            adjudication_confidence_floor: 0.75,
            adjudication_timeout: Duration::from_secs(30),
            embedding_cache_size: 10_000,
        }
    }
}

impl MergerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_threshold("rule_overlap_threshold", self.rule_overlap_threshold)?;
        check_threshold("auto_merge_threshold", self.auto_merge_threshold)?;
        check_threshold("embedding_threshold", self.embedding_threshold)?;
        check_threshold(
            "adjudication_confidence_floor",
            self.adjudication_confidence_floor,
        )?;
        if self.embedding_threshold > self.auto_merge_threshold {
            return Err(ConfigError::ThresholdOrder {
                lower: self.embedding_threshold,
                upper: self.auto_merge_threshold,
            });
        }
        if self.adjudication_window == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "adjudication_window",
            });
        }
        if self.max_concurrent_adjudications == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "max_concurrent_adjudications",
            });
        }
        if self.embedding_cache_size == 0 {
            return Err(ConfigError::ZeroLimit {
                name: "embedding_cache_size",
            });
        }
        if self.adjudication_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "adjudication_timeout",
            });
        }
        Ok(())
    }

    pub fn with_hybrid_mode(mut self, hybrid: bool) -> Self {
        self.hybrid_mode = hybrid;
        self
    }

    pub fn with_rule_overlap_threshold(mut self, threshold: f32) -> Self {
        self.rule_overlap_threshold = threshold;
        self
    }

    pub fn with_embedding_thresholds(mut self, lower: f32, auto_merge: f32) -> Self {
        self.embedding_threshold = lower;
        self.auto_merge_threshold = auto_merge;
        self
    }

    pub fn with_adjudication_window(mut self, window: usize) -> Self {
        self.adjudication_window = window;
        self
    }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(ConfigError::ThresholdOutOfRange { name, value });
    }
    Ok(())
}
