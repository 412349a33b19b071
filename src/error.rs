//! Typed errors for the timeline engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Recovery policy lives with
//! the callers: per-article and per-candidate failures are absorbed with
//! conservative fallbacks, only task-level timeouts and insufficient
//! article counts fail a whole task.

use thiserror::Error;

/// Top-level error for timeline construction operations.
#[derive(Debug, Error)]
pub enum ChronicleError {
    /// Article fetch failed after retries
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// LLM event extraction failed for an article or chunk
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// Merger adjudication call failed (defaults to no-merge)
    #[error("adjudication failed: {0}")]
    Adjudication(#[from] AdjudicationError),

    /// Task- or stage-level deadline exceeded
    #[error("timeout: {0}")]
    Timeout(#[from] TimeoutError),

    /// Invalid threshold or limit detected at startup
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Not enough articles survived acquisition/extraction
    #[error("only {succeeded} of {required} required articles succeeded ({failed} failed)")]
    InsufficientArticles {
        succeeded: usize,
        required: usize,
        failed: usize,
    },

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Unknown task id
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: uuid::Uuid },

    /// Unknown viewpoint id
    #[error("viewpoint not found: {viewpoint_id}")]
    ViewpointNotFound { viewpoint_id: uuid::Uuid },

    /// Attempted transition out of a terminal task state
    #[error("invalid task transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// JSON parsing error (LLM responses, payloads)
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Errors raised while fetching articles from a source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network or source failure
    #[error("source error: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Source returned no usable document text
    #[error("empty document: {title}")]
    EmptyDocument { title: String },

    /// Per-fetch deadline exceeded
    #[error("fetch timed out: {title}")]
    Timeout { title: String },

    /// All retry attempts exhausted
    #[error("fetch failed after {attempts} attempts: {title}")]
    RetriesExhausted { title: String, attempts: u32 },
}

/// Errors raised during LLM event extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// LLM call failed
    #[error("LLM error: {0}")]
    Llm(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// LLM response did not contain the expected structure
    #[error("malformed LLM response: {reason}")]
    MalformedResponse { reason: String },

    /// Per-call deadline exceeded
    #[error("extraction call timed out")]
    Timeout,
}

/// Errors raised by merger adjudication calls.
#[derive(Debug, Error)]
pub enum AdjudicationError {
    /// LLM call failed
    #[error("LLM error: {0}")]
    Llm(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Verdict could not be parsed from the response
    #[error("malformed verdict: {reason}")]
    MalformedVerdict { reason: String },

    /// Per-call deadline exceeded
    #[error("adjudication call timed out")]
    Timeout,
}

/// Deadline errors at task level.
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// The task's overall deadline was exceeded
    #[error("task deadline exceeded after {elapsed_secs}s")]
    TaskDeadline { elapsed_secs: u64 },
}

/// Invalid configuration detected at startup. Fatal before any task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A score/similarity threshold must lie in [0, 1]
    #[error("{name} must be within [0.0, 1.0], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f32 },

    /// Embedding thresholds must be ordered: lower bound below auto-merge bar
    #[error("embedding_threshold ({lower}) must not exceed auto_merge_threshold ({upper})")]
    ThresholdOrder { lower: f32, upper: f32 },

    /// A limit or window size must be non-zero
    #[error("{name} must be greater than zero")]
    ZeroLimit { name: &'static str },

    /// A duration parameter must be non-zero
    #[error("{name} must be a non-zero duration")]
    ZeroDuration { name: &'static str },
}

/// Result type alias for timeline operations.
pub type Result<T> = std::result::Result<T, ChronicleError>;
