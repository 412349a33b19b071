//! Timeline construction engine.
//!
//! Turns a free-text research question into a sourced, chronologically
//! ordered timeline:
//!
//! 1. **Keyword planning**: the question becomes search keywords.
//! 2. **Acquisition**: articles are searched, relevance-filtered, and
//!    fetched concurrently with retries.
//! 3. **Extraction**: an LLM pulls dated events out of each article;
//!    free-text dates are normalized into comparable ranges.
//! 4. **Merging**: duplicate events across articles are consolidated by
//!    entity-overlap rules, embedding similarity, and selective LLM
//!    adjudication, with all sources preserved.
//! 5. **Orchestration**: a task state machine drives the stages under a
//!    deadline, streams progress, and reuses completed timelines for
//!    repeated questions.
//!
//! External collaborators (article sources, the LLM, the embedder,
//! persistence) all enter through traits in [`traits`], so the engine
//! runs unchanged against the mocks in [`testing`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chronicle::orchestrator::TimelineOrchestrator;
//! use chronicle::stores::MemoryStore;
//! use chronicle::testing::{MockArticleSource, MockEmbedder, MockLlm, ScriptedAdjudicator};
//! use chronicle::types::{DataSourcePreference, EngineConfig, SourceType};
//!
//! # async fn run() -> chronicle::Result<()> {
//! let source = MockArticleSource::new(SourceType::Wikipedia);
//! let orchestrator = TimelineOrchestrator::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MockLlm::new()),
//!     vec![Arc::new(source)],
//!     MockEmbedder::new(),
//!     ScriptedAdjudicator::new(),
//!     EngineConfig::default(),
//! )?;
//! let task = orchestrator
//!     .submit("When was Honda founded?", DataSourcePreference::All)
//!     .await?;
//! let timeline = orchestrator.run(task.id).await?;
//! # Ok(())
//! # }
//! ```

pub mod dates;
pub mod error;
pub mod merger;
pub mod orchestrator;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

pub use error::{ChronicleError, Result};
pub use merger::{EventMerger, MergeOutcome, MergeStats};
pub use orchestrator::TimelineOrchestrator;
pub use types::{
    DataSourcePreference, EngineConfig, MergerConfig, ParsedDateInfo, RawEvent, Task, TaskStatus,
    TimelineEvent, Viewpoint,
};
