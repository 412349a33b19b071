//! Traits at the seams of the engine.
//!
//! Everything the pipeline needs from the outside world comes in through
//! these traits, so the whole engine runs against mocks in tests.

pub mod adjudicator;
pub mod embed;
pub mod llm;
pub mod source;
pub mod store;

pub use adjudicator::{Adjudicator, LlmAdjudicator, Verdict};
pub use embed::{cosine_similarity, Embedder};
pub use llm::{Completion, CompletionRequest, LlmGateway, TokenUsage};
pub use source::{ArticleRef, ArticleSource, Document};
pub use store::{Persistence, TaskStore, TimelineStore, ViewpointStore};
