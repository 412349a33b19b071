//! LLM gateway trait.
//!
//! Implementations wrap specific LLM providers and handle the specifics
//! of prompting and response parsing. The pipeline only ever speaks in
//! terms of completion requests and text back.

use async_trait::async_trait;

use crate::error::Result;

/// A single completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    /// 0.0 for deterministic extraction and adjudication.
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 4096,
            temperature: 0.0,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token accounting for a completion, for logging and budget decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A completed LLM call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    /// True if the provider reported the output was cut off by the token
    /// budget. Extraction retries once with a larger budget when set.
    pub truncated: bool,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: TokenUsage::default(),
            truncated: false,
        }
    }
}

/// Gateway to an LLM provider.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Run one completion request.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}
