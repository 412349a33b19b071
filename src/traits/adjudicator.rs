//! Pairwise event adjudication.
//!
//! The merger routes ambiguous candidate pairs here. `Adjudicator` is a
//! trait so tests can script verdicts; `LlmAdjudicator` is the real
//! implementation over any `LlmGateway`, with a bounded verdict cache
//! keyed symmetrically on the pair's comparison text.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{AdjudicationError, Result};
use crate::traits::llm::{CompletionRequest, LlmGateway};
use crate::types::RawEvent;

const VERDICT_CACHE_SIZE: usize = 1000;

const ADJUDICATION_SYSTEM: &str = "You are a historian deciding whether two \
extracted records describe the same real-world event. Two records are the \
same event only if they refer to the same occurrence, not merely related \
occurrences. Respond with JSON only: \
{\"same_event\": true|false, \"confidence\": 0.0-1.0, \"reason\": \"...\"}";

/// The adjudicator's answer for one pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub same_event: bool,
    pub confidence: f32,
}

impl Verdict {
    /// An affirmative verdict only counts when its confidence clears the
    /// configured floor.
    pub fn merges_at(&self, confidence_floor: f32) -> bool {
        self.same_event && self.confidence >= confidence_floor
    }
}

/// Decides whether two raw events describe the same occurrence.
#[async_trait]
pub trait Adjudicator: Send + Sync {
    async fn adjudicate(&self, left: &RawEvent, right: &RawEvent) -> Result<Verdict>;
}

#[derive(Deserialize)]
struct VerdictResponse {
    same_event: bool,
    confidence: f32,
    #[allow(dead_code)]
    reason: Option<String>,
}

/// LLM-backed adjudicator with a bounded, order-insensitive verdict cache.
pub struct LlmAdjudicator<L> {
    llm: L,
    cache: Mutex<VerdictCache>,
}

impl<L: LlmGateway> LlmAdjudicator<L> {
    pub fn new(llm: L) -> Self {
        Self {
            llm,
            cache: Mutex::new(VerdictCache::new(VERDICT_CACHE_SIZE)),
        }
    }

    fn parse_verdict(text: &str) -> Result<Verdict> {
        // Providers sometimes wrap JSON in a code fence.
        let trimmed = text
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        let response: VerdictResponse = serde_json::from_str(trimmed).map_err(|e| {
            AdjudicationError::MalformedVerdict {
                reason: e.to_string(),
            }
        })?;
        if !(0.0..=1.0).contains(&response.confidence) {
            return Err(AdjudicationError::MalformedVerdict {
                reason: format!("confidence {} out of range", response.confidence),
            }
            .into());
        }
        Ok(Verdict {
            same_event: response.same_event,
            confidence: response.confidence,
        })
    }
}

#[async_trait]
impl<L: LlmGateway> Adjudicator for LlmAdjudicator<L> {
    async fn adjudicate(&self, left: &RawEvent, right: &RawEvent) -> Result<Verdict> {
        let key = pair_key(&left.comparison_text(), &right.comparison_text());
        if let Some(verdict) = self.cache.lock().unwrap().get(&key) {
            tracing::debug!(left = %left.id, right = %right.id, "adjudication cache hit");
            return Ok(verdict);
        }

        let prompt = format!(
            "Record A: {}\nRecord B: {}\n\nAre these the same event?",
            left.comparison_text(),
            right.comparison_text()
        );
        let completion = self
            .llm
            .complete(CompletionRequest::new(ADJUDICATION_SYSTEM, prompt))
            .await?;
        let verdict = Self::parse_verdict(&completion.text)?;

        self.cache.lock().unwrap().insert(key, verdict);
        Ok(verdict)
    }
}

/// Symmetric cache key: hashing the sorted pair means (A, B) and (B, A)
/// hit the same entry.
fn pair_key(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(first.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(second.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Insertion-ordered bounded map; evicts the oldest entry when full.
struct VerdictCache {
    entries: HashMap<String, Verdict>,
    order: std::collections::VecDeque<String>,
    capacity: usize,
}

impl VerdictCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: std::collections::VecDeque::new(),
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<Verdict> {
        self.entries.get(key).copied()
    }

    fn insert(&mut self, key: String, verdict: Verdict) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key, verdict);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, verdict);
    }
}
