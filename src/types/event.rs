//! Event types flowing through the pipeline.
//!
//! `RawEvent` is what extraction produces per article chunk. The merger
//! consolidates clusters of raw events into `TimelineEvent`s, which carry
//! every contributing source and snippet.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::date::ParsedDateInfo;

/// Where an article came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Wikipedia,
    News,
    Dataset,
    Generic,
}

/// Stable reference to a fetched article. Used as the key for snippet
/// attribution on merged events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub url: String,
    pub title: String,
    pub source_type: SourceType,
    /// Language code of the article body, e.g. "en".
    pub language: Option<String>,
    /// Backing document id for dataset sources.
    pub doc_id: Option<String>,
}

impl SourceRef {
    pub fn new(url: impl Into<String>, title: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            source_type,
            language: None,
            doc_id: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }
}

/// A named entity mentioned by an event, as reported by extraction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub name: String,
    /// Coarse kind, e.g. "person", "organization", "location". Free-form
    /// since it comes straight from the model.
    pub kind: Option<String>,
}

impl EntityRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
        }
    }

    /// Lowercased, whitespace-trimmed name used for overlap comparison.
    pub fn normalized_name(&self) -> String {
        self.name.trim().to_lowercase()
    }
}

/// Provenance of one raw event: the article it was extracted from plus
/// the exact snippet that supports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSourceInfo {
    pub source: SourceRef,
    pub snippet: String,
}

/// A single event as extracted from one article chunk, before merging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: Uuid,
    pub description: String,
    pub date: ParsedDateInfo,
    pub entities: Vec<EntityRef>,
    pub source: EventSourceInfo,
    /// Relevance to the originating question, 0.0..=1.0, scored after
    /// extraction. Defaults to 1.0 until scored.
    pub relevance: f32,
}

impl RawEvent {
    pub fn new(description: impl Into<String>, date: ParsedDateInfo, source: EventSourceInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            date,
            entities: Vec::new(),
            source,
            relevance: 1.0,
        }
    }

    pub fn with_entities(mut self, entities: Vec<EntityRef>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_relevance(mut self, relevance: f32) -> Self {
        self.relevance = relevance;
        self
    }

    /// Text fed to the embedder and the adjudicator: the description plus
    /// the display date, so temporally distinct events embed apart.
    pub fn comparison_text(&self) -> String {
        if self.date.display_text.is_empty() {
            self.description.clone()
        } else {
            format!("{} ({})", self.description, self.date.display_text)
        }
    }
}

/// A consolidated event on the final timeline.
///
/// Snippets keep insertion order: the representative's snippet first,
/// then one per distinct source among the absorbed events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: Uuid,
    pub description: String,
    pub date: ParsedDateInfo,
    pub entities: Vec<EntityRef>,
    pub snippets: Vec<EventSourceInfo>,
    pub relevance: f32,
    /// True once at least one other raw event was folded in.
    pub is_merged: bool,
    /// Ids of all raw events folded into this one, representative first.
    pub raw_event_ids: Vec<Uuid>,
}

impl TimelineEvent {
    /// Promote a raw event to a single-member timeline event.
    pub fn from_raw(raw: &RawEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: raw.description.clone(),
            date: raw.date.clone(),
            entities: raw.entities.clone(),
            snippets: vec![raw.source.clone()],
            relevance: raw.relevance,
            is_merged: false,
            raw_event_ids: vec![raw.id],
        }
    }

    /// Fold another raw event into this one. Keeps this event's
    /// description; unions entities; keeps the more precise date (ties go
    /// to the existing date); first snippet per source wins.
    pub fn absorb(&mut self, raw: &RawEvent) {
        for entity in &raw.entities {
            let known = self
                .entities
                .iter()
                .any(|e| e.normalized_name() == entity.normalized_name());
            if !known {
                self.entities.push(entity.clone());
            }
        }
        if raw.date.precision.rank() < self.date.precision.rank() {
            self.date = raw.date.clone();
        }
        let source_known = self
            .snippets
            .iter()
            .any(|s| s.source == raw.source.source);
        if !source_known {
            self.snippets.push(raw.source.clone());
        }
        self.relevance = self.relevance.max(raw.relevance);
        self.is_merged = true;
        self.raw_event_ids.push(raw.id);
    }

    /// Number of distinct sources backing this event.
    pub fn source_count(&self) -> usize {
        self.snippets.len()
    }
}
