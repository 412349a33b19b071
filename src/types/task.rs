//! Tasks and viewpoints.
//!
//! A task is one user request to build a timeline. A viewpoint is the
//! canonical, reusable answer to a question: completed viewpoints are
//! keyed by a content fingerprint so repeat questions short-circuit the
//! whole pipeline. The fingerprint folds in a digest of the
//! result-shaping configuration, so timelines produced under different
//! settings never alias.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::event::SourceRef;

/// Lifecycle of a timeline task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Legal state-machine moves. Terminal states never transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Which article sources a task is allowed to draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataSourcePreference {
    #[default]
    All,
    WikipediaOnly,
    NewsOnly,
    DatasetOnly,
}

impl DataSourcePreference {
    fn fingerprint_tag(self) -> &'static str {
        match self {
            DataSourcePreference::All => "all",
            DataSourcePreference::WikipediaOnly => "wikipedia",
            DataSourcePreference::NewsOnly => "news",
            DataSourcePreference::DatasetOnly => "dataset",
        }
    }
}

/// How a viewpoint was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewpointKind {
    /// Built from a free-text research question.
    Synthetic,
    /// Anchored on a single named entity's page.
    EntityCanonical,
    /// Anchored on one specific document.
    DocumentCanonical,
}

impl ViewpointKind {
    fn fingerprint_tag(self) -> &'static str {
        match self {
            ViewpointKind::Synthetic => "synthetic",
            ViewpointKind::EntityCanonical => "entity",
            ViewpointKind::DocumentCanonical => "document",
        }
    }
}

/// One user request to construct a timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub question: String,
    pub kind: ViewpointKind,
    pub data_source: DataSourcePreference,
    pub status: TaskStatus,
    /// For document tasks: the single document anchoring the timeline.
    pub canonical_source: Option<SourceRef>,
    /// Set once the task resolves to a viewpoint (fresh or reused).
    pub viewpoint_id: Option<Uuid>,
    /// Human-readable failure or partial-result explanation.
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(question: impl Into<String>, data_source: DataSourcePreference) -> Self {
        Self::with_kind(question, ViewpointKind::Synthetic, data_source)
    }

    /// A task anchored on one named entity; the entity name doubles as
    /// the question and the sole search keyword.
    pub fn for_entity(entity: impl Into<String>, data_source: DataSourcePreference) -> Self {
        Self::with_kind(entity, ViewpointKind::EntityCanonical, data_source)
    }

    /// A task anchored on one specific document; no search runs at all.
    pub fn for_document(source: SourceRef, data_source: DataSourcePreference) -> Self {
        let mut task = Self::with_kind(
            source.title.clone(),
            ViewpointKind::DocumentCanonical,
            data_source,
        );
        task.canonical_source = Some(source);
        task
    }

    fn with_kind(
        question: impl Into<String>,
        kind: ViewpointKind,
        data_source: DataSourcePreference,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            kind,
            data_source,
            status: TaskStatus::Pending,
            canonical_source: None,
            viewpoint_id: None,
            note: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fingerprint of the task's inputs, shared with the viewpoint it
    /// produces. Document tasks fingerprint on the document URL; the
    /// others on the normalized question.
    pub fn fingerprint(&self, config_digest: &str) -> String {
        match (&self.kind, &self.canonical_source) {
            (ViewpointKind::DocumentCanonical, Some(source)) => {
                document_fingerprint(&source.url, config_digest)
            }
            _ => viewpoint_fingerprint(&self.question, self.kind, self.data_source, config_digest),
        }
    }
}

/// A completed (or in-progress) timeline for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewpoint {
    pub id: Uuid,
    pub question: String,
    pub kind: ViewpointKind,
    pub data_source: DataSourcePreference,
    /// SHA-256 over the normalized question (or document URL), kind,
    /// source preference, and result-shaping config digest.
    pub fingerprint: String,
    /// For canonical viewpoints: the entity page or document anchoring
    /// the timeline.
    pub canonical_source: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Viewpoint {
    pub fn for_question(
        question: impl Into<String>,
        kind: ViewpointKind,
        data_source: DataSourcePreference,
        config_digest: &str,
    ) -> Self {
        let question = question.into();
        let fingerprint = viewpoint_fingerprint(&question, kind, data_source, config_digest);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            question,
            kind,
            data_source,
            fingerprint,
            canonical_source: None,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// A per-document canonical viewpoint, fingerprinted on the document
    /// URL so every task touching the same article shares it.
    pub fn for_document(
        source: &SourceRef,
        data_source: DataSourcePreference,
        config_digest: &str,
    ) -> Self {
        let fingerprint = document_fingerprint(&source.url, config_digest);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            question: source.title.clone(),
            kind: ViewpointKind::DocumentCanonical,
            data_source,
            fingerprint,
            canonical_source: Some(source.url.clone()),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// SHA-256 hex digest over the lowercased, whitespace-collapsed question
/// plus the kind tag, data source tag, and config digest.
pub fn viewpoint_fingerprint(
    question: &str,
    kind: ViewpointKind,
    data_source: DataSourcePreference,
    config_digest: &str,
) -> String {
    let normalized: Vec<&str> = question.split_whitespace().collect();
    let normalized = normalized.join(" ").to_lowercase();
    fingerprint_parts(&[
        normalized.as_bytes(),
        kind.fingerprint_tag().as_bytes(),
        data_source.fingerprint_tag().as_bytes(),
        config_digest.as_bytes(),
    ])
}

/// Fingerprint for a per-document canonical viewpoint. Keyed on the URL
/// rather than the title, so retitled articles still hit the cache.
pub fn document_fingerprint(url: &str, config_digest: &str) -> String {
    fingerprint_parts(&[b"document", url.trim().as_bytes(), config_digest.as_bytes()])
}

fn fingerprint_parts(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            hasher.update(b"\x1f");
        }
        hasher.update(part);
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
