//! Task orchestration: the state machine that drives one question from
//! submission to a stored, chronologically ordered timeline.
//!
//! Tasks move `Pending -> Processing -> Completed | Failed`; terminal
//! states never transition again. A completed viewpoint with the same
//! fingerprint short-circuits the whole pipeline. The pipeline runs
//! under a single task deadline and a per-task cancellation token, and
//! publishes progress on a broadcast hub as stages complete. When the
//! deadline fires with enough articles already extracted, the partial
//! timeline is merged and persisted instead of being thrown away.

pub mod progress;

pub use progress::{ProgressHub, ProgressKind, ProgressMessage};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ChronicleError, FetchError, Result, TimeoutError};
use crate::merger::EventMerger;
use crate::pipeline::{self, KeywordPlan};
use crate::traits::{
    Adjudicator, ArticleRef, ArticleSource, Document, Embedder, LlmGateway, Persistence,
};
use crate::types::{
    document_fingerprint, DataSourcePreference, EngineConfig, RawEvent, SourceRef, Task,
    TaskStatus, TimelineEvent, Viewpoint, ViewpointKind,
};

/// Events accumulated while a task runs, shared with the deadline path
/// so a timed-out task can still persist what it gathered.
#[derive(Default)]
struct GatheredEvents {
    events: Vec<RawEvent>,
    succeeded_articles: usize,
}

pub struct TimelineOrchestrator<P, L, E, A> {
    store: Arc<P>,
    llm: Arc<L>,
    sources: Vec<Arc<dyn ArticleSource>>,
    merger: EventMerger<E, A>,
    config: EngineConfig,
    hub: ProgressHub,
    running: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl<P, L, E, A> TimelineOrchestrator<P, L, E, A>
where
    P: Persistence,
    L: LlmGateway,
    E: Embedder,
    A: Adjudicator,
{
    /// Build an orchestrator. Fails fast on invalid configuration.
    pub fn new(
        store: Arc<P>,
        llm: Arc<L>,
        sources: Vec<Arc<dyn ArticleSource>>,
        embedder: E,
        adjudicator: A,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let merger = EventMerger::new(embedder, adjudicator, config.merger.clone());
        Ok(Self {
            store,
            llm,
            sources,
            merger,
            config,
            hub: ProgressHub::new(),
            running: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Register a new task for a question. The task starts `Pending`;
    /// call `run` to execute it.
    pub async fn submit(
        &self,
        question: impl Into<String>,
        data_source: DataSourcePreference,
    ) -> Result<Task> {
        let task = Task::new(question, data_source);
        self.store.create_task(&task).await?;
        tracing::info!(task_id = %task.id, question = %task.question, "task submitted");
        Ok(task)
    }

    /// Register a task anchored on a single named entity. Keyword
    /// planning and relevance filtering are skipped; the entity name is
    /// the search, and every hit anchored on it counts as relevant.
    pub async fn submit_entity(
        &self,
        entity: impl Into<String>,
        data_source: DataSourcePreference,
    ) -> Result<Task> {
        let task = Task::for_entity(entity, data_source);
        self.store.create_task(&task).await?;
        tracing::info!(task_id = %task.id, entity = %task.question, "entity task submitted");
        Ok(task)
    }

    /// Register a task anchored on one specific document. No search
    /// runs; the document is fetched and its events become the timeline.
    pub async fn submit_document(
        &self,
        source: SourceRef,
        data_source: DataSourcePreference,
    ) -> Result<Task> {
        let task = Task::for_document(source, data_source);
        self.store.create_task(&task).await?;
        tracing::info!(task_id = %task.id, document = %task.question, "document task submitted");
        Ok(task)
    }

    pub async fn status(&self, task_id: Uuid) -> Result<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or(ChronicleError::TaskNotFound { task_id })
    }

    /// Progress history so far plus a live receiver for the rest.
    pub async fn subscribe(
        &self,
        task_id: Uuid,
    ) -> (Vec<ProgressMessage>, broadcast::Receiver<ProgressMessage>) {
        self.hub.subscribe(task_id).await
    }

    /// Progress as a single stream: history replayed first, then live
    /// messages until the task reaches a terminal state. Suited to
    /// SSE/WebSocket handlers.
    pub async fn progress_stream(
        &self,
        task_id: Uuid,
    ) -> impl futures::Stream<Item = ProgressMessage> + Send {
        self.hub.stream(task_id).await
    }

    /// The stored timeline for a task's viewpoint.
    pub async fn timeline(&self, task_id: Uuid) -> Result<Vec<TimelineEvent>> {
        let task = self.status(task_id).await?;
        let Some(viewpoint_id) = task.viewpoint_id else {
            return Ok(Vec::new());
        };
        self.store
            .get_viewpoint(viewpoint_id)
            .await?
            .ok_or(ChronicleError::ViewpointNotFound { viewpoint_id })?;
        self.store.get_timeline(viewpoint_id).await
    }

    /// Request cancellation of a running task.
    pub async fn cancel(&self, task_id: Uuid) {
        if let Some(token) = self.running.read().await.get(&task_id) {
            token.cancel();
        }
    }

    /// Run a pending task to a terminal state and return its timeline.
    pub async fn run(&self, task_id: Uuid) -> Result<Vec<TimelineEvent>> {
        let mut task = self.status(task_id).await?;
        self.transition(&mut task, TaskStatus::Processing).await?;

        let cancel = CancellationToken::new();
        self.running.write().await.insert(task_id, cancel.clone());
        let gathered = Mutex::new(GatheredEvents::default());

        // `None` means the task deadline elapsed.
        let finished: Option<Result<Vec<TimelineEvent>>> = tokio::select! {
            result = timeout(
                self.config.task_timeout,
                self.execute(&mut task, &cancel, &gathered),
            ) => result.ok(),
            _ = cancel.cancelled() => Some(Err(ChronicleError::Cancelled)),
        };
        self.running.write().await.remove(&task_id);

        let outcome = match finished {
            Some(result) => result,
            None => {
                cancel.cancel();
                self.salvage_partial(&mut task, &gathered).await
            }
        };

        match outcome {
            Ok(timeline) => {
                self.transition(&mut task, TaskStatus::Completed).await?;
                self.hub
                    .publish(
                        task.id,
                        ProgressKind::TaskCompleted {
                            viewpoint_id: task.viewpoint_id,
                        },
                    )
                    .await;
                Ok(timeline)
            }
            Err(error) => {
                self.abandon_viewpoint(&task).await;
                self.fail_task(&mut task, &error).await?;
                Err(error)
            }
        }
    }

    async fn execute(
        &self,
        task: &mut Task,
        cancel: &CancellationToken,
        gathered: &Mutex<GatheredEvents>,
    ) -> Result<Vec<TimelineEvent>> {
        let digest = self.config.output_digest();

        // Reuse path: a completed viewpoint for the same fingerprint
        // answers the question without any pipeline work.
        if self.config.reuse_viewpoints {
            let fingerprint = task.fingerprint(&digest);
            if let Some(existing) = self
                .store
                .find_by_fingerprint(&fingerprint, TaskStatus::Completed)
                .await?
            {
                let timeline = self.store.get_timeline(existing.id).await?;
                // A completed viewpoint with no events is not worth
                // reusing; reprocess instead.
                if !timeline.is_empty() {
                    tracing::info!(
                        task_id = %task.id,
                        viewpoint_id = %existing.id,
                        "reusing completed viewpoint"
                    );
                    task.viewpoint_id = Some(existing.id);
                    task.note = Some("reused existing timeline".into());
                    self.store.update_task(task).await?;
                    return Ok(timeline);
                }
            }
        }

        let mut viewpoint = match (task.kind, &task.canonical_source) {
            (ViewpointKind::DocumentCanonical, Some(source)) => {
                Viewpoint::for_document(source, task.data_source, &digest)
            }
            _ => Viewpoint::for_question(task.question.clone(), task.kind, task.data_source, &digest),
        };
        viewpoint.status = TaskStatus::Processing;
        self.store.create_viewpoint(&viewpoint).await?;
        task.viewpoint_id = Some(viewpoint.id);
        self.store.update_task(task).await?;

        match self
            .consolidate_and_store(task, viewpoint.id, cancel, gathered)
            .await
        {
            Ok(timeline) => {
                viewpoint.status = TaskStatus::Completed;
                viewpoint.updated_at = Utc::now();
                self.store.update_viewpoint(&viewpoint).await?;
                Ok(timeline)
            }
            Err(error) => {
                viewpoint.status = TaskStatus::Failed;
                viewpoint.updated_at = Utc::now();
                self.store.update_viewpoint(&viewpoint).await?;
                Err(error)
            }
        }
    }

    async fn consolidate_and_store(
        &self,
        task: &Task,
        viewpoint_id: Uuid,
        cancel: &CancellationToken,
        gathered: &Mutex<GatheredEvents>,
    ) -> Result<Vec<TimelineEvent>> {
        let raw_events = self.gather_events(task, cancel, gathered).await?;
        self.merge_and_store(task, viewpoint_id, &raw_events).await
    }

    /// Merge raw events, apply the relevance threshold to the
    /// consolidated timeline, order it, and persist it.
    async fn merge_and_store(
        &self,
        task: &Task,
        viewpoint_id: Uuid,
        raw_events: &[RawEvent],
    ) -> Result<Vec<TimelineEvent>> {
        self.publish_status(task.id, "merging", Some(format!("{} events", raw_events.len())))
            .await;
        let mut timeline = if self.config.enable_merger {
            self.merger.merge(raw_events).await?.events
        } else {
            raw_events.iter().map(TimelineEvent::from_raw).collect()
        };

        // The threshold runs after merging: a weak duplicate has already
        // contributed its source to the surviving event, and a merged
        // event stands on its best score. Canonical timelines are
        // anchored on their source and skip the threshold entirely.
        if task.kind == ViewpointKind::Synthetic {
            pipeline::apply_relevance_threshold(
                &mut timeline,
                self.config.event_relevance_threshold,
            );
        }
        if timeline.is_empty() {
            return Err(ChronicleError::Extraction(
                crate::error::ExtractionError::MalformedResponse {
                    reason: "no events survived merging and relevance filtering".into(),
                },
            ));
        }
        pipeline::sort_chronological(&mut timeline);

        self.store.store_timeline(viewpoint_id, &timeline).await?;
        Ok(timeline)
    }

    /// Acquisition through extraction and relevance scoring. Returns the
    /// raw events or the error that dooms the task. Every successfully
    /// extracted article is also appended to `gathered`, which the
    /// deadline path reads.
    async fn gather_events(
        &self,
        task: &Task,
        cancel: &CancellationToken,
        gathered: &Mutex<GatheredEvents>,
    ) -> Result<Vec<RawEvent>> {
        let hits = match (task.kind, &task.canonical_source) {
            (ViewpointKind::DocumentCanonical, Some(source)) => self.anchored_hits(source)?,
            _ => {
                let plan = if task.kind == ViewpointKind::EntityCanonical {
                    // The entity name itself is the whole search plan.
                    KeywordPlan {
                        question: task.question.clone(),
                        keywords: vec![task.question.clone()],
                    }
                } else {
                    self.publish_status(task.id, "planning keywords", None).await;
                    pipeline::plan_keywords(self.llm.as_ref(), &task.question).await?
                };

                self.publish_status(task.id, "searching articles", None).await;
                let hits = pipeline::search_articles(
                    &self.sources,
                    &plan,
                    task.data_source,
                    &self.config.acquisition,
                    cancel,
                )
                .await?;

                if task.kind == ViewpointKind::Synthetic {
                    pipeline::filter_articles(
                        self.llm.as_ref(),
                        &task.question,
                        hits,
                        self.config.acquisition.article_relevance_threshold,
                        self.config.relevance_batch_size,
                        self.config.acquisition.article_limit,
                    )
                    .await?
                } else {
                    // Articles found under the entity's own name are
                    // relevant by construction.
                    hits
                }
            }
        };

        self.publish_status(task.id, "fetching articles", Some(format!("{} candidates", hits.len())))
            .await;
        let report = pipeline::fetch_articles(hits, &self.config.acquisition, cancel).await?;
        let mut failed_articles = report.failed;

        self.publish_status(task.id, "extracting events", None).await;
        let mut raw_events: Vec<RawEvent> = Vec::new();
        let mut succeeded_articles = 0;
        for document in &report.documents {
            if cancel.is_cancelled() {
                return Err(ChronicleError::Cancelled);
            }
            match self.document_events(task, document).await {
                Ok(events) => {
                    succeeded_articles += 1;
                    {
                        let mut partial = gathered.lock().unwrap();
                        partial.events.extend(events.iter().cloned());
                        partial.succeeded_articles = succeeded_articles;
                    }
                    raw_events.extend(events);
                }
                Err(error) => {
                    tracing::warn!(
                        task_id = %task.id,
                        title = %document.source.title,
                        %error,
                        "article extraction failed"
                    );
                    self.hub
                        .publish(
                            task.id,
                            ProgressKind::Error {
                                message: format!(
                                    "extraction failed for \"{}\": {error}",
                                    document.source.title
                                ),
                            },
                        )
                        .await;
                    failed_articles += 1;
                }
            }
        }

        let required = self.required_articles(task);
        if succeeded_articles < required {
            return Err(ChronicleError::InsufficientArticles {
                succeeded: succeeded_articles,
                required,
                failed: failed_articles,
            });
        }
        if raw_events.is_empty() {
            return Err(ChronicleError::Extraction(
                crate::error::ExtractionError::MalformedResponse {
                    reason: "no dated events survived extraction".into(),
                },
            ));
        }

        // Canonical timelines skip scoring: their events come from the
        // anchoring source itself.
        if task.kind == ViewpointKind::Synthetic {
            raw_events = pipeline::score_events(
                self.llm.as_ref(),
                &task.question,
                raw_events,
                self.config.relevance_batch_size,
            )
            .await?;
        }
        Ok(raw_events)
    }

    /// The single search hit for a document-anchored task.
    fn anchored_hits(
        &self,
        source: &SourceRef,
    ) -> Result<Vec<(Arc<dyn ArticleSource>, ArticleRef)>> {
        let Some(article_source) = self
            .sources
            .iter()
            .find(|s| s.source_type() == source.source_type)
        else {
            return Err(ChronicleError::Fetch(FetchError::Source(
                format!("no article source registered for {:?}", source.source_type).into(),
            )));
        };
        Ok(vec![(
            Arc::clone(article_source),
            ArticleRef {
                source: source.clone(),
                summary: None,
            },
        )])
    }

    /// Events for one fetched article. A completed per-document
    /// viewpoint with the same fingerprint supplies them from the store;
    /// otherwise they are extracted and recorded under a fresh
    /// per-document viewpoint for the next task touching this article.
    async fn document_events(&self, task: &Task, document: &Document) -> Result<Vec<RawEvent>> {
        let digest = self.config.output_digest();
        let fingerprint = document_fingerprint(&document.source.url, &digest);

        let mut events = None;
        if self.config.reuse_viewpoints && task.kind != ViewpointKind::DocumentCanonical {
            if let Some(existing) = self
                .store
                .find_by_fingerprint(&fingerprint, TaskStatus::Completed)
                .await?
            {
                let cached = self.store.get_timeline(existing.id).await?;
                if !cached.is_empty() {
                    tracing::debug!(
                        task_id = %task.id,
                        title = %document.source.title,
                        viewpoint_id = %existing.id,
                        "reusing cached article events"
                    );
                    events = Some(cached.iter().filter_map(raw_from_cached).collect());
                }
            }
        }

        let events = match events {
            Some(events) => events,
            None => {
                let events = self.extract_from(task, document).await?;
                if task.kind != ViewpointKind::DocumentCanonical && !events.is_empty() {
                    self.record_document_viewpoint(task, document, &digest, &events)
                        .await?;
                }
                events
            }
        };

        // Stream unmerged events as each article finishes, so clients
        // can render a preliminary timeline before merging.
        if !events.is_empty() {
            let preliminary: Vec<TimelineEvent> =
                events.iter().map(TimelineEvent::from_raw).collect();
            self.hub
                .publish(task.id, ProgressKind::PreliminaryEvents { events: preliminary })
                .await;
        }
        Ok(events)
    }

    async fn record_document_viewpoint(
        &self,
        task: &Task,
        document: &Document,
        digest: &str,
        events: &[RawEvent],
    ) -> Result<()> {
        let mut viewpoint = Viewpoint::for_document(&document.source, task.data_source, digest);
        viewpoint.status = TaskStatus::Completed;
        self.store.create_viewpoint(&viewpoint).await?;
        let cached: Vec<TimelineEvent> = events.iter().map(TimelineEvent::from_raw).collect();
        self.store.store_timeline(viewpoint.id, &cached).await
    }

    async fn extract_from(&self, task: &Task, document: &Document) -> Result<Vec<RawEvent>> {
        pipeline::extract_events(
            self.llm.as_ref(),
            &task.question,
            document,
            &self.config.extraction,
        )
        .await
    }

    /// Deadline path. When enough articles were already extracted, the
    /// partial event set is merged and persisted so the deadline still
    /// yields a usable timeline; otherwise the deadline error stands.
    async fn salvage_partial(
        &self,
        task: &mut Task,
        gathered: &Mutex<GatheredEvents>,
    ) -> Result<Vec<TimelineEvent>> {
        let partial = std::mem::take(&mut *gathered.lock().unwrap());
        let deadline: ChronicleError = TimeoutError::TaskDeadline {
            elapsed_secs: self.config.task_timeout.as_secs(),
        }
        .into();

        if partial.succeeded_articles < self.required_articles(task) || partial.events.is_empty() {
            return Err(deadline);
        }
        let Some(viewpoint_id) = task.viewpoint_id else {
            return Err(deadline);
        };

        tracing::warn!(
            task_id = %task.id,
            articles = partial.succeeded_articles,
            events = partial.events.len(),
            "task deadline exceeded, persisting partial timeline"
        );
        let timeline = self
            .merge_and_store(task, viewpoint_id, &partial.events)
            .await?;
        self.complete_viewpoint(viewpoint_id).await?;
        task.note = Some(format!(
            "task deadline exceeded; partial timeline persisted from {} articles",
            partial.succeeded_articles
        ));
        Ok(timeline)
    }

    fn required_articles(&self, task: &Task) -> usize {
        // Canonical tasks are anchored on a known source; one article
        // carries the whole timeline.
        match task.kind {
            ViewpointKind::Synthetic => self.config.min_successful_articles,
            ViewpointKind::EntityCanonical | ViewpointKind::DocumentCanonical => 1,
        }
    }

    async fn complete_viewpoint(&self, viewpoint_id: Uuid) -> Result<()> {
        if let Some(mut viewpoint) = self.store.get_viewpoint(viewpoint_id).await? {
            viewpoint.status = TaskStatus::Completed;
            viewpoint.updated_at = Utc::now();
            self.store.update_viewpoint(&viewpoint).await?;
        }
        Ok(())
    }

    /// A failed run must not leave its viewpoint stuck in `Processing`.
    /// Best effort: a store error here is logged, not propagated, so it
    /// never masks the failure being reported.
    async fn abandon_viewpoint(&self, task: &Task) {
        let Some(viewpoint_id) = task.viewpoint_id else {
            return;
        };
        match self.store.get_viewpoint(viewpoint_id).await {
            Ok(Some(mut viewpoint)) if viewpoint.status == TaskStatus::Processing => {
                viewpoint.status = TaskStatus::Failed;
                viewpoint.updated_at = Utc::now();
                if let Err(error) = self.store.update_viewpoint(&viewpoint).await {
                    tracing::warn!(%viewpoint_id, %error, "could not mark viewpoint failed");
                }
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%viewpoint_id, %error, "could not load viewpoint to abandon");
            }
        }
    }

    /// Mark `Processing` tasks whose `updated_at` is older than the
    /// configured age as failed. Returns how many were swept.
    pub async fn sweep_stuck_tasks(&self) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stuck_task_age)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
        let stale = self.store.find_stale_processing(cutoff).await?;
        let count = stale.len();

        for mut task in stale {
            tracing::warn!(task_id = %task.id, "sweeping stuck task");
            task.note = Some("task exceeded the stuck-task age and was swept".into());
            self.transition(&mut task, TaskStatus::Failed).await?;
            self.hub
                .publish(
                    task.id,
                    ProgressKind::TaskFailed {
                        note: task.note.clone(),
                    },
                )
                .await;
        }
        Ok(count)
    }

    async fn transition(&self, task: &mut Task, next: TaskStatus) -> Result<()> {
        if !task.status.can_transition_to(next) {
            return Err(ChronicleError::InvalidTransition {
                from: format!("{:?}", task.status),
                to: format!("{next:?}"),
            });
        }
        task.status = next;
        task.updated_at = Utc::now();
        self.store.update_task(task).await
    }

    async fn fail_task(&self, task: &mut Task, error: &ChronicleError) -> Result<()> {
        task.note = Some(error.to_string());
        self.transition(task, TaskStatus::Failed).await?;
        self.hub
            .publish(
                task.id,
                ProgressKind::TaskFailed {
                    note: task.note.clone(),
                },
            )
            .await;
        Ok(())
    }

    async fn publish_status(&self, task_id: Uuid, step: &str, detail: Option<String>) {
        tracing::debug!(%task_id, step, "stage");
        self.hub
            .publish(
                task_id,
                ProgressKind::Status {
                    step: step.to_string(),
                    detail,
                },
            )
            .await;
    }
}

/// Rebuild a raw event from a cached per-document timeline entry.
fn raw_from_cached(event: &TimelineEvent) -> Option<RawEvent> {
    let source = event.snippets.first()?.clone();
    Some(
        RawEvent::new(&event.description, event.date.clone(), source)
            .with_entities(event.entities.clone()),
    )
}
