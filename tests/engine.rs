//! End-to-end orchestrator runs against scripted collaborators.

use std::sync::Arc;
use std::time::Duration;

use chronicle::error::TimeoutError;
use chronicle::orchestrator::{ProgressKind, TimelineOrchestrator};
use chronicle::stores::MemoryStore;
use chronicle::testing::{MockArticleSource, MockEmbedder, MockLlm, ScriptedAdjudicator};
use chronicle::traits::{TaskStore, ViewpointStore};
use chronicle::types::{
    DataSourcePreference, DatePrecision, EngineConfig, SourceRef, SourceType, TaskStatus,
    ViewpointKind,
};
use chronicle::ChronicleError;

const DOC1_EVENTS: &str = r#"{"events": [
    {"description": "Honda Motor Company was founded",
     "date": "September 24, 1948",
     "entities": ["Honda", "Japan"],
     "snippet": "Honda Motor Company was founded on 24 September 1948."},
    {"description": "Production of the D-Type motorcycle began",
     "date": "1949",
     "entities": ["D-Type"],
     "snippet": "In 1949 production of the D-Type began."}
]}"#;

const DOC2_EVENTS: &str = r#"{"events": [
    {"description": "Honda Motor Co. was established",
     "date": "1948",
     "entities": ["honda", "JAPAN"],
     "snippet": "Honda Motor Co. was established in 1948."}
]}"#;

fn scripted_llm(article_count: usize, event_scores: &str) -> MockLlm {
    let llm = MockLlm::new();
    llm.script("search keywords", r#"{"keywords": ["Honda", "Honda Motor"]}"#);
    let article_scores: Vec<String> = (0..article_count).map(|_| "0.9".to_string()).collect();
    llm.script(
        "useful each article",
        &format!(r#"{{"scores": [{}]}}"#, article_scores.join(", ")),
    );
    llm.script("extract dated", DOC1_EVENTS);
    llm.script("extract dated", DOC2_EVENTS);
    llm.script("relevant each historical event", event_scores);
    llm
}

fn honda_source() -> MockArticleSource {
    MockArticleSource::new(SourceType::Wikipedia)
        .with_article(
            "https://en.wikipedia.org/wiki/Honda",
            "Honda",
            "Honda Motor Company was founded on 24 September 1948. In 1949 production of the D-Type began.",
        )
        .with_article(
            "https://example.org/honda-history",
            "Honda history",
            "Honda Motor Co. was established in 1948.",
        )
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.acquisition.retry_base_delay = Duration::from_millis(1);
    config
}

#[tokio::test]
async fn builds_a_merged_sorted_timeline() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(scripted_llm(2, r#"{"scores": [0.95, 0.7, 0.9]}"#));
    let orchestrator = TimelineOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&llm),
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();

    let task = orchestrator
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    let timeline = orchestrator.run(task.id).await.unwrap();

    // The two founding events merge on full entity overlap; the D-Type
    // event stands alone. Chronological order puts 1948 first.
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].description, "Honda Motor Company was founded");
    assert_eq!(timeline[0].source_count(), 2);
    assert_eq!(timeline[0].date.precision, DatePrecision::Day);
    assert_eq!(timeline[1].description, "Production of the D-Type motorcycle began");

    let finished = orchestrator.status(task.id).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Completed);
    assert!(finished.viewpoint_id.is_some());

    // The stored timeline matches what run returned.
    let stored = orchestrator.timeline(task.id).await.unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn repeated_question_reuses_the_completed_viewpoint() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(scripted_llm(2, r#"{"scores": [0.95, 0.7, 0.9]}"#));
    let orchestrator = TimelineOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&llm),
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();

    let first = orchestrator
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    orchestrator.run(first.id).await.unwrap();
    let extraction_calls = llm.call_count("extract dated");

    // Different casing and spacing still hits the same fingerprint.
    let second = orchestrator
        .submit("  when was HONDA founded? ", DataSourcePreference::All)
        .await
        .unwrap();
    let timeline = orchestrator.run(second.id).await.unwrap();

    assert_eq!(timeline.len(), 2);
    assert_eq!(llm.call_count("extract dated"), extraction_calls);

    let reused = orchestrator.status(second.id).await.unwrap();
    assert_eq!(reused.status, TaskStatus::Completed);
    assert_eq!(reused.note.as_deref(), Some("reused existing timeline"));
    assert_eq!(
        reused.viewpoint_id,
        orchestrator.status(first.id).await.unwrap().viewpoint_id
    );
}

#[tokio::test]
async fn too_few_successful_articles_fails_the_task() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(scripted_llm(3, r#"{"scores": [0.95, 0.7]}"#));
    let source = MockArticleSource::new(SourceType::Wikipedia)
        .with_article(
            "https://en.wikipedia.org/wiki/Honda",
            "Honda",
            "Honda Motor Company was founded on 24 September 1948.",
        )
        .with_broken_article("https://dead.example/one", "Honda dead link")
        .with_broken_article("https://dead.example/two", "Honda other dead link");

    let mut config = config();
    config.acquisition.fetch_attempts = 2;
    config.min_successful_articles = 2;

    let orchestrator = TimelineOrchestrator::new(
        Arc::clone(&store),
        llm,
        vec![Arc::new(source)],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config,
    )
    .unwrap();

    let task = orchestrator
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    let error = orchestrator.run(task.id).await.unwrap_err();
    assert!(matches!(
        error,
        ChronicleError::InsufficientArticles {
            succeeded: 1,
            required: 2,
            ..
        }
    ));

    let failed = orchestrator.status(task.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.note.unwrap().contains("required articles"));
}

#[tokio::test]
async fn disabling_the_merger_keeps_duplicates() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(scripted_llm(2, r#"{"scores": [0.95, 0.7, 0.9]}"#));
    let orchestrator = TimelineOrchestrator::new(
        store,
        llm,
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config().with_merger_enabled(false),
    )
    .unwrap();

    let task = orchestrator
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    let timeline = orchestrator.run(task.id).await.unwrap();

    assert_eq!(timeline.len(), 3);
}

#[tokio::test]
async fn zero_extracted_events_fails_the_task() {
    let llm = MockLlm::new();
    llm.script("search keywords", r#"{"keywords": ["Honda"]}"#);
    llm.script("useful each article", r#"{"scores": [0.9, 0.9]}"#);
    llm.script("extract dated", r#"{"events": []}"#);

    let orchestrator = TimelineOrchestrator::new(
        Arc::new(MemoryStore::new()),
        Arc::new(llm),
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();

    let task = orchestrator
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    assert!(orchestrator.run(task.id).await.is_err());
    let failed = orchestrator.status(task.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
}

#[tokio::test]
async fn completed_tasks_cannot_run_again() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(scripted_llm(2, r#"{"scores": [0.95, 0.7, 0.9]}"#));
    let orchestrator = TimelineOrchestrator::new(
        store,
        llm,
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();

    let task = orchestrator
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    orchestrator.run(task.id).await.unwrap();

    let error = orchestrator.run(task.id).await.unwrap_err();
    assert!(matches!(error, ChronicleError::InvalidTransition { .. }));
}

#[tokio::test]
async fn unknown_task_id_is_reported() {
    let orchestrator = TimelineOrchestrator::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MockLlm::new()),
        vec![],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        orchestrator.status(missing).await.unwrap_err(),
        ChronicleError::TaskNotFound { task_id } if task_id == missing
    ));
}

#[tokio::test]
async fn stuck_processing_tasks_are_swept() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = TimelineOrchestrator::new(
        Arc::clone(&store),
        Arc::new(MockLlm::new()),
        vec![],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();

    let mut task = orchestrator
        .submit("orphaned question", DataSourcePreference::All)
        .await
        .unwrap();
    // Simulate a crash mid-run: Processing with a stale heartbeat.
    task.status = TaskStatus::Processing;
    task.updated_at = chrono::Utc::now() - chrono::Duration::hours(2);
    store.update_task(&task).await.unwrap();

    let swept = orchestrator.sweep_stuck_tasks().await.unwrap();
    assert_eq!(swept, 1);
    let failed = orchestrator.status(task.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.note.unwrap().contains("stuck"));

    // A second sweep finds nothing.
    assert_eq!(orchestrator.sweep_stuck_tasks().await.unwrap(), 0);
}

#[tokio::test]
async fn progress_is_streamed_and_replayed() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(scripted_llm(2, r#"{"scores": [0.95, 0.7, 0.9]}"#));
    let orchestrator = TimelineOrchestrator::new(
        store,
        llm,
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();

    let task = orchestrator
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    orchestrator.run(task.id).await.unwrap();

    // Late subscription replays the full history in order.
    let (history, _rx) = orchestrator.subscribe(task.id).await;
    assert!(history.len() >= 3);
    for (i, message) in history.iter().enumerate() {
        assert_eq!(message.seq, i as u64);
    }
    assert!(history
        .iter()
        .any(|m| matches!(&m.kind, ProgressKind::PreliminaryEvents { events } if !events.is_empty())));
    match &history.last().unwrap().kind {
        ProgressKind::TaskCompleted { viewpoint_id } => assert!(viewpoint_id.is_some()),
        other => panic!("expected TaskCompleted, got {other:?}"),
    }
}

#[tokio::test]
async fn deadline_salvages_the_partial_timeline() {
    let store = Arc::new(MemoryStore::new());
    let llm = MockLlm::new();
    llm.script("search keywords", r#"{"keywords": ["Honda"]}"#);
    llm.script("useful each article", r#"{"scores": [0.9, 0.9]}"#);
    llm.script("extract dated", DOC1_EVENTS);
    llm.script("extract dated", DOC2_EVENTS);
    // The run hangs on event scoring, after both articles extracted.
    llm.script_stall("relevant each historical event");

    let mut cfg = config();
    cfg.task_timeout = Duration::from_millis(250);
    let orchestrator = TimelineOrchestrator::new(
        Arc::clone(&store),
        Arc::new(llm),
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        cfg,
    )
    .unwrap();

    let task = orchestrator
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    let timeline = orchestrator.run(task.id).await.unwrap();

    // Everything gathered before the deadline survives, merged and sorted.
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].description, "Honda Motor Company was founded");
    assert_eq!(timeline[0].source_count(), 2);

    let finished = orchestrator.status(task.id).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Completed);
    assert!(finished.note.unwrap().contains("deadline"));

    let viewpoint = store
        .get_viewpoint(finished.viewpoint_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(viewpoint.status, TaskStatus::Completed);
    assert_eq!(orchestrator.timeline(task.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn deadline_without_enough_articles_fails_and_closes_the_viewpoint() {
    let store = Arc::new(MemoryStore::new());
    let llm = MockLlm::new();
    llm.script("search keywords", r#"{"keywords": ["Honda"]}"#);
    llm.script("useful each article", r#"{"scores": [0.9, 0.9]}"#);
    // Extraction never returns, so nothing is gathered.
    llm.script_stall("extract dated");

    let mut cfg = config();
    cfg.task_timeout = Duration::from_millis(250);
    let orchestrator = TimelineOrchestrator::new(
        Arc::clone(&store),
        Arc::new(llm),
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        cfg,
    )
    .unwrap();

    let task = orchestrator
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    let error = orchestrator.run(task.id).await.unwrap_err();
    assert!(matches!(
        error,
        ChronicleError::Timeout(TimeoutError::TaskDeadline { .. })
    ));

    let failed = orchestrator.status(task.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);

    // The viewpoint created mid-run is not left in Processing.
    let viewpoint = store
        .get_viewpoint(failed.viewpoint_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(viewpoint.status, TaskStatus::Failed);
}

#[tokio::test]
async fn changed_settings_do_not_reuse_stored_timelines() {
    let store = Arc::new(MemoryStore::new());
    let llm = MockLlm::new();
    llm.script("search keywords", r#"{"keywords": ["Honda"]}"#);
    llm.script("useful each article", r#"{"scores": [0.9, 0.9]}"#);
    llm.script("relevant each historical event", r#"{"scores": [0.95, 0.7, 0.9]}"#);
    // Both runs extract from scratch, two articles each.
    for _ in 0..2 {
        llm.script("extract dated", DOC1_EVENTS);
        llm.script("extract dated", DOC2_EVENTS);
    }
    let llm = Arc::new(llm);

    let merged = TimelineOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&llm),
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();
    let first = merged
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    assert_eq!(merged.run(first.id).await.unwrap().len(), 2);

    // Same store, same question, but merging disabled: the stored
    // timeline was produced under different settings and must not be
    // served back.
    let unmerged = TimelineOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&llm),
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config().with_merger_enabled(false),
    )
    .unwrap();
    let second = unmerged
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    let timeline = unmerged.run(second.id).await.unwrap();

    assert_eq!(timeline.len(), 3);
    let rerun = unmerged.status(second.id).await.unwrap();
    assert_ne!(rerun.note.as_deref(), Some("reused existing timeline"));
}

#[tokio::test]
async fn repeat_articles_reuse_cached_event_sets() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(scripted_llm(2, r#"{"scores": [0.95, 0.7, 0.9]}"#));
    let orchestrator = TimelineOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&llm),
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();

    let first = orchestrator
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    orchestrator.run(first.id).await.unwrap();
    assert_eq!(llm.call_count("extract dated"), 2);

    // A different question that lands on the same articles: the
    // per-document event sets come from the store, not the LLM.
    let second = orchestrator
        .submit("Tell the history of Honda Motor", DataSourcePreference::All)
        .await
        .unwrap();
    let timeline = orchestrator.run(second.id).await.unwrap();

    assert_eq!(timeline.len(), 2);
    assert_eq!(llm.call_count("extract dated"), 2);
    assert_ne!(
        orchestrator.status(second.id).await.unwrap().viewpoint_id,
        orchestrator.status(first.id).await.unwrap().viewpoint_id,
    );
}

#[tokio::test]
async fn entity_task_skips_planning_and_relevance() {
    let store = Arc::new(MemoryStore::new());
    let llm = MockLlm::new();
    llm.script("extract dated", DOC1_EVENTS);
    llm.script("extract dated", DOC2_EVENTS);

    let orchestrator = TimelineOrchestrator::new(
        Arc::clone(&store),
        Arc::new(llm),
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();

    let task = orchestrator
        .submit_entity("Honda", DataSourcePreference::All)
        .await
        .unwrap();
    let timeline = orchestrator.run(task.id).await.unwrap();
    assert_eq!(timeline.len(), 2);

    let done = orchestrator.status(task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    let viewpoint = store
        .get_viewpoint(done.viewpoint_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(viewpoint.kind, ViewpointKind::EntityCanonical);
}

#[tokio::test]
async fn document_task_builds_a_timeline_from_one_article() {
    let store = Arc::new(MemoryStore::new());
    let llm = Arc::new(MockLlm::new());
    llm.script("extract dated", DOC1_EVENTS);

    let source = Arc::new(honda_source());
    let orchestrator = TimelineOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&llm),
        vec![Arc::clone(&source) as Arc<dyn chronicle::traits::ArticleSource>],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();

    let anchor = SourceRef::new("https://en.wikipedia.org/wiki/Honda", "Honda", SourceType::Wikipedia);
    let task = orchestrator
        .submit_document(anchor.clone(), DataSourcePreference::All)
        .await
        .unwrap();
    let timeline = orchestrator.run(task.id).await.unwrap();

    // Only the anchored article is fetched; its two events come back in
    // chronological order.
    assert_eq!(source.fetch_calls(), 1);
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].description, "Honda Motor Company was founded");

    let done = orchestrator.status(task.id).await.unwrap();
    let viewpoint = store
        .get_viewpoint(done.viewpoint_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(viewpoint.kind, ViewpointKind::DocumentCanonical);
    assert_eq!(viewpoint.canonical_source.as_deref(), Some(anchor.url.as_str()));

    // A second task for the same document reuses the stored timeline.
    let repeat = orchestrator
        .submit_document(anchor, DataSourcePreference::All)
        .await
        .unwrap();
    orchestrator.run(repeat.id).await.unwrap();
    assert_eq!(llm.call_count("extract dated"), 1);
    assert_eq!(
        orchestrator.status(repeat.id).await.unwrap().note.as_deref(),
        Some("reused existing timeline"),
    );
}

#[tokio::test]
async fn weak_duplicates_still_contribute_their_sources() {
    let store = Arc::new(MemoryStore::new());
    // The second article's founding event scores well below the
    // threshold, but it duplicates the strong one; the standalone
    // D-Type event scores below it too.
    let llm = Arc::new(scripted_llm(2, r#"{"scores": [0.95, 0.2, 0.3]}"#));
    let orchestrator = TimelineOrchestrator::new(
        store,
        llm,
        vec![Arc::new(honda_source())],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();

    let task = orchestrator
        .submit("When was Honda founded?", DataSourcePreference::All)
        .await
        .unwrap();
    let timeline = orchestrator.run(task.id).await.unwrap();

    // The weak duplicate merged in before the threshold ran, so the
    // surviving event keeps both sources; only the weak standalone
    // event is dropped.
    assert_eq!(timeline.len(), 1);
    let survivor = &timeline[0];
    assert!(survivor.is_merged);
    assert_eq!(survivor.source_count(), 2);
    assert_eq!(survivor.relevance, 0.95);
}

#[tokio::test]
async fn dangling_viewpoint_reference_is_reported() {
    let store = Arc::new(MemoryStore::new());
    let orchestrator = TimelineOrchestrator::new(
        Arc::clone(&store),
        Arc::new(MockLlm::new()),
        vec![],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        config(),
    )
    .unwrap();

    let mut task = orchestrator
        .submit("q", DataSourcePreference::All)
        .await
        .unwrap();
    task.viewpoint_id = Some(uuid::Uuid::new_v4());
    store.update_task(&task).await.unwrap();

    assert!(matches!(
        orchestrator.timeline(task.id).await.unwrap_err(),
        ChronicleError::ViewpointNotFound { .. }
    ));
}

#[tokio::test]
async fn source_preference_excludes_other_sources() {
    let news_only = MockArticleSource::new(SourceType::News).with_article(
        "https://news.example/honda",
        "Honda news",
        "Honda Motor Company was founded on 24 September 1948.",
    );
    let llm = MockLlm::new();
    llm.script("search keywords", r#"{"keywords": ["Honda"]}"#);

    let mut cfg = config();
    cfg.min_successful_articles = 1;
    let orchestrator = TimelineOrchestrator::new(
        Arc::new(MemoryStore::new()),
        Arc::new(llm),
        vec![Arc::new(news_only)],
        MockEmbedder::new(),
        ScriptedAdjudicator::new(),
        cfg,
    )
    .unwrap();

    // Wikipedia-only task against a news-only source: nothing to fetch.
    let task = orchestrator
        .submit("When was Honda founded?", DataSourcePreference::WikipediaOnly)
        .await
        .unwrap();
    let error = orchestrator.run(task.id).await.unwrap_err();
    assert!(matches!(
        error,
        ChronicleError::InsufficientArticles { succeeded: 0, .. }
    ));
}
