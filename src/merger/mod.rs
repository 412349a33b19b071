//! Event merger: deduplicates raw events into consolidated timeline events.
//!
//! Three tiers, cheapest first:
//! 1. Rule tier: pairs sharing enough named entities merge outright when
//!    the Jaccard ratio over the entity union clears the threshold.
//!    Pairs dated too many years apart are excluded before any tier runs.
//! 2. Embedding tier (hybrid mode): cosine similarity of comparison-text
//!    embeddings auto-merges high-similarity pairs and flags a middle
//!    band as ambiguous.
//! 3. Adjudication tier: ambiguous pairs go to the LLM in bounded
//!    windows; an affirmative verdict merges only above the confidence
//!    floor, and any adjudication failure leaves the pair unmerged.
//!
//! Decisions land in a union-find structure, so merges are transitive:
//! if A merges with B and B with C, all three collapse into one event.

mod cluster;
mod embedding_cache;

pub use cluster::Clusters;
pub use embedding_cache::EmbeddingCache;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::error::{AdjudicationError, ChronicleError, Result};
use crate::traits::{cosine_similarity, Adjudicator, Embedder};
use crate::types::{MergerConfig, RawEvent, TimelineEvent};

/// Counters describing one merge run, logged at completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub input_events: usize,
    pub output_events: usize,
    pub candidate_pairs: usize,
    pub temporal_exclusions: usize,
    pub rule_merges: usize,
    pub embedding_merges: usize,
    pub adjudicated_merges: usize,
    pub adjudications: usize,
    pub adjudication_failures: usize,
    /// Set when embedding failed and the hybrid tiers were skipped.
    pub embedding_degraded: bool,
}

/// Result of one merge run.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub events: Vec<TimelineEvent>,
    pub stats: MergeStats,
}

pub struct EventMerger<E, A> {
    embedder: E,
    adjudicator: A,
    config: MergerConfig,
    cache: EmbeddingCache,
    adjudication_limit: Arc<Semaphore>,
}

impl<E: Embedder, A: Adjudicator> EventMerger<E, A> {
    pub fn new(embedder: E, adjudicator: A, config: MergerConfig) -> Self {
        let cache = EmbeddingCache::new(config.embedding_cache_size);
        let adjudication_limit = Arc::new(Semaphore::new(config.max_concurrent_adjudications));
        Self {
            embedder,
            adjudicator,
            config,
            cache,
            adjudication_limit,
        }
    }

    /// Merge duplicate raw events. Deterministic for a fixed input and
    /// fixed collaborator behavior: candidate ordering, representative
    /// selection, and consolidation are all tie-broken explicitly.
    pub async fn merge(&self, events: &[RawEvent]) -> Result<MergeOutcome> {
        let mut stats = MergeStats {
            input_events: events.len(),
            ..Default::default()
        };

        if events.len() <= 1 {
            let consolidated: Vec<TimelineEvent> =
                events.iter().map(TimelineEvent::from_raw).collect();
            stats.output_events = consolidated.len();
            return Ok(MergeOutcome {
                events: consolidated,
                stats,
            });
        }

        let entity_sets: Vec<BTreeSet<String>> = events
            .iter()
            .map(|e| e.entities.iter().map(|en| en.normalized_name()).collect())
            .collect();

        let pairs = candidate_pairs(&entity_sets, self.config.min_shared_entities);
        stats.candidate_pairs = pairs.len();

        let mut clusters = Clusters::new(events.len());
        let mut undecided: Vec<(usize, usize)> = Vec::new();

        // Tier 1: entity overlap rule, behind a temporal guard.
        for &(i, j, shared) in &pairs {
            if clusters.same_set(i, j) {
                continue;
            }
            if years_apart(&events[i], &events[j]) > self.config.max_year_gap {
                stats.temporal_exclusions += 1;
                continue;
            }
            let union = entity_sets[i].len() + entity_sets[j].len() - shared;
            let overlap = shared as f32 / union as f32;
            if overlap >= self.config.rule_overlap_threshold {
                clusters.union(i, j);
                stats.rule_merges += 1;
            } else if self.config.hybrid_mode {
                undecided.push((i, j));
            }
        }

        // Tiers 2 and 3 only run in hybrid mode with pairs left over.
        if !undecided.is_empty() {
            match self.embed_indices(events, &undecided).await {
                Ok(vectors) => {
                    let ambiguous =
                        self.embedding_tier(&mut clusters, &undecided, &vectors, &mut stats);
                    self.adjudication_tier(events, &mut clusters, ambiguous, &mut stats)
                        .await?;
                }
                Err(error) => {
                    // Degrade to rule-only merging rather than failing the
                    // whole timeline.
                    tracing::warn!(%error, "embedding failed, skipping hybrid merge tiers");
                    stats.embedding_degraded = true;
                }
            }
        }

        let consolidated = consolidate(events, &mut clusters);
        stats.output_events = consolidated.len();
        tracing::info!(
            input = stats.input_events,
            output = stats.output_events,
            excluded = stats.temporal_exclusions,
            rule = stats.rule_merges,
            embedding = stats.embedding_merges,
            adjudicated = stats.adjudicated_merges,
            failures = stats.adjudication_failures,
            "event merge complete"
        );
        Ok(MergeOutcome {
            events: consolidated,
            stats,
        })
    }

    /// Embed the comparison text of every event appearing in `pairs`,
    /// going through the LRU cache and batching the misses.
    async fn embed_indices(
        &self,
        events: &[RawEvent],
        pairs: &[(usize, usize)],
    ) -> Result<HashMap<usize, Vec<f32>>> {
        let mut needed: BTreeSet<usize> = BTreeSet::new();
        for &(i, j) in pairs {
            needed.insert(i);
            needed.insert(j);
        }

        let mut vectors: HashMap<usize, Vec<f32>> = HashMap::new();
        let mut misses: Vec<(usize, String)> = Vec::new();
        for &idx in &needed {
            let text = events[idx].comparison_text();
            match self.cache.get(&text) {
                Some(vector) => {
                    vectors.insert(idx, vector);
                }
                None => misses.push((idx, text)),
            }
        }

        if !misses.is_empty() {
            let texts: Vec<String> = misses.iter().map(|(_, t)| t.clone()).collect();
            let embedded = self.embedder.embed(&texts).await?;
            if embedded.len() != misses.len() {
                return Err(ChronicleError::Embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    misses.len()
                )));
            }
            for ((idx, text), vector) in misses.into_iter().zip(embedded) {
                self.cache.insert(text, vector.clone());
                vectors.insert(idx, vector);
            }
        }
        Ok(vectors)
    }

    /// Tier 2: auto-merge above the high bar, collect the middle band.
    /// Returns ambiguous pairs most-similar first so the likeliest merges
    /// are adjudicated before the window budget runs out.
    fn embedding_tier(
        &self,
        clusters: &mut Clusters,
        pairs: &[(usize, usize)],
        vectors: &HashMap<usize, Vec<f32>>,
        stats: &mut MergeStats,
    ) -> Vec<(usize, usize)> {
        let mut ambiguous: Vec<(usize, usize, f32)> = Vec::new();
        for &(i, j) in pairs {
            if clusters.same_set(i, j) {
                continue;
            }
            let (Some(a), Some(b)) = (vectors.get(&i), vectors.get(&j)) else {
                continue;
            };
            let similarity = cosine_similarity(a, b);
            if similarity >= self.config.auto_merge_threshold {
                clusters.union(i, j);
                stats.embedding_merges += 1;
            } else if similarity >= self.config.embedding_threshold {
                ambiguous.push((i, j, similarity));
            }
        }
        ambiguous.sort_by(|x, y| {
            y.2.partial_cmp(&x.2)
                .unwrap_or(Ordering::Equal)
                .then_with(|| (x.0, x.1).cmp(&(y.0, y.1)))
        });
        ambiguous.into_iter().map(|(i, j, _)| (i, j)).collect()
    }

    /// Tier 3: adjudicate ambiguous pairs in windows. Pairs already
    /// clustered by an earlier window are skipped; any failure counts
    /// against the pair but never merges it.
    async fn adjudication_tier(
        &self,
        events: &[RawEvent],
        clusters: &mut Clusters,
        ambiguous: Vec<(usize, usize)>,
        stats: &mut MergeStats,
    ) -> Result<()> {
        for window in ambiguous.chunks(self.config.adjudication_window) {
            let live: Vec<(usize, usize)> = window
                .iter()
                .copied()
                .filter(|&(i, j)| !clusters.same_set(i, j))
                .collect();
            if live.is_empty() {
                continue;
            }

            let calls = live.iter().map(|&(i, j)| {
                let limit = Arc::clone(&self.adjudication_limit);
                async move {
                    let _permit = limit
                        .acquire()
                        .await
                        .map_err(|_| ChronicleError::Cancelled)?;
                    match timeout(
                        self.config.adjudication_timeout,
                        self.adjudicator.adjudicate(&events[i], &events[j]),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(AdjudicationError::Timeout.into()),
                    }
                }
            });
            let verdicts = futures::future::join_all(calls).await;

            for (&(i, j), verdict) in live.iter().zip(verdicts) {
                stats.adjudications += 1;
                match verdict {
                    Ok(v) if v.merges_at(self.config.adjudication_confidence_floor) => {
                        clusters.union(i, j);
                        stats.adjudicated_merges += 1;
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(
                            left = %events[i].id,
                            right = %events[j].id,
                            %error,
                            "adjudication failed, leaving pair unmerged"
                        );
                        stats.adjudication_failures += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Year distance between two events. An event without a resolvable year
/// reads as distance zero, so undated events are never excluded on
/// temporal grounds.
fn years_apart(a: &RawEvent, b: &RawEvent) -> u32 {
    match (a.date.event_year(), b.date.event_year()) {
        (Some(left), Some(right)) => left.abs_diff(right),
        _ => 0,
    }
}

/// Candidate pairs (i < j) sharing at least `min_shared` normalized
/// entities, with the shared count, in ascending (i, j) order.
fn candidate_pairs(
    entity_sets: &[BTreeSet<String>],
    min_shared: usize,
) -> Vec<(usize, usize, usize)> {
    let mut postings: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, set) in entity_sets.iter().enumerate() {
        for name in set {
            postings.entry(name).or_default().push(idx);
        }
    }

    let mut shared: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    for indices in postings.values() {
        for (a, &i) in indices.iter().enumerate() {
            for &j in &indices[a + 1..] {
                *shared.entry((i, j)).or_insert(0) += 1;
            }
        }
    }

    shared
        .into_iter()
        .filter(|&(_, count)| count >= min_shared)
        .map(|((i, j), count)| (i, j, count))
        .collect()
}

/// Collapse each cluster into one timeline event. The representative is
/// the member with the highest relevance, breaking ties by longer
/// description, then lexicographically greatest description, then
/// lowest raw event id; the rest are absorbed in input order.
fn consolidate(events: &[RawEvent], clusters: &mut Clusters) -> Vec<TimelineEvent> {
    let mut consolidated = Vec::new();
    for group in clusters.groups() {
        let representative = group
            .iter()
            .copied()
            .min_by(|&a, &b| {
                events[b]
                    .relevance
                    .partial_cmp(&events[a].relevance)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| events[b].description.len().cmp(&events[a].description.len()))
                    .then_with(|| events[b].description.cmp(&events[a].description))
                    .then_with(|| events[a].id.cmp(&events[b].id))
            })
            .unwrap_or(group[0]);

        let mut merged = TimelineEvent::from_raw(&events[representative]);
        for idx in group {
            if idx != representative {
                merged.absorb(&events[idx]);
            }
        }
        consolidated.push(merged);
    }
    consolidated
}
