use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use crate::config::SearchConfig;
use crate::models::{Candidate, QueryResult, SearchOutcome};
use crate::search::boost::BoostRules;
use crate::store::{CollectionStore, QueryEmbedder, StoreError};

/// A candidate paired with its ranking distance.
#[derive(Debug, Clone)]
pub struct Scored {
    pub candidate: Candidate,
    pub distance: f32,
}

impl Scored {
    /// Convert into the caller-facing shape: inject `collection` into the
    /// metadata and cut the document to at most `max_chars` bytes.
    pub fn into_result(self, max_chars: usize, lexical_score: Option<f32>) -> QueryResult {
        let Candidate {
            document,
            mut metadata,
            raw_distance,
            collection,
            ..
        } = self.candidate;
        metadata.insert("collection".to_string(), collection.into());
        QueryResult {
            document: truncate_to_char_boundary(&document, max_chars),
            metadata,
            distance: self.distance,
            raw_distance,
            lexical_score,
        }
    }
}

/// Every hit gathered for one query, before ranking.
#[derive(Debug, Default)]
pub struct CandidatePool {
    pub candidates: Vec<Candidate>,
    pub collections_queried: usize,
    pub failed_collections: Vec<String>,
}

/// Fans one query out to every configured collection and merges the hits
/// into a single boosted, globally sorted list.
pub struct FusionEngine {
    store: Arc<dyn CollectionStore>,
    embedder: Arc<dyn QueryEmbedder>,
    collections: Vec<String>,
    rules: BoostRules,
    min_per_collection: usize,
    per_collection_factor: usize,
    max_document_chars: usize,
    query_timeout: Duration,
}

impl FusionEngine {
    pub fn new(
        store: Arc<dyn CollectionStore>,
        embedder: Arc<dyn QueryEmbedder>,
        collections: Vec<String>,
        config: &SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            collections,
            rules: BoostRules::new(&config.boost),
            min_per_collection: config.min_per_collection,
            per_collection_factor: config.per_collection_factor,
            max_document_chars: config.max_document_chars,
            query_timeout: Duration::from_secs(config.query_timeout_secs.max(1)),
        }
    }

    /// Override the per-collection timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    pub fn rules(&self) -> &BoostRules {
        &self.rules
    }

    pub fn max_document_chars(&self) -> usize {
        self.max_document_chars
    }

    /// Hits requested from each collection for a final list of `n_results`.
    pub fn per_collection_limit(&self, n_results: usize) -> usize {
        self.min_per_collection
            .max(n_results.saturating_mul(self.per_collection_factor))
    }

    /// Baseline search: fan out, boost, sort, truncate to `n_results`.
    ///
    /// Never fails. Collections that error or time out contribute nothing and
    /// are listed in `failed_collections`.
    pub async fn search(&self, query: &str, n_results: usize) -> SearchOutcome {
        if n_results == 0 {
            return SearchOutcome::default();
        }

        let pool = self
            .gather(query, self.per_collection_limit(n_results))
            .await;

        let mut scored = rank(pool.candidates, &self.rules);
        scored.truncate(n_results);

        tracing::debug!(
            "Fused {} results from {}/{} collections",
            scored.len(),
            pool.collections_queried - pool.failed_collections.len(),
            pool.collections_queried
        );

        SearchOutcome {
            results: scored
                .into_iter()
                .map(|s| s.into_result(self.max_document_chars, None))
                .collect(),
            collections_queried: pool.collections_queried,
            failed_collections: pool.failed_collections,
        }
    }

    /// Embed the query once and query every collection concurrently.
    pub async fn gather(&self, query: &str, per_collection: usize) -> CandidatePool {
        let collections_queried = self.collections.len();

        let embedding = match self.embedder.embed_query(query).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Query embedding failed, no collection can be searched: {e:#}");
                return CandidatePool {
                    candidates: Vec::new(),
                    collections_queried,
                    failed_collections: self.collections.clone(),
                };
            }
        };
        let embedding = &embedding;

        let queries = self
            .collections
            .iter()
            .enumerate()
            .map(|(priority, name)| async move {
                let result = match tokio::time::timeout(
                    self.query_timeout,
                    self.store.query(name, embedding, per_collection),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout(self.query_timeout)),
                };
                (priority, name, result)
            });

        let mut pool = CandidatePool {
            candidates: Vec::new(),
            collections_queried,
            failed_collections: Vec::new(),
        };

        for (priority, name, result) in join_all(queries).await {
            match result {
                Ok(hits) => {
                    pool.candidates
                        .extend(hits.into_iter().enumerate().map(|(rank, hit)| Candidate {
                            id: hit.id,
                            document: hit.document,
                            metadata: hit.metadata,
                            raw_distance: hit.distance,
                            collection: name.clone(),
                            collection_priority: priority,
                            rank,
                        }));
                }
                Err(e) => {
                    tracing::warn!("Skipping collection '{name}': {e}");
                    pool.failed_collections.push(name.clone());
                }
            }
        }

        pool
    }
}

/// Score every candidate and sort ascending by boosted distance.
pub fn rank(candidates: Vec<Candidate>, rules: &BoostRules) -> Vec<Scored> {
    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .map(|candidate| {
            let distance = rules.score(&candidate);
            Scored {
                candidate,
                distance,
            }
        })
        .collect();
    sort_scored(&mut scored);
    scored
}

pub fn sort_scored(scored: &mut [Scored]) {
    scored.sort_by(compare_scored);
}

/// Ascending distance; ties go to the higher-priority collection, then to the
/// better rank inside it. NaN distances sort last.
pub fn compare_scored(a: &Scored, b: &Scored) -> Ordering {
    compare_distance(a.distance, b.distance)
        .then(
            a.candidate
                .collection_priority
                .cmp(&b.candidate.collection_priority),
        )
        .then(a.candidate.rank.cmp(&b.candidate.rank))
}

fn compare_distance(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.total_cmp(&b),
    }
}

pub(crate) fn truncate_to_char_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
