use std::sync::Arc;

use crate::config::HybridConfig;
use crate::models::SearchOutcome;
use crate::search::bm25;
use crate::search::cache::ResultCache;
use crate::search::expand::{normalize_query, SynonymTable};
use crate::search::fusion::{compare_scored, rank, FusionEngine, Scored};

/// Semantic + lexical ranking on top of the fusion engine.
///
/// Pipeline:
/// 1. Normalize the query; look up `(normalized, n_results)` in the LRU.
/// 2. Gather and boost the full candidate pool (same fan-out as the baseline).
/// 3. Expand the query with synonyms and BM25-score the pool's documents.
/// 4. `combined = boosted_distance - lexical_weight * bm25_normalized`,
///    so the result is still a distance and lower still wins.
/// 5. Sort with the baseline tie-break, truncate, cache if nothing failed.
pub struct HybridSearcher {
    engine: Arc<FusionEngine>,
    synonyms: SynonymTable,
    cache: ResultCache,
    lexical_weight: f32,
}

impl HybridSearcher {
    pub fn new(engine: Arc<FusionEngine>, config: &HybridConfig) -> Self {
        Self {
            engine,
            synonyms: SynonymTable::new(&config.synonyms),
            cache: ResultCache::new(config.cache_capacity),
            lexical_weight: config.lexical_weight,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub async fn search(&self, query: &str, n_results: usize) -> SearchOutcome {
        if n_results == 0 {
            return SearchOutcome::default();
        }

        let normalized = normalize_query(query);
        let key = (normalized.clone(), n_results);

        if let Some(results) = self.cache.get(&key) {
            tracing::debug!("Hybrid cache hit for '{normalized}'");
            return SearchOutcome {
                results,
                collections_queried: self.engine.collections().len(),
                failed_collections: Vec::new(),
            };
        }

        let pool = self
            .engine
            .gather(&normalized, self.engine.per_collection_limit(n_results))
            .await;
        let scored = rank(pool.candidates, self.engine.rules());

        let lexical_query = self.synonyms.expanded_query(&normalized);
        let mut blended = blend(scored, &lexical_query, self.lexical_weight);
        blended.truncate(n_results);

        let max_chars = self.engine.max_document_chars();
        let results: Vec<_> = blended
            .into_iter()
            .map(|(scored, lexical)| scored.into_result(max_chars, Some(lexical)))
            .collect();

        // A partial answer must not be pinned in the cache
        if pool.failed_collections.is_empty() {
            self.cache.put(key, results.clone());
        }

        SearchOutcome {
            results,
            collections_queried: pool.collections_queried,
            failed_collections: pool.failed_collections,
        }
    }
}

/// Pull each candidate's distance down by its normalized lexical score and
/// re-sort. Returns the candidates paired with that lexical score.
pub fn blend(scored: Vec<Scored>, lexical_query: &str, weight: f32) -> Vec<(Scored, f32)> {
    let documents: Vec<&str> = scored
        .iter()
        .map(|s| s.candidate.document.as_str())
        .collect();

    let lexical = match bm25::score_documents(lexical_query, &documents) {
        Ok(raw) => bm25::normalize(&raw),
        Err(e) => {
            tracing::warn!("Lexical scoring failed, falling back to semantic only: {e:#}");
            vec![0.0; documents.len()]
        }
    };

    let mut blended: Vec<(Scored, f32)> = scored
        .into_iter()
        .zip(lexical)
        .map(|(mut s, lex)| {
            s.distance -= weight * lex;
            (s, lex)
        })
        .collect();

    blended.sort_by(|a, b| compare_scored(&a.0, &b.0));
    blended
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candidate, Metadata};

    fn scored(doc: &str, distance: f32, priority: usize, rank: usize) -> Scored {
        Scored {
            candidate: Candidate {
                id: format!("{priority}-{rank}"),
                document: doc.to_string(),
                metadata: Metadata::new(),
                raw_distance: distance,
                collection: format!("c{priority}"),
                collection_priority: priority,
                rank,
            },
            distance,
        }
    }

    #[test]
    fn test_empty_pool() {
        assert!(blend(Vec::new(), "anything", 0.3).is_empty());
    }

    #[test]
    fn test_lexical_match_overtakes_close_semantic_hit() {
        let pool = vec![
            scored("calendar booking widget settings", 0.30, 0, 0),
            scored("build a sms workflow with triggers", 0.35, 0, 1),
        ];
        let blended = blend(pool, "sms workflow", 0.3);

        assert_eq!(blended[0].0.candidate.rank, 1);
        assert!((blended[0].1 - 1.0).abs() < 1e-6);
        assert!((blended[0].0.distance - 0.05).abs() < 1e-5);
        assert_eq!(blended[1].1, 0.0);
        assert!((blended[1].0.distance - 0.30).abs() < 1e-6);
    }

    #[test]
    fn test_zero_weight_keeps_semantic_order() {
        let pool = vec![
            scored("unrelated text", 0.1, 0, 0),
            scored("funnel funnel funnel", 0.2, 0, 1),
        ];
        let blended = blend(pool, "funnel", 0.0);
        assert_eq!(blended[0].0.candidate.rank, 0);
        assert!(blended[1].1 > 0.0);
    }

    #[test]
    fn test_ties_use_collection_priority() {
        let pool = vec![
            scored("same text", 0.5, 1, 0),
            scored("same text", 0.5, 0, 0),
        ];
        let blended = blend(pool, "same", 0.3);
        assert_eq!(blended[0].0.candidate.collection_priority, 0);
        assert_eq!(blended[1].0.candidate.collection_priority, 1);
    }
}
