use serde::{Deserialize, Serialize};

/// Chunk metadata as stored alongside the embedding: string keys to scalar JSON values.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A hit from one collection, stamped with where it came from.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    /// Distance as reported by the store (lower = closer)
    pub raw_distance: f32,
    pub collection: String,
    /// Position of `collection` in the configured list; lower wins ties
    pub collection_priority: usize,
    /// Position of this hit within its collection's result list
    pub rank: usize,
}

/// A ranked passage as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub document: String,
    /// Chunk metadata with `collection` injected
    pub metadata: Metadata,
    /// Ranking key, lower is better
    pub distance: f32,
    pub raw_distance: f32,
    /// Normalized BM25 score, hybrid mode only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f32>,
}

/// Outcome of one fused search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub results: Vec<QueryResult>,
    pub collections_queried: usize,
    pub failed_collections: Vec<String>,
}

impl SearchOutcome {
    /// True when collections were queried and every one of them failed.
    pub fn backend_unavailable(&self) -> bool {
        self.collections_queried > 0 && self.failed_collections.len() >= self.collections_queried
    }
}

/// POST /query request
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub n_results: Option<usize>,
    /// Use lexical + semantic scoring with the result cache
    #[serde(default)]
    pub hybrid: bool,
}

/// POST /query response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub results: Vec<QueryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_collections: Vec<String>,
}

/// GET /health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub collections: Vec<String>,
    pub cache_entries: usize,
    pub cache_capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_unavailable_only_when_all_failed() {
        let mut outcome = SearchOutcome {
            results: vec![],
            collections_queried: 2,
            failed_collections: vec!["docs".into()],
        };
        assert!(!outcome.backend_unavailable());

        outcome.failed_collections.push("books".into());
        assert!(outcome.backend_unavailable());

        // Nothing queried (n_results = 0) is not an outage
        assert!(!SearchOutcome::default().backend_unavailable());
    }

    #[test]
    fn test_query_result_omits_missing_lexical_score() {
        let result = QueryResult {
            document: "text".into(),
            metadata: Metadata::new(),
            distance: 0.1,
            raw_distance: 0.1,
            lexical_score: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("lexical_score").is_none());
        assert!(json.get("distance").is_some());
    }

    #[test]
    fn test_query_request_defaults() {
        let req: QueryRequest = serde_json::from_str(r#"{"query": "funnels"}"#).unwrap();
        assert_eq!(req.query, "funnels");
        assert!(req.n_results.is_none());
        assert!(!req.hybrid);
    }
}
