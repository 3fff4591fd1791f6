use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::models::{QueryRequest, QueryResponse, SearchOutcome};
use crate::state::AppState;

/// POST /query - Fused search across every configured collection:
///   1. Embed the query once, fan out to all collections concurrently
///   2. Boost book/training/expert content, sort globally by distance
///   3. Optionally blend in BM25 over the pool (`hybrid: true`, cached)
///
/// A failing collection is skipped and listed in `failed_collections`.
/// If every collection fails the answer is 503 rather than an empty 200.
pub async fn query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<(StatusCode, Json<QueryResponse>), (StatusCode, String)> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }

    let n_results = state.result_count(req.n_results);
    let outcome = if req.hybrid {
        state.hybrid.search(query, n_results).await
    } else {
        state.engine.search(query, n_results).await
    };

    tracing::info!(
        "Query '{query}' -> {} results ({} of {} collections failed)",
        outcome.results.len(),
        outcome.failed_collections.len(),
        outcome.collections_queried
    );

    Ok(respond(outcome))
}

fn respond(outcome: SearchOutcome) -> (StatusCode, Json<QueryResponse>) {
    if outcome.backend_unavailable() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(QueryResponse {
                success: false,
                results: Vec::new(),
                message: Some("Knowledge base is unavailable".to_string()),
                failed_collections: outcome.failed_collections,
            }),
        );
    }

    let message = outcome
        .results
        .is_empty()
        .then(|| "No relevant results found".to_string());

    (
        StatusCode::OK,
        Json(QueryResponse {
            success: true,
            results: outcome.results,
            message,
            failed_collections: outcome.failed_collections,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::{CollectionStore, QueryEmbedder, StoreError, StoredHit};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    /// Serves one hit per collection, except for names in `broken`.
    struct StubStore {
        broken: Vec<String>,
    }

    #[async_trait]
    impl CollectionStore for StubStore {
        async fn query(
            &self,
            collection: &str,
            _embedding: &[f32],
            _n_results: usize,
        ) -> Result<Vec<StoredHit>, StoreError> {
            if self.broken.iter().any(|b| b == collection) {
                return Err(StoreError::Status {
                    status: 500,
                    body: "down".into(),
                });
            }
            let metadata = if collection == "business-books" {
                json!({"type": "book", "title": "Sales Playbook"})
            } else {
                json!({"type": "doc"})
            };
            Ok(vec![StoredHit {
                id: format!("{collection}-0"),
                document: format!("sms workflow notes from {collection}"),
                metadata: metadata.as_object().cloned().unwrap_or_default(),
                distance: 0.55,
            }])
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl QueryEmbedder for StubEmbedder {
        async fn embed_query(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    fn state(broken: &[&str]) -> AppState {
        let config = Config {
            collections: vec!["ghl-docs".into(), "business-books".into()],
            ..Config::default()
        };
        AppState::with_backends(
            config,
            Arc::new(StubStore {
                broken: broken.iter().map(|s| s.to_string()).collect(),
            }),
            Arc::new(StubEmbedder),
        )
    }

    fn request(query: &str, n_results: Option<usize>, hybrid: bool) -> Json<QueryRequest> {
        Json(QueryRequest {
            query: query.to_string(),
            n_results,
            hybrid,
        })
    }

    #[tokio::test]
    async fn test_empty_query_is_bad_request() {
        let err = query(State(state(&[])), request("   ", None, false))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_book_content_ranks_first() {
        let (status, Json(body)) = query(State(state(&[])), request("offers", Some(5), false))
            .await
            .unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        assert_eq!(body.results.len(), 2);
        assert_eq!(body.results[0].metadata["collection"], "business-books");
        assert!((body.results[0].distance - 0.05).abs() < 1e-6);
        assert!((body.results[0].raw_distance - 0.55).abs() < 1e-6);
        assert!(body.failed_collections.is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_is_ok_with_failed_list() {
        let (status, Json(body)) =
            query(State(state(&["ghl-docs"])), request("offers", None, false))
                .await
                .unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.results.len(), 1);
        assert_eq!(body.failed_collections, vec!["ghl-docs".to_string()]);
    }

    #[tokio::test]
    async fn test_all_failed_is_service_unavailable() {
        let (status, Json(body)) = query(
            State(state(&["ghl-docs", "business-books"])),
            request("offers", None, true),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.success);
        assert!(body.results.is_empty());
        assert_eq!(body.failed_collections.len(), 2);
    }

    #[tokio::test]
    async fn test_n_results_is_capped() {
        let state = state(&[]);
        assert_eq!(state.result_count(Some(10_000)), state.config.search.max_results);
        assert_eq!(state.result_count(None), state.config.search.default_results);
    }

    #[tokio::test]
    async fn test_zero_results_reports_message() {
        let (status, Json(body)) = query(State(state(&[])), request("offers", Some(0), false))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(body.results.is_empty());
        assert_eq!(body.message.as_deref(), Some("No relevant results found"));
    }

    #[tokio::test]
    async fn test_hybrid_request_fills_cache_and_health() {
        let state = state(&[]);
        let (_, Json(first)) = query(State(state.clone()), request("SMS  workflow", Some(2), true))
            .await
            .unwrap();
        let (_, Json(second)) = query(State(state.clone()), request("sms workflow", Some(2), true))
            .await
            .unwrap();

        assert_eq!(first.results, second.results);
        assert!(first.results.iter().all(|r| r.lexical_score.is_some()));

        let Json(health) = crate::api::health::health(State(state)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.collections, vec!["ghl-docs", "business-books"]);
        assert_eq!(health.cache_entries, 1);
    }
}
