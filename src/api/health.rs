use axum::extract::State;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// GET /health - Liveness plus what this instance searches.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache = state.hybrid.cache();
    Json(HealthResponse {
        status: "ok".to_string(),
        collections: state.engine.collections().to_vec(),
        cache_entries: cache.len(),
        cache_capacity: cache.capacity(),
    })
}
